//! # Tag Store
//!
//! Authoritative in-memory mirror of the tag collection. Snapshots replace the
//! collection, pushes from the event stream are upserted, and every derived
//! view is computed from the canonical collection on read, so a view can never
//! be observed out of step with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{MirrorError, Result};
use crate::models::{EntityId, Tag, TagHistoryPoint};
use crate::snapshot::{HistoryWindow, SnapshotChannel, TagQuery};
use crate::stores::collection::{EntityCollection, Upsert};
use crate::stores::status::{OpStatus, OpTracker};

/// Async operations tracked by the tag store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagOp {
    /// `list_tags` snapshot load.
    List,
    /// Single-tag lookup.
    Detail,
    /// History query.
    History,
}

/// Tags sharing one pipeline object type, in collection order.
#[derive(Debug, Clone, PartialEq)]
pub struct TagGroup {
    pub object_type: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Default)]
struct TagBook {
    tags: EntityCollection<Tag>,
    /// Last record fetched through `fetch_tag`. Independent of the list.
    current: Option<Tag>,
    /// Last history snapshot. Never merged into the live tags.
    history: Vec<TagHistoryPoint>,
}

/// The tag mirror.
#[derive(Debug)]
pub struct TagStore {
    book: RwLock<TagBook>,
    ops: OpTracker<TagOp>,
    torn_down: AtomicBool,
}

impl Default for TagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStore {
    pub fn new() -> Self {
        Self {
            book: RwLock::new(TagBook::default()),
            ops: OpTracker::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TagBook> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TagBook> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Mutations ---

    /// Replaces the whole collection with a snapshot.
    pub fn load(&self, tags: Vec<Tag>) {
        let mut book = self.write();
        book.tags.replace_all(tags);
        log::debug!("Tag snapshot loaded: {} tags.", book.tags.len());
    }

    /// Applies one pushed tag record. Idempotent.
    pub fn upsert(&self, tag: Tag) -> Upsert {
        let id = tag.id;
        let outcome = self.write().tags.upsert(tag);
        log::trace!("Tag {} {:?}.", id, outcome);
        outcome
    }

    /// Patches the live value of a known tag. Returns false for unknown ids.
    pub fn update_value(&self, id: EntityId, value: f64, quality: i64) -> bool {
        match self.write().tags.get_mut(id) {
            Some(tag) => {
                tag.current_value = value;
                tag.current_quality = quality;
                true
            }
            None => false,
        }
    }

    // --- Reads & derived views ---

    pub fn get(&self, id: EntityId) -> Option<Tag> {
        self.read().tags.get(id).cloned()
    }

    /// All tags, front first.
    pub fn tags(&self) -> Vec<Tag> {
        self.read().tags.to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().tags.is_empty()
    }

    /// Tags grouped by `object_type_name`. Groups appear in order of first
    /// occurrence; tags keep collection order inside a group.
    pub fn grouped_by_object_type(&self) -> Vec<TagGroup> {
        let book = self.read();
        let mut groups: Vec<TagGroup> = Vec::new();
        let mut slot: HashMap<&str, usize> = HashMap::new();
        for tag in book.tags.iter() {
            let idx = *slot.entry(tag.object_type_name.as_str()).or_insert_with(|| {
                groups.push(TagGroup {
                    object_type: tag.object_type_name.clone(),
                    tags: Vec::new(),
                });
                groups.len() - 1
            });
            groups[idx].tags.push(tag.clone());
        }
        groups
    }

    /// Tags whose value sits outside the normal band. See [`Tag::is_critical`].
    pub fn critical_tags(&self) -> Vec<Tag> {
        self.read()
            .tags
            .iter()
            .filter(|t| t.is_critical())
            .cloned()
            .collect()
    }

    pub fn current_tag(&self) -> Option<Tag> {
        self.read().current.clone()
    }

    pub fn history(&self) -> Vec<TagHistoryPoint> {
        self.read().history.clone()
    }

    // --- Snapshot channel operations ---

    /// Loads the tag list from the snapshot channel and replaces the collection.
    /// Returns the number of tags loaded.
    pub async fn fetch_tags<S: SnapshotChannel>(&self, source: &S, query: &TagQuery) -> Result<usize> {
        self.ops
            .track(TagOp::List, async {
                let page = source.list_tags(query).await?;
                self.ensure_alive()?;
                let count = page.results.len();
                self.load(page.results);
                Ok(count)
            })
            .await
    }

    /// Fetches one tag into the "current tag" slot. The list is not touched.
    pub async fn fetch_tag<S: SnapshotChannel>(&self, source: &S, id: EntityId) -> Result<Tag> {
        self.ops
            .track(TagOp::Detail, async {
                let tag = source.get_tag(id).await?;
                self.ensure_alive()?;
                self.write().current = Some(tag.clone());
                Ok(tag)
            })
            .await
    }

    /// Fetches the history of `tag_id` over `window`, replacing the previous
    /// history snapshot. Returns the number of points.
    pub async fn fetch_history<S: SnapshotChannel>(
        &self,
        source: &S,
        tag_id: EntityId,
        window: &HistoryWindow,
    ) -> Result<usize> {
        self.ops
            .track(TagOp::History, async {
                let points = source.tag_history(tag_id, window).await?;
                self.ensure_alive()?;
                let count = points.len();
                self.write().history = points;
                Ok(count)
            })
            .await
    }

    // --- Status ---

    pub fn status(&self, op: TagOp) -> OpStatus {
        self.ops.status(op)
    }

    /// True while any tag operation is in flight.
    pub fn loading(&self) -> bool {
        self.ops.any_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.ops.last_error()
    }

    pub fn clear_error(&self) {
        self.ops.clear_errors();
    }

    /// Detaches the store: results of in-flight calls are discarded from now on.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            log::debug!("Tag store torn down; discarding late snapshot result.");
            return Err(MirrorError::Closed);
        }
        Ok(())
    }
}
