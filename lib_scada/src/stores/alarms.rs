//! # Alarm Store
//!
//! Authoritative in-memory mirror of the alarm collection plus the maintained
//! *active subset*: the alarms currently in state `ACTIVE`, newest first.
//!
//! ## Invariant
//! The active subset holds exactly the ids of the ACTIVE alarms in the
//! canonical collection. It stores ids, never copies, so the two lists can not
//! disagree about an alarm's content, and every mutation (`load`, `upsert`,
//! `merge_active`, acknowledge and its rollback) re-syncs membership inside the
//! same write lock.
//!
//! Severity buckets, filtered lists and stats are recomputed on each read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{MirrorError, Result};
use crate::models::{AcknowledgeReceipt, Alarm, AlarmState, EntityId, Severity};
use crate::snapshot::{AlarmQuery, SnapshotChannel};
use crate::stores::collection::{EntityCollection, Upsert};
use crate::stores::status::{OpStatus, OpTracker};

/// Async operations tracked by the alarm store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmOp {
    /// `list_alarms` snapshot load.
    List,
    /// Active-alarms snapshot.
    Active,
    /// Acknowledge write.
    Acknowledge,
}

/// How the local record is updated around the acknowledge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Update locally only after the remote call succeeded.
    #[default]
    Confirmed,
    /// Update locally first; roll back if the remote call fails and the
    /// record has not been superseded meanwhile.
    Optimistic,
}

/// Conjunctive alarm filter. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmFilter {
    pub state: Option<AlarmState>,
    pub severity: Option<Severity>,
}

impl AlarmFilter {
    /// Builds a filter from text parameters; empty strings mean "no constraint".
    pub fn from_params(state: &str, severity: &str) -> Self {
        Self {
            state: (!state.is_empty()).then(|| AlarmState::from(state)),
            severity: (!severity.is_empty()).then(|| Severity::from(severity)),
        }
    }

    pub fn matches(&self, alarm: &Alarm) -> bool {
        self.state.as_ref().map_or(true, |s| &alarm.state == s)
            && self.severity.as_ref().map_or(true, |s| &alarm.severity == s)
    }
}

/// Alarms per bucketed severity, highest priority first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeverityBuckets {
    buckets: [Vec<Alarm>; 4],
}

impl SeverityBuckets {
    /// Alarms of `severity`; empty for severities outside the four buckets.
    pub fn get(&self, severity: &Severity) -> &[Alarm] {
        match severity.bucket() {
            Some(i) => &self.buckets[i],
            None => &[],
        }
    }

    /// `(severity, alarms)` pairs in CRITICAL, HIGH, MEDIUM, LOW order.
    pub fn iter(&self) -> impl Iterator<Item = (Severity, &[Alarm])> + '_ {
        Severity::BUCKETS
            .into_iter()
            .zip(self.buckets.iter().map(Vec::as_slice))
    }

    pub fn counts(&self) -> [usize; 4] {
        [
            self.buckets[0].len(),
            self.buckets[1].len(),
            self.buckets[2].len(),
            self.buckets[3].len(),
        ]
    }
}

/// Aggregate counts over the canonical collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmStats {
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub critical: usize,
    pub high: usize,
}

#[derive(Debug, Default)]
struct AlarmBook {
    alarms: EntityCollection<Alarm>,
    /// Ids of ACTIVE alarms, newest first.
    active: Vec<EntityId>,
    filter: AlarmFilter,
}

impl AlarmBook {
    fn load(&mut self, alarms: Vec<Alarm>) {
        self.alarms.replace_all(alarms);
        self.active = self
            .alarms
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.id)
            .collect();
    }

    fn upsert(&mut self, alarm: Alarm) -> Upsert {
        let id = alarm.id;
        let is_active = alarm.is_active();
        let outcome = self.alarms.upsert(alarm);
        self.sync_active(id, is_active);
        outcome
    }

    /// Brings the active subset in line with one alarm's state.
    fn sync_active(&mut self, id: EntityId, is_active: bool) {
        let pos = self.active.iter().position(|&a| a == id);
        match (is_active, pos) {
            (true, None) => self.active.insert(0, id),
            (false, Some(i)) => {
                self.active.remove(i);
            }
            _ => {}
        }
    }

    /// Merges an active-alarms snapshot: known ids are replaced in place, new
    /// ids are front-inserted keeping server order, and the snapshot's active
    /// ids lead the active subset.
    fn merge_active(&mut self, items: Vec<Alarm>) {
        let mut lead: Vec<EntityId> = Vec::with_capacity(items.len());
        let mut fresh: Vec<Alarm> = Vec::new();
        for alarm in items {
            if alarm.is_active() && !lead.contains(&alarm.id) {
                lead.push(alarm.id);
            }
            if self.alarms.contains(alarm.id) {
                self.alarms.upsert(alarm);
            } else if let Some(pos) = fresh.iter().position(|a| a.id == alarm.id) {
                fresh[pos] = alarm;
            } else {
                fresh.push(alarm);
            }
        }
        for alarm in fresh.into_iter().rev() {
            self.alarms.upsert(alarm);
        }

        let alarms = &self.alarms;
        let still_active = |id: &EntityId| alarms.get(*id).map_or(false, Alarm::is_active);
        let rest: Vec<EntityId> = self
            .active
            .iter()
            .copied()
            .filter(|id| still_active(id) && !lead.contains(id))
            .collect();
        lead.extend(rest);
        self.active = lead;
    }

    /// Marks an alarm acknowledged. Returns the record as it was before.
    fn acknowledge(&mut self, id: EntityId, at: DateTime<Utc>, actor: EntityId) -> Option<Alarm> {
        let alarm = self.alarms.get_mut(id)?;
        let previous = alarm.clone();
        alarm.state = AlarmState::Acknowledged;
        alarm.acknowledged_at = Some(at);
        alarm.acknowledged_by = Some(actor);
        self.sync_active(id, false);
        Some(previous)
    }

    /// Puts back a record replaced by [`AlarmBook::acknowledge`], at its old
    /// place in the active subset when it was active.
    fn restore(&mut self, previous: Alarm, slot: Option<usize>) {
        let id = previous.id;
        let is_active = previous.is_active();
        self.alarms.upsert(previous);
        self.active.retain(|&a| a != id);
        if is_active {
            let at = slot.unwrap_or(0).min(self.active.len());
            self.active.insert(at, id);
        }
    }

    fn active_alarms(&self) -> Vec<Alarm> {
        self.active
            .iter()
            .filter_map(|id| self.alarms.get(*id).cloned())
            .collect()
    }
}

/// The alarm mirror.
#[derive(Debug)]
pub struct AlarmStore {
    book: RwLock<AlarmBook>,
    ops: OpTracker<AlarmOp>,
    ack_mode: AckMode,
    torn_down: AtomicBool,
}

impl Default for AlarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmStore {
    pub fn new() -> Self {
        Self::with_ack_mode(AckMode::default())
    }

    pub fn with_ack_mode(ack_mode: AckMode) -> Self {
        Self {
            book: RwLock::new(AlarmBook::default()),
            ops: OpTracker::new(),
            ack_mode,
            torn_down: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AlarmBook> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AlarmBook> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    // --- Mutations ---

    /// Replaces the whole collection and rebuilds the active subset from it.
    pub fn load(&self, alarms: Vec<Alarm>) {
        let mut book = self.write();
        book.load(alarms);
        log::debug!(
            "Alarm snapshot loaded: {} alarms, {} active.",
            book.alarms.len(),
            book.active.len()
        );
    }

    /// Applies one pushed alarm record and re-syncs the active subset. Idempotent.
    pub fn upsert(&self, alarm: Alarm) -> Upsert {
        let id = alarm.id;
        let outcome = self.write().upsert(alarm);
        log::trace!("Alarm {} {:?}.", id, outcome);
        outcome
    }

    /// Merges an active-alarms snapshot into the collection.
    pub fn merge_active(&self, alarms: Vec<Alarm>) {
        self.write().merge_active(alarms);
    }

    // --- Reads & derived views ---

    pub fn get(&self, id: EntityId) -> Option<Alarm> {
        self.read().alarms.get(id).cloned()
    }

    /// All alarms, front first.
    pub fn alarms(&self) -> Vec<Alarm> {
        self.read().alarms.to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().alarms.is_empty()
    }

    /// The maintained active subset, newest first.
    pub fn active_alarms(&self) -> Vec<Alarm> {
        self.read().active_alarms()
    }

    pub fn by_severity(&self) -> SeverityBuckets {
        let book = self.read();
        let mut out = SeverityBuckets::default();
        for alarm in book.alarms.iter() {
            if let Some(i) = alarm.severity.bucket() {
                out.buckets[i].push(alarm.clone());
            }
        }
        out
    }

    pub fn filtered(&self, filter: &AlarmFilter) -> Vec<Alarm> {
        self.read()
            .alarms
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    /// Merges the provided fields into the store-level filter.
    pub fn set_filter(&self, update: AlarmFilter) {
        let mut book = self.write();
        if update.state.is_some() {
            book.filter.state = update.state;
        }
        if update.severity.is_some() {
            book.filter.severity = update.severity;
        }
    }

    pub fn clear_filter(&self) {
        self.write().filter = AlarmFilter::default();
    }

    pub fn filter(&self) -> AlarmFilter {
        self.read().filter.clone()
    }

    /// Alarms matching the store-level filter.
    pub fn filtered_alarms(&self) -> Vec<Alarm> {
        let book = self.read();
        book.alarms
            .iter()
            .filter(|a| book.filter.matches(a))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AlarmStats {
        let book = self.read();
        let mut stats = AlarmStats {
            total: book.alarms.len(),
            ..Default::default()
        };
        for alarm in book.alarms.iter() {
            match alarm.state {
                AlarmState::Active => stats.active += 1,
                AlarmState::Acknowledged => stats.acknowledged += 1,
                _ => {}
            }
            match alarm.severity {
                Severity::Critical => stats.critical += 1,
                Severity::High => stats.high += 1,
                _ => {}
            }
        }
        stats
    }

    // --- Snapshot channel operations ---

    /// Loads the alarm list and replaces the collection. Returns the count loaded.
    pub async fn fetch_alarms<S: SnapshotChannel>(&self, source: &S, query: &AlarmQuery) -> Result<usize> {
        self.ops
            .track(AlarmOp::List, async {
                let page = source.list_alarms(query).await?;
                self.ensure_alive()?;
                let count = page.results.len();
                self.load(page.results);
                Ok(count)
            })
            .await
    }

    /// Loads the active-alarms snapshot and merges it. Returns the server's total.
    pub async fn fetch_active<S: SnapshotChannel>(&self, source: &S) -> Result<u64> {
        self.ops
            .track(AlarmOp::Active, async {
                let active = source.active_alarms().await?;
                self.ensure_alive()?;
                self.merge_active(active.items);
                Ok(active.total)
            })
            .await
    }

    /// Acknowledges an alarm remotely and mirrors the change locally.
    ///
    /// In [`AckMode::Confirmed`] nothing changes locally unless the remote call
    /// succeeds. In [`AckMode::Optimistic`] the local change is applied first
    /// and reverted on failure, unless a newer record replaced it meanwhile.
    pub async fn acknowledge<S: SnapshotChannel>(
        &self,
        source: &S,
        id: EntityId,
        actor: EntityId,
    ) -> Result<AcknowledgeReceipt> {
        self.ops
            .track(AlarmOp::Acknowledge, async {
                match self.ack_mode {
                    AckMode::Confirmed => {
                        let receipt = source.acknowledge_alarm(id, actor).await?;
                        self.ensure_alive()?;
                        let at = receipt.acknowledged_at.unwrap_or_else(Utc::now);
                        if self.write().acknowledge(id, at, actor).is_none() {
                            log::debug!("Acknowledged alarm {} is not mirrored locally.", id);
                        }
                        Ok(receipt)
                    }
                    AckMode::Optimistic => {
                        let (previous, slot, applied) = {
                            let mut book = self.write();
                            let slot = book.active.iter().position(|&a| a == id);
                            let previous = book.acknowledge(id, Utc::now(), actor);
                            let applied = book.alarms.get(id).cloned();
                            (previous, slot, applied)
                        };
                        match source.acknowledge_alarm(id, actor).await {
                            Ok(receipt) => {
                                if let Some(at) = receipt.acknowledged_at {
                                    let mut book = self.write();
                                    if let Some(alarm) = book.alarms.get_mut(id) {
                                        if Some(&*alarm) == applied.as_ref() {
                                            alarm.acknowledged_at = Some(at);
                                        }
                                    }
                                }
                                Ok(receipt)
                            }
                            Err(e) => {
                                self.rollback(id, previous, slot, applied);
                                Err(e)
                            }
                        }
                    }
                }
            })
            .await
    }

    /// Restores `previous` if the record still is the optimistic one we wrote.
    fn rollback(&self, id: EntityId, previous: Option<Alarm>, slot: Option<usize>, applied: Option<Alarm>) {
        let (Some(previous), Some(applied)) = (previous, applied) else {
            return;
        };
        let mut book = self.write();
        if book.alarms.get(id) == Some(&applied) {
            log::warn!("Acknowledge of alarm {} failed; rolling back local state.", id);
            book.restore(previous, slot);
        } else {
            log::info!("Acknowledge of alarm {} failed but the record was superseded; keeping it.", id);
        }
    }

    // --- Status ---

    pub fn status(&self, op: AlarmOp) -> OpStatus {
        self.ops.status(op)
    }

    /// True while any alarm operation is in flight.
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
            log::debug!("Alarm store torn down; discarding late result.");
            return Err(MirrorError::Closed);
        }
        Ok(())
    }

    /// Checks the active-subset invariant. Used by tests.
    #[cfg(test)]
    fn assert_consistent(&self) {
        let book = self.read();
        let mut expected: Vec<EntityId> = book
            .alarms
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.id)
            .collect();
        let mut actual = book.active.clone();
        expected.sort_unstable();
        actual.sort_unstable();
        assert_eq!(actual, expected, "active subset diverged from the collection");
    }
}
