//! # Snapshot Channel
//!
//! The request/response side of the mirror: bulk loads, point lookups and the
//! acknowledge write. The stores only see this trait; the HTTP implementation
//! lives in [`crate::retrieve`] behind the `retrieve` feature.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    AcknowledgeReceipt, ActiveAlarms, Alarm, AlarmState, EntityId, Page, Severity, Tag,
    TagHistoryPoint,
};

/// Filter parameters for the tag list. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_object: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

/// Filter parameters for the alarm list. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlarmQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AlarmState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

/// Closed time range for a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoryWindow {
    /// Default look-back used by the history view.
    pub const DEFAULT_HOURS: i64 = 24;

    /// The last `hours` hours, ending now.
    ///
    /// Negative spans are empty windows; spans reaching past the representable
    /// range start at the earliest representable instant.
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        let start = Duration::try_hours(hours.max(0))
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::last_hours(Self::DEFAULT_HOURS)
    }
}

/// Request/response access to the remote collections.
///
/// Every call fails with [`crate::MirrorError::Remote`] on transport or server
/// errors and with [`crate::MirrorError::Unauthorized`] when the session is
/// rejected.
pub trait SnapshotChannel: Send + Sync {
    fn list_tags(&self, query: &TagQuery) -> impl Future<Output = Result<Page<Tag>>> + Send;

    fn get_tag(&self, id: EntityId) -> impl Future<Output = Result<Tag>> + Send;

    fn tag_history(
        &self,
        tag_id: EntityId,
        window: &HistoryWindow,
    ) -> impl Future<Output = Result<Vec<TagHistoryPoint>>> + Send;

    fn list_alarms(&self, query: &AlarmQuery) -> impl Future<Output = Result<Page<Alarm>>> + Send;

    fn active_alarms(&self) -> impl Future<Output = Result<ActiveAlarms>> + Send;

    fn acknowledge_alarm(
        &self,
        id: EntityId,
        actor: EntityId,
    ) -> impl Future<Output = Result<AcknowledgeReceipt>> + Send;
}
