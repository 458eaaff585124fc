//! In-memory snapshot channel and record builders for store tests.

use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use tokio::sync::oneshot;

use crate::error::{MirrorError, Result};
use crate::models::{
    AcknowledgeReceipt, ActiveAlarms, Alarm, AlarmState, EntityId, Page, Severity, Tag,
    TagHistoryPoint,
};
use crate::snapshot::{AlarmQuery, HistoryWindow, SnapshotChannel, TagQuery};

pub(crate) fn tag(id: EntityId, object_type: &str, min: f64, max: f64, value: f64) -> Tag {
    Tag {
        id,
        name: format!("TAG-{id}"),
        description: String::new(),
        data_type: "float".into(),
        engineering_units: "bar".into(),
        min_value: min,
        max_value: max,
        current_value: value,
        current_quality: 100,
        pipeline_object_name: format!("Object {id}"),
        object_type_name: object_type.into(),
        object_index: id.to_string(),
        km_mark: Some(id as f64 * 1.5),
    }
}

pub(crate) fn alarm(id: EntityId, severity: &str, state: &str) -> Alarm {
    Alarm {
        id,
        alarm_definition_name: format!("DEF-{id}"),
        tag_name: format!("TAG-{id}"),
        message: format!("alarm {id}"),
        severity: Severity::from(severity),
        state: AlarmState::from(state),
        triggered_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        acknowledged_at: None,
        acknowledged_by: None,
        acknowledged_by_name: None,
    }
}

/// Canned snapshot channel. Errors, once set, are returned by every matching call.
#[derive(Default)]
pub(crate) struct FakeChannel {
    pub tags: Vec<Tag>,
    pub alarms: Vec<Alarm>,
    pub active: Vec<Alarm>,
    pub history: Vec<TagHistoryPoint>,
    pub list_error: Option<MirrorError>,
    pub ack_error: Option<MirrorError>,
    /// When set, acknowledge waits for the sender side before answering.
    pub ack_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeChannel {
    fn listed<T: Clone>(&self, items: &[T]) -> Result<Page<T>> {
        match &self.list_error {
            Some(e) => Err(e.clone()),
            None => Ok(Page::of(items.to_vec())),
        }
    }
}

impl SnapshotChannel for FakeChannel {
    async fn list_tags(&self, _query: &TagQuery) -> Result<Page<Tag>> {
        self.listed(&self.tags)
    }

    async fn get_tag(&self, id: EntityId) -> Result<Tag> {
        self.tags
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| MirrorError::remote(Some(404), "Not found."))
    }

    async fn tag_history(&self, tag_id: EntityId, _window: &HistoryWindow) -> Result<Vec<TagHistoryPoint>> {
        Ok(self.history.iter().filter(|p| p.tag == tag_id).cloned().collect())
    }

    async fn list_alarms(&self, _query: &AlarmQuery) -> Result<Page<Alarm>> {
        self.listed(&self.alarms)
    }

    async fn active_alarms(&self) -> Result<ActiveAlarms> {
        Ok(ActiveAlarms {
            items: self.active.clone(),
            total: self.active.len() as u64,
        })
    }

    async fn acknowledge_alarm(&self, id: EntityId, _actor: EntityId) -> Result<AcknowledgeReceipt> {
        let gate = self.ack_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match &self.ack_error {
            Some(e) => Err(e.clone()),
            None => Ok(AcknowledgeReceipt {
                id,
                message: "acknowledged".into(),
                acknowledged_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
                state: AlarmState::Acknowledged,
            }),
        }
    }
}
