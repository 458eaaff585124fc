//! # Mirror Data Model
//!
//! Wire records for the two mirrored entity kinds (tags and alarms), the
//! read-only tag history snapshot, and the envelopes returned by the snapshot
//! channel. Field names follow the REST/WebSocket JSON verbatim.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Numeric primary key shared by every remote entity.
pub type EntityId = i64;

/// Lower bound of the normal band for a tag's normalized value.
pub const CRITICAL_LOW: f64 = 0.1;
/// Upper bound of the normal band for a tag's normalized value.
pub const CRITICAL_HIGH: f64 = 0.9;

/// Anything stored in an entity collection.
pub trait Entity: Clone {
    /// The unique key of the record.
    fn id(&self) -> EntityId;
}

/// # Tag
///
/// A named measurement point with its live value, quality and engineering
/// bounds, denormalized with the pipeline object that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub engineering_units: String,
    pub min_value: f64,
    pub max_value: f64,
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub current_quality: i64,
    #[serde(default)]
    pub pipeline_object_name: String,
    #[serde(default)]
    pub object_type_name: String,
    #[serde(default)]
    pub object_index: String,
    #[serde(default)]
    pub km_mark: Option<f64>,
}

impl Tag {
    /// Position of `current_value` inside `[min_value, max_value]`, scaled to `[0, 1]`.
    ///
    /// Returns `None` when the range is degenerate (`max == min`) or any operand
    /// is not finite, so no NaN or infinity ever reaches a comparison.
    pub fn normalized_value(&self) -> Option<f64> {
        let range = self.max_value - self.min_value;
        if !range.is_finite() || range == 0.0 || !self.current_value.is_finite() {
            return None;
        }
        Some((self.current_value - self.min_value) / range)
    }

    /// A tag is critical when its normalized value leaves the `[0.1, 0.9]` band.
    /// Tags without a usable range are never critical.
    pub fn is_critical(&self) -> bool {
        self.normalized_value()
            .map_or(false, |n| n < CRITICAL_LOW || n > CRITICAL_HIGH)
    }
}

impl Entity for Tag {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// Alarm severity. Unknown strings are preserved so records round-trip untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Other(String),
}

impl Severity {
    /// The bucketed severities, highest priority first.
    pub const BUCKETS: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Other(s) => s,
        }
    }

    /// Index into [`Severity::BUCKETS`], `None` for unknown severities.
    pub fn bucket(&self) -> Option<usize> {
        match self {
            Severity::Critical => Some(0),
            Severity::High => Some(1),
            Severity::Medium => Some(2),
            Severity::Low => Some(3),
            Severity::Other(_) => None,
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Other(s),
        }
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        Severity::from(s.to_string())
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alarm lifecycle state. Unknown strings are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlarmState {
    Active,
    Acknowledged,
    Resolved,
    Other(String),
}

impl AlarmState {
    pub fn as_str(&self) -> &str {
        match self {
            AlarmState::Active => "ACTIVE",
            AlarmState::Acknowledged => "ACKNOWLEDGED",
            AlarmState::Resolved => "RESOLVED",
            AlarmState::Other(s) => s,
        }
    }
}

impl From<String> for AlarmState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ACTIVE" => AlarmState::Active,
            "ACKNOWLEDGED" => AlarmState::Acknowledged,
            "RESOLVED" => AlarmState::Resolved,
            _ => AlarmState::Other(s),
        }
    }
}

impl From<&str> for AlarmState {
    fn from(s: &str) -> Self {
        AlarmState::from(s.to_string())
    }
}

impl From<AlarmState> for String {
    fn from(s: AlarmState) -> Self {
        match s {
            AlarmState::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Alarm
///
/// A stateful notification raised by an alarm definition on a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: EntityId,
    #[serde(default)]
    pub alarm_definition_name: String,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub message: String,
    pub severity: Severity,
    pub state: AlarmState,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<EntityId>,
    #[serde(default)]
    pub acknowledged_by_name: Option<String>,
}

impl Alarm {
    pub fn is_active(&self) -> bool {
        self.state == AlarmState::Active
    }
}

impl Entity for Alarm {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// One archived sample of a tag. Never merged into the live [`Tag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagHistoryPoint {
    pub id: EntityId,
    /// Id of the tag the sample belongs to.
    pub tag: EntityId,
    #[serde(default)]
    pub tag_name: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub quality: i64,
    pub timestamp: DateTime<Utc>,
}

/// # Page
///
/// One page of a paginated collection. A bare JSON array is accepted as a
/// single, complete page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub count: Option<u64>,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// A single page holding `results`.
    pub fn of(results: Vec<T>) -> Self {
        Self {
            count: Some(results.len() as u64),
            next: None,
            previous: None,
            results,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageRepr<T> {
    Paged {
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
        results: Vec<T>,
    },
    Bare(Vec<T>),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Page<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PageRepr::deserialize(deserializer)? {
            PageRepr::Paged {
                count,
                next,
                previous,
                results,
            } => Page {
                count,
                next,
                previous,
                results,
            },
            PageRepr::Bare(results) => Page::of(results),
        })
    }
}

/// Response of the active-alarms endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlarms {
    pub items: Vec<Alarm>,
    #[serde(default)]
    pub total: u64,
}

/// Response of the acknowledge endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgeReceipt {
    pub id: EntityId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default = "acknowledged_state")]
    pub state: AlarmState,
}

fn acknowledged_state() -> AlarmState {
    AlarmState::Acknowledged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_severity_and_state_survive_a_round_trip() {
        let raw = serde_json::json!({
            "id": 7,
            "severity": "UNKNOWN",
            "state": "SHELVED",
            "triggered_at": "2024-05-01T10:00:00+03:00"
        });
        let alarm: Alarm = serde_json::from_value(raw).unwrap();
        assert_eq!(alarm.severity, Severity::Other("UNKNOWN".into()));
        assert_eq!(alarm.severity.bucket(), None);
        assert_eq!(alarm.state, AlarmState::Other("SHELVED".into()));
        assert_eq!(alarm.triggered_at.to_rfc3339(), "2024-05-01T07:00:00+00:00");

        let back = serde_json::to_value(&alarm).unwrap();
        assert_eq!(back["severity"], "UNKNOWN");
        assert_eq!(back["state"], "SHELVED");
    }

    #[test]
    fn page_accepts_paginated_and_bare_arrays() {
        let paged: Page<TagHistoryPoint> = serde_json::from_str(
            r#"{"count": 1, "next": null, "previous": null,
                "results": [{"id": 1, "tag": 3, "value": 4.5, "quality": 100,
                             "timestamp": "2024-05-01T10:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(paged.count, Some(1));
        assert_eq!(paged.results[0].tag, 3);

        let bare: Page<TagHistoryPoint> = serde_json::from_str(
            r#"[{"id": 1, "tag": 3, "value": 4.5, "timestamp": "2024-05-01T10:00:00Z"},
                {"id": 2, "tag": 3, "value": 4.7, "timestamp": "2024-05-01T10:01:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(bare.count, Some(2));
        assert!(bare.next.is_none());
        assert_eq!(bare.results[1].value, 4.7);
    }

    #[test]
    fn tag_defaults_fill_descriptive_fields_only() {
        let tag: Tag =
            serde_json::from_str(r#"{"id": 1, "name": "PT-101", "min_value": 0, "max_value": 10}"#).unwrap();
        assert_eq!(tag.current_value, 0.0);
        assert!(tag.object_type_name.is_empty());
        assert!(tag.km_mark.is_none());

        // No range, no record: bounds are never made up.
        assert!(serde_json::from_str::<Tag>(r#"{"id": 1, "name": "PT-101", "current_value": 5.0}"#).is_err());
        assert!(serde_json::from_str::<Tag>(r#"{"id": 1, "name": "PT-101", "min_value": 0}"#).is_err());
    }

    #[test]
    fn alarm_requires_state_and_severity() {
        let without_state = serde_json::json!({
            "id": 5, "severity": "HIGH", "triggered_at": "2024-05-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<Alarm>(without_state).is_err());

        let without_severity = serde_json::json!({
            "id": 5, "state": "ACTIVE", "triggered_at": "2024-05-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<Alarm>(without_severity).is_err());
    }
}
