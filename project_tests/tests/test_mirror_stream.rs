//! # Mirror End-to-End Tests
//!
//! A full `Mirror` fed by the mock REST server (snapshot) and the mock stream
//! server (pushes): upserts, malformed and unknown frames, the active alarm
//! subset, and the stale flag after a reconnect.

use std::time::Duration;

use lib_scada::core::{ConnectionState, StreamConfig};
use lib_scada::retrieve::HttpSnapshotChannel;
use lib_scada::stores::AckMode;
use lib_scada::{AlarmState, Mirror, MirrorConfig};
use project_tests::init_logging;
use project_tests::mock_http::MockHttpServer;
use project_tests::mock_stream::{MockStreamServer, ServerEvent};
use serde_json::json;

/// Polls `check` until it holds; panics after 5 s.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn tag_json(id: i64, value: f64) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("PT-{id}"),
        "engineering_units": "bar",
        "min_value": 0.0,
        "max_value": 100.0,
        "current_value": value,
        "current_quality": 192,
        "pipeline_object_name": "Compressor station 1",
        "object_type_name": "Compressor",
        "object_index": "CS-1",
        "km_mark": null
    })
}

fn alarm_json(id: i64, severity: &str, state: &str) -> serde_json::Value {
    json!({
        "id": id,
        "alarm_definition_name": "High pressure",
        "tag_name": "PT-1",
        "message": "Pressure above limit",
        "severity": severity,
        "state": state,
        "triggered_at": "2024-05-01T10:00:00+00:00",
        "acknowledged_at": null,
        "acknowledged_by": null
    })
}

fn snapshot_server() -> MockHttpServer {
    MockHttpServer::start(|req| match req.path() {
        "/api/tags/" => (
            200,
            json!({"count": 2, "next": null, "previous": null, "results": [tag_json(1, 50.0), tag_json(2, 97.0)]})
                .to_string(),
        ),
        "/api/alarms/" => (200, json!([alarm_json(10, "HIGH", "ACTIVE"), alarm_json(11, "LOW", "RESOLVED")]).to_string()),
        "/api/alarms/active/" => (200, json!({"items": [alarm_json(10, "HIGH", "ACTIVE")], "total": 1}).to_string()),
        _ => (404, json!({"detail": "Not found."}).to_string()),
    })
}

async fn connected_mirror(stream: &mut MockStreamServer) -> Mirror {
    let mirror = Mirror::with_stream(
        StreamConfig::new(stream.url()).with_reconnect_delay(Duration::from_millis(200)),
        AckMode::Confirmed,
    );
    assert_eq!(stream.next_event().await, ServerEvent::Connected(0));
    stream.frames(0, 2).await;
    mirror
}

#[tokio::test]
async fn snapshot_then_pushes() {
    init_logging();
    let http = snapshot_server();
    let mut stream = MockStreamServer::start().await;
    let mirror = connected_mirror(&mut stream).await;

    let channel = HttpSnapshotChannel::from_config(&MirrorConfig::new(&http.origin()).unwrap()).unwrap();
    let summary = mirror.load_snapshot(&channel).await.unwrap();
    assert_eq!((summary.tags, summary.alarms, summary.active_total), (2, 2, 1));
    assert_eq!(mirror.tags().critical_tags().len(), 1);

    // A new tag lands in front; a known one is replaced in place.
    stream.send(0, json!({"type": "tag_update", "data": tag_json(3, 5.0)}).to_string());
    stream.send(0, json!({"type": "tag_update", "data": tag_json(1, 51.5)}).to_string());
    eventually("tag pushes", || mirror.tags().get(1).is_some_and(|t| t.current_value == 51.5)).await;
    let ids: Vec<i64> = mirror.tags().tags().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
    assert_eq!(mirror.tags().critical_tags().len(), 2);

    // Flat payload form.
    let mut flat = alarm_json(12, "CRITICAL", "ACTIVE");
    flat["type"] = json!("alarm_update");
    stream.send(0, flat.to_string());
    eventually("new active alarm", || mirror.alarms().active_alarms().len() == 2).await;
    assert_eq!(mirror.alarms().active_alarms()[0].id, 12);

    stream.send(0, json!({"type": "alarm_update", "data": alarm_json(10, "HIGH", "RESOLVED")}).to_string());
    eventually("resolved alarm leaves the active subset", || {
        mirror.alarms().get(10).is_some_and(|a| a.state == AlarmState::Resolved)
    })
    .await;
    let active: Vec<i64> = mirror.alarms().active_alarms().iter().map(|a| a.id).collect();
    assert_eq!(active, vec![12]);
    assert_eq!(mirror.alarms().stats().active, 1);

    mirror.shutdown().await;
}

#[tokio::test]
async fn bad_frames_leave_the_stores_alone() {
    init_logging();
    let mut stream = MockStreamServer::start().await;
    let mirror = connected_mirror(&mut stream).await;
    let tags_before = mirror.tags().tags();
    let alarms_before = mirror.alarms().alarms();

    stream.send(0, "this is not json");
    stream.send(0, json!({"type": "tag_update", "data": {"name": "missing id"}}).to_string());
    stream.send(0, json!({"type": "alarm_update", "data": {"id": 4, "state": "ACTIVE"}}).to_string());
    stream.send(0, json!({"type": "weather_report", "data": {"id": 1}}).to_string());
    stream.send(0, json!({"type": "subscription_confirmed", "message": "ok"}).to_string());
    // Marker: processed in order after everything above.
    stream.send(0, json!({"type": "tag_update", "data": tag_json(99, 50.0)}).to_string());

    eventually("marker tag", || mirror.tags().get(99).is_some()).await;
    assert_eq!(mirror.tags().len(), tags_before.len() + 1);
    assert_eq!(mirror.alarms().alarms(), alarms_before);
    assert_eq!(mirror.connection().state(), ConnectionState::Connected);
    assert_eq!(mirror.connection().generation(), 1);

    mirror.shutdown().await;
}

#[tokio::test]
async fn reconnect_marks_the_mirror_stale() {
    init_logging();
    let mut stream = MockStreamServer::start().await;
    let mirror = connected_mirror(&mut stream).await;
    assert!(!mirror.take_stale());

    stream.close(0);
    loop {
        if stream.next_event().await == ServerEvent::Connected(1) {
            break;
        }
    }
    assert_eq!(stream.frames(1, 2).await.len(), 2);

    eventually("stale flag", || mirror.is_stale()).await;
    assert!(mirror.take_stale());
    assert!(!mirror.take_stale());

    // Pushes on the new connection still flow.
    stream.send(1, json!({"type": "tag_update", "data": tag_json(5, 10.0)}).to_string());
    eventually("push after reconnect", || mirror.tags().get(5).is_some()).await;

    mirror.shutdown().await;
}
