//! # HTTP Snapshot Channel Integration Tests
//!
//! `HttpSnapshotChannel` against the local mock REST server: endpoint paths,
//! query strings, bearer token, page shapes, acknowledge body and the mapping
//! of error statuses.

use lib_scada::retrieve::HttpSnapshotChannel;
use lib_scada::stores::{AckMode, AlarmStore, TagStore};
use lib_scada::{AlarmQuery, AlarmState, HistoryWindow, MirrorConfig, MirrorError, SnapshotChannel, TagQuery};
use project_tests::init_logging;
use project_tests::mock_http::MockHttpServer;
use serde_json::json;

fn channel_for(server: &MockHttpServer, token: Option<&str>) -> HttpSnapshotChannel {
    let mut config = MirrorConfig::new(&server.origin()).unwrap();
    config.auth_token = token.map(str::to_string);
    HttpSnapshotChannel::from_config(&config).unwrap()
}

fn backend() -> MockHttpServer {
    MockHttpServer::start(|req| {
        match (req.method.as_str(), req.path()) {
            ("GET", "/api/tags/") => (
                200,
                json!({
                    "count": 1, "next": null, "previous": null,
                    "results": [{"id": 7, "name": "PT-7", "min_value": 0, "max_value": 10, "current_value": 9.5,
                                 "object_type_name": "Valve"}]
                })
                .to_string(),
            ),
            ("GET", "/api/tags/7/") => (200, json!({"id": 7, "name": "PT-7", "min_value": 0, "max_value": 10, "current_value": 4.0}).to_string()),
            ("GET", "/api/tag-values/") => (
                200,
                json!([
                    {"id": 1, "tag": 7, "value": 4.0, "quality": 192, "timestamp": "2024-05-01T10:00:00Z"},
                    {"id": 2, "tag": 7, "value": 4.5, "quality": 192, "timestamp": "2024-05-01T10:05:00Z"}
                ])
                .to_string(),
            ),
            ("GET", "/api/alarms/active/") => (200, json!({"items": [], "total": 0}).to_string()),
            ("GET", "/api/alarms/") => (
                200,
                json!([{"id": 3, "severity": "HIGH", "state": "ACTIVE", "triggered_at": "2024-05-01T10:00:00Z"}])
                    .to_string(),
            ),
            ("POST", "/api/alarms/3/acknowledge/") => (
                200,
                json!({
                    "id": 3, "message": "Alarm acknowledged successfully",
                    "acknowledged_at": "2024-05-01T12:30:00Z", "state": "ACKNOWLEDGED"
                })
                .to_string(),
            ),
            ("POST", "/api/alarms/4/acknowledge/") => (400, json!({"error": "Alarm is not active"}).to_string()),
            _ => (404, json!({"detail": "Not found."}).to_string()),
        }
    })
}

#[tokio::test]
async fn lists_send_filters_and_token() {
    init_logging();
    let server = backend();
    let channel = channel_for(&server, Some("secret-token"));

    let query = TagQuery {
        object_type: Some(2),
        page_size: Some(50),
        ..Default::default()
    };
    let page = channel.list_tags(&query).await.unwrap();
    assert_eq!(page.count, Some(1));
    assert_eq!(page.results[0].object_type_name, "Valve");

    let alarms = channel
        .list_alarms(&AlarmQuery {
            state: Some(AlarmState::Active),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alarms.results.len(), 1);

    let requests = server.requests();
    assert_eq!(requests[0].query(), "object_type=2&page_size=50");
    assert_eq!(requests[0].header("authorization"), Some("Bearer secret-token"));
    assert_eq!(requests[1].query(), "state=ACTIVE");
}

#[tokio::test]
async fn detail_history_and_acknowledge() {
    init_logging();
    let server = backend();
    let channel = channel_for(&server, None);

    assert_eq!(channel.get_tag(7).await.unwrap().current_value, 4.0);

    let history = channel.tag_history(7, &HistoryWindow::default()).await.unwrap();
    assert_eq!(history.len(), 2);
    let history_request = &server.requests()[1];
    assert!(history_request.query().starts_with("tag_id=7&start_time="));
    assert!(history_request.query().contains("&end_time="));
    assert!(history_request.header("authorization").is_none());

    let receipt = channel.acknowledge_alarm(3, 5).await.unwrap();
    assert_eq!(receipt.state, AlarmState::Acknowledged);
    let ack_request = server.requests().pop().unwrap();
    assert_eq!(ack_request.method, "POST");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&ack_request.body).unwrap(),
        json!({"acknowledged_by": 5})
    );

    assert_eq!(
        channel.acknowledge_alarm(4, 5).await,
        Err(MirrorError::remote(Some(400), "Alarm is not active"))
    );
    assert_eq!(channel.get_tag(8).await, Err(MirrorError::remote(Some(404), "Not found.")));
}

#[tokio::test]
async fn stores_drive_the_http_channel() {
    init_logging();
    let server = backend();
    let channel = channel_for(&server, Some("t"));
    let tags = TagStore::new();
    let alarms = AlarmStore::with_ack_mode(AckMode::Confirmed);

    assert_eq!(tags.fetch_tags(&channel, &TagQuery::default()).await, Ok(1));
    assert_eq!(tags.critical_tags().len(), 1);
    tags.fetch_tag(&channel, 7).await.unwrap();
    assert_eq!(tags.current_tag().map(|t| t.current_value), Some(4.0));
    // The detail view never touches the list.
    assert_eq!(tags.get(7).map(|t| t.current_value), Some(9.5));

    alarms.fetch_alarms(&channel, &AlarmQuery::default()).await.unwrap();
    assert_eq!(alarms.active_alarms().len(), 1);
    alarms.acknowledge(&channel, 3, 5).await.unwrap();
    let acked = alarms.get(3).unwrap();
    assert_eq!(acked.state, AlarmState::Acknowledged);
    assert!(acked.acknowledged_at.is_some());
    assert!(alarms.active_alarms().is_empty());
}

#[tokio::test]
async fn unauthorized_is_reported_as_such() {
    init_logging();
    let server = MockHttpServer::start(|_| (401, json!({"detail": "Authentication credentials were not provided."}).to_string()));
    let channel = channel_for(&server, Some("expired"));
    let tags = TagStore::new();

    assert_eq!(channel.active_alarms().await, Err(MirrorError::Unauthorized));
    assert_eq!(tags.fetch_tags(&channel, &TagQuery::default()).await, Err(MirrorError::Unauthorized));
    assert!(tags.is_empty());
    assert!(tags.error().is_some());
}
