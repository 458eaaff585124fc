//! REST implementation of [`SnapshotChannel`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::configs::MirrorConfig;
use crate::error::Result;
use crate::models::{
    AcknowledgeReceipt, ActiveAlarms, Alarm, EntityId, Page, Tag, TagHistoryPoint,
};
use crate::retrieve::ky_http::ApiClient;
use crate::snapshot::{AlarmQuery, HistoryWindow, SnapshotChannel, TagQuery};

#[derive(Serialize)]
struct HistoryParams {
    tag_id: EntityId,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct AcknowledgeBody {
    acknowledged_by: EntityId,
}

/// Snapshot channel over the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpSnapshotChannel {
    client: ApiClient,
}

impl HttpSnapshotChannel {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Builds the client from the mirror configuration.
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let client = ApiClient::new(
            config.api_base_url()?,
            config.auth_token.clone(),
            config.request_timeout,
        )?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

impl SnapshotChannel for HttpSnapshotChannel {
    async fn list_tags(&self, query: &TagQuery) -> Result<Page<Tag>> {
        self.client.get("tags/", Some(query)).await
    }

    async fn get_tag(&self, id: EntityId) -> Result<Tag> {
        self.client.get::<Tag, ()>(&format!("tags/{id}/"), None).await
    }

    async fn tag_history(&self, tag_id: EntityId, window: &HistoryWindow) -> Result<Vec<TagHistoryPoint>> {
        let params = HistoryParams {
            tag_id,
            start_time: window.start,
            end_time: window.end,
        };
        let page: Page<TagHistoryPoint> = self.client.get("tag-values/", Some(&params)).await?;
        Ok(page.results)
    }

    async fn list_alarms(&self, query: &AlarmQuery) -> Result<Page<Alarm>> {
        self.client.get("alarms/", Some(query)).await
    }

    async fn active_alarms(&self) -> Result<ActiveAlarms> {
        self.client.get::<ActiveAlarms, ()>("alarms/active/", None).await
    }

    async fn acknowledge_alarm(&self, id: EntityId, actor: EntityId) -> Result<AcknowledgeReceipt> {
        let body = AcknowledgeBody { acknowledged_by: actor };
        log::info!("Acknowledging alarm {} as user {}", id, actor);
        self.client
            .post(&format!("alarms/{id}/acknowledge/"), &body)
            .await
    }
}
