//! REST transport over reqwest.

use super::{DatabaseMetadata, DeltaPage, SnapshotResponse, Transport, TransportResult};
use crate::config::{ClientConfig, Context};
use crate::error::TransportError;
use async_trait::async_trait;
use datasync_engine::{DeltaRequest, Revision};
use reqwest::header::{AUTHORIZATION, IF_MATCH};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct PostDeltaResponse {
    revision: Revision,
}

/// Transport for the datasync REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::no_response(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn database_url(&self, context: Context, database_id: &str) -> String {
        format!("{}/{}/databases/{}", self.base_url, context, database_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("OAuth {}", token)),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> TransportResult<T> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TransportError::no_response(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), %message, "Request failed");
            return Err(TransportError::new(status.as_u16(), message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::no_response(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_metadata(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata> {
        let url = self.database_url(context, database_id);
        self.send(self.client.get(url)).await
    }

    async fn create_database(
        &self,
        context: Context,
        database_id: &str,
    ) -> TransportResult<DatabaseMetadata> {
        let url = self.database_url(context, database_id);
        self.send(self.client.put(url)).await
    }

    async fn get_snapshot(
        &self,
        context: Context,
        database_id: &str,
        collection_id: Option<&str>,
    ) -> TransportResult<SnapshotResponse> {
        let url = format!("{}/snapshot", self.database_url(context, database_id));
        let mut request = self.client.get(url);
        if let Some(collection_id) = collection_id {
            request = request.query(&[("collection_id", collection_id)]);
        }
        self.send(request).await
    }

    async fn get_deltas(
        &self,
        context: Context,
        database_id: &str,
        base_revision: Revision,
        limit: u32,
    ) -> TransportResult<DeltaPage> {
        let url = format!("{}/deltas", self.database_url(context, database_id));
        let request = self.client.get(url).query(&[
            ("base_revision", base_revision.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send(request).await
    }

    async fn post_delta(
        &self,
        context: Context,
        database_id: &str,
        delta: &DeltaRequest,
    ) -> TransportResult<Revision> {
        let url = format!("{}/deltas", self.database_url(context, database_id));
        let request = self
            .client
            .post(url)
            .header(IF_MATCH, delta.base_revision.to_string())
            .json(delta);
        let response: PostDeltaResponse = self.send(request).await?;
        Ok(response.revision)
    }
}
