//! # Remote Client
//!
//! HTTP client used by the local instance to talk to its cloud replica.
//! Every request carries `Authorization: SyncToken <secret>` and is bounded
//! by the configured timeout.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::AUTHORIZATION;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::auth::SYNC_TOKEN_SCHEME;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{MasterDataResponse, PushPayload, ReceiveResponse};

/// Longest slice of a rejected body kept in the error.
const MAX_ERROR_BODY: usize = 500;

#[derive(Clone)]
pub struct RemoteClient {
    base_url: Url,
    secret: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url.as_str())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl RemoteClient {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> SyncResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(RemoteClient {
            base_url,
            secret: secret.to_string(),
            client,
        })
    }

    /// Builds the client from the remote section of the config.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let url = config.remote_url().ok_or(SyncError::NotConfigured("Remote URL"))?;
        let secret = config
            .shared_secret()
            .ok_or(SyncError::NotConfigured("Shared secret"))?;
        Self::new(url, secret, config.timeout())
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn credential(&self) -> String {
        format!("{} {}", SYNC_TOKEN_SCHEME, self.secret)
    }

    /// `POST /sync/receive`. Any non-2xx answer is an error.
    pub async fn push(&self, payload: &PushPayload) -> SyncResult<ReceiveResponse> {
        let url = self.endpoint("sync/receive")?;
        debug!(%url, sales = payload.sales.len(), returns = payload.returns.len(), "Pushing");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.credential())
            .json(payload)
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(response.json::<ReceiveResponse>().await?)
    }

    /// `GET /sync/master-data?since=`.
    pub async fn master_data(&self, since: Option<DateTime<Utc>>) -> SyncResult<MasterDataResponse> {
        let url = self.endpoint("sync/master-data")?;
        debug!(%url, ?since, "Fetching master data");

        let mut request = self.client.get(url).header(AUTHORIZATION, self.credential());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::AutoSi, true))]);
        }

        let response = ensure_success(request.send().await?).await?;
        Ok(response.json::<MasterDataResponse>().await?)
    }
}

async fn ensure_success(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::RemoteRejected {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}
