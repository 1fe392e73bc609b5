use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::core::{Config, Session, TablesConfig};
use crate::feed::{ApiError, SessionSource};

/// REST client for the backend's table API
#[derive(Debug, Clone)]
pub struct DataApiClient {
    rest_url: Url,
    anon_key: String,
    bearer_token: String,
    tables: TablesConfig,
    client: Client,
}

impl DataApiClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let rest_url = rest_base_url(&config.backend.url)
            .map_err(|e| anyhow!("Invalid backend url '{}': {}", config.backend.url, e))?;

        Ok(Self {
            rest_url,
            anon_key: config.backend.anon_key.clone(),
            bearer_token: config.bearer_token().to_string(),
            tables: config.tables.clone(),
            client,
        })
    }

    /// URL listing one tenant's sessions
    pub fn sessions_url(&self, tenant_id: &str) -> Result<Url, ApiError> {
        let mut url = self
            .rest_url
            .join(&self.tables.sessions)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair(&self.tables.tenant_column, &format!("eq.{}", tenant_id))
            .append_pair("order", &self.tables.order);
        Ok(url)
    }

    /// Check that the backend answers at all
    pub async fn is_reachable(&self) -> bool {
        self.client
            .get(self.rest_url.clone())
            .header("apikey", &self.anon_key)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    pub async fn fetch_sessions(&self, tenant_id: &str) -> Result<Vec<Session>, ApiError> {
        let url = self.sessions_url(tenant_id)?;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.bearer_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("GET {} response status: {}", self.tables.sessions, status);

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Session list failed with status {}: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_text = response.text().await?;
        let sessions: Vec<Session> = serde_json::from_str(&response_text)
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        for session in sessions.iter().filter(|s| !s.counts_consistent()) {
            tracing::warn!(
                "Session {} reports {} unread of {} messages",
                session.id,
                session.unread_count,
                session.message_count
            );
        }

        Ok(sessions)
    }
}

#[async_trait]
impl SessionSource for DataApiClient {
    async fn list_sessions(&self, tenant_id: &str) -> Result<Vec<Session>, ApiError> {
        self.fetch_sessions(tenant_id).await
    }
}

/// `{base}/rest/v1/`, keeping any path prefix of the base url
fn rest_base_url(base: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join("rest/v1/")
}
