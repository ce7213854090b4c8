pub mod token_cache;

pub use token_cache::{PostgresTokenCacheManager, TokenCacheManager, TokenUpdateGuard};

use reqwest::{Client, StatusCode};
use reportbot_shared::domain::user::AccessData;
use reportbot_shared::domain::{Group, Groups, GroupedReports, PagesContainer, Report};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

const REPORTS_URI: &str = "/reports";
const GROUPS_URI: &str = "/groups";

#[derive(Debug, Error)]
pub enum PowerBiError {
    #[error("report not found")]
    NotFound,
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),
    #[error("unexpected status code: {0}")]
    UnexpectedStatusCode(u16),
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("couldn't decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token cache error: {0}")]
    TokenCache(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl AccessData for AccessTokenPair {
    fn access_token(&self) -> &str {
        &self.access_token
    }

    fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

#[derive(Debug, Clone)]
pub struct PowerBiClientConfig {
    pub api_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Power BI REST client with transparent token refresh. Every read goes
/// through [`execute_http_request`](Self::execute_http_request), which on a
/// `403` refreshes the cached token exactly once and retries (see
/// DESIGN.md's Open Question 3 for the content-type check this corrects).
/// The refresh call and the cache write it feeds are done under one
/// per-consumer lock ([`TokenCacheManager::lock`]), so two concurrent 403s
/// for the same consumer can't each independently hit the refresh endpoint.
pub struct ServiceClient {
    http: Client,
    config: PowerBiClientConfig,
    token_cache: std::sync::Arc<dyn TokenCacheManager>,
}

/// "My Workspace" has no group id in the Power BI API; reports fetched
/// from the bare `/reports` endpoint are attributed to this sentinel group.
pub fn my_workspace_group() -> Group {
    Group {
        id: String::new(),
        name: "My Workspace".to_string(),
    }
}

impl ServiceClient {
    pub fn new(
        config: PowerBiClientConfig,
        token_cache: std::sync::Arc<dyn TokenCacheManager>,
    ) -> Self {
        Self {
            http: Client::new(),
            config,
            token_cache,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_report(
        &self,
        consumer_id: &str,
        report_id: &str,
    ) -> Result<Report, PowerBiError> {
        let body = self
            .get(consumer_id, &format!("{REPORTS_URI}/{report_id}"))
            .await?;
        serde_json::from_str(&body).map_err(PowerBiError::from)
    }

    /// Fetches a report using a caller-supplied access token instead of one
    /// looked up from the cache — the Teams delivery path has no local user
    /// row to key a cache entry on, only the token embedded in the queue
    /// message. A `403` here is a hard failure rather than a refresh
    /// opportunity: there's no consumer id to persist a refreshed token
    /// against.
    #[instrument(skip(self, access_token))]
    pub async fn get_report_with_token(
        &self,
        access_token: &str,
        report_id: &str,
    ) -> Result<Report, PowerBiError> {
        if access_token.is_empty() {
            return Err(PowerBiError::NotFound);
        }
        let access_data = AccessTokenPair {
            access_token: access_token.to_string(),
            refresh_token: String::new(),
        };
        let body = self
            .execute_http_request("", &format!("{REPORTS_URI}/{report_id}"), access_data, false)
            .await?;
        serde_json::from_str(&body).map_err(PowerBiError::from)
    }

    #[instrument(skip(self))]
    pub async fn get_reports(&self, consumer_id: &str) -> Result<Vec<Report>, PowerBiError> {
        self.get_reports_at(consumer_id, REPORTS_URI).await
    }

    #[instrument(skip(self))]
    pub async fn get_groups(&self, consumer_id: &str) -> Result<Groups, PowerBiError> {
        let body = self.get(consumer_id, GROUPS_URI).await?;
        serde_json::from_str(&body).map_err(PowerBiError::from)
    }

    #[instrument(skip(self))]
    pub async fn get_reports_in_group(
        &self,
        consumer_id: &str,
        group_id: &str,
    ) -> Result<Vec<Report>, PowerBiError> {
        self.get_reports_at(consumer_id, &format!("{GROUPS_URI}/{group_id}{REPORTS_URI}"))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_pages(
        &self,
        consumer_id: &str,
        report_id: &str,
    ) -> Result<PagesContainer, PowerBiError> {
        let body = self
            .get(consumer_id, &format!("{REPORTS_URI}/{report_id}/pages"))
            .await?;
        serde_json::from_str(&body).map_err(PowerBiError::from)
    }

    async fn get_reports_at(
        &self,
        consumer_id: &str,
        uri: &str,
    ) -> Result<Vec<Report>, PowerBiError> {
        #[derive(Deserialize)]
        struct Container {
            value: Vec<Report>,
        }
        let body = self.get(consumer_id, uri).await?;
        let container: Container = serde_json::from_str(&body)?;
        Ok(container.value)
    }

    /// Fetches "My Workspace" reports and every group's reports in
    /// parallel, the Rust analog of `GetGroupedReports` (two top-level
    /// goroutines, one fanning out a further goroutine per
    /// group). `tokio::try_join!` plays the role of the first
    /// `sync.WaitGroup`; the per-group fan-out uses `futures`-free
    /// `tokio::spawn` + join since only `reqwest`/`tokio` are in the
    /// dependency stack here.
    #[instrument(skip(self))]
    pub async fn get_grouped_reports(
        &self,
        consumer_id: &str,
    ) -> Result<GroupedReports, PowerBiError> {
        let my_workspace_fut = self.get_reports(consumer_id);
        let groups_fut = self.get_groups(consumer_id);

        let (my_reports, groups) = tokio::try_join!(my_workspace_fut, groups_fut)?;

        let mut result = GroupedReports::default();
        if !my_reports.is_empty() {
            result.groups.push((my_workspace_group(), my_reports));
        }

        let mut handles = Vec::with_capacity(groups.value.len());
        for group in groups.value {
            let consumer_id = consumer_id.to_string();
            let client = self.clone_for_task();
            handles.push(tokio::spawn(async move {
                let reports = client.get_reports_in_group(&consumer_id, &group.id).await;
                (group, reports)
            }));
        }

        for handle in handles {
            let (group, reports) = handle
                .await
                .map_err(|e| PowerBiError::TokenCache(format!("group fetch task panicked: {e}")))?;
            let reports = reports?;
            if !reports.is_empty() {
                result.groups.push((group, reports));
            }
        }

        Ok(result)
    }

    fn clone_for_task(&self) -> ServiceClient {
        ServiceClient {
            http: self.http.clone(),
            config: self.config.clone(),
            token_cache: self.token_cache.clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
    ) -> Result<AccessTokenPair, PowerBiError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let res = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        check_content_type(&res)?;
        let status = res.status();
        if status != StatusCode::OK {
            return Err(PowerBiError::UnexpectedStatusCode(status.as_u16()));
        }

        res.json::<AccessTokenPair>().await.map_err(PowerBiError::from)
    }

    async fn get(&self, consumer_id: &str, resource: &str) -> Result<String, PowerBiError> {
        let access_data = self
            .token_cache
            .get(consumer_id)
            .await
            .map_err(PowerBiError::TokenCache)?;

        if access_data.access_token().is_empty() {
            return Err(PowerBiError::NotFound);
        }

        self.execute_http_request(consumer_id, resource, access_data, true).await
    }

    /// A single-level refresh-and-retry on `403`: `refresh_token_if_needed`
    /// is `false` on the retried call so a request never retries twice.
    async fn execute_http_request(
        &self,
        consumer_id: &str,
        resource: &str,
        access_data: AccessTokenPair,
        refresh_token_if_needed: bool,
    ) -> Result<String, PowerBiError> {
        let res = self
            .http
            .get(format!("{}{resource}", self.config.api_url))
            .bearer_auth(&access_data.access_token)
            .send()
            .await?;

        check_content_type(&res)?;

        let status = res.status();
        if status != StatusCode::OK {
            if status != StatusCode::FORBIDDEN || !refresh_token_if_needed {
                return Err(PowerBiError::UnexpectedStatusCode(status.as_u16()));
            }

            let new_access_data = {
                let _guard = self.token_cache.lock(consumer_id).await;
                let new_access_data = self.refresh_tokens(&access_data.refresh_token).await?;
                self.token_cache
                    .update(consumer_id, &new_access_data)
                    .await
                    .map_err(PowerBiError::TokenCache)?;
                new_access_data
            };

            // Box the recursive retry call since async fns can't
            // recurse directly without indirection.
            return Box::pin(self.execute_http_request(consumer_id, resource, new_access_data, false))
                .await;
        }

        res.text().await.map_err(PowerBiError::from)
    }
}

/// Errors when the response is NOT JSON on the happy path (see DESIGN.md's
/// Open Question 3: the inverted form of this check, erroring when the
/// content type *was* JSON, would reject every successful response).
fn check_content_type(res: &reqwest::Response) -> Result<(), PowerBiError> {
    let content_type = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.contains("application/json") {
        return Err(PowerBiError::UnexpectedContentType(content_type.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn my_workspace_group_has_empty_id() {
        let g = my_workspace_group();
        assert_eq!(g.id, "");
        assert_eq!(g.name, "My Workspace");
    }
}
