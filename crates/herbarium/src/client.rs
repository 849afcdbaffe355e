//! iNaturalist v1 API client.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::progress::ProgressCallback;
use crate::rate_limit::ApiRateLimiter;
use crate::record::ResultsPage;
use crate::retry::{RetryConfig, RetryingFetcher};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.inaturalist.org/v1";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the optional bearer token.
pub const TOKEN_ENV_VAR: &str = "INAT_API_TOKEN";

/// Client settings, usually filled from the CLI configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_requests_per_minute: usize,
    pub page_size: u32,
    pub retry: RetryConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            max_requests_per_minute: crate::rate_limit::rate_limits::DEFAULT_MAX_REQUESTS,
            page_size: crate::pagination::DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

/// iNaturalist API client.
///
/// Reads go through the [`RetryingFetcher`]; writes are rate limited but
/// issued once, so a rejected add or remove surfaces to the caller as a
/// per-record failure.
#[derive(Clone)]
pub struct InatClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    token: Option<String>,
    page_size: u32,
    fetcher: RetryingFetcher,
}

impl InatClient {
    /// Create a client backed by reqwest.
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::with_timeout(options.timeout)?;
        Ok(Self::new_with_transport(options, Arc::new(transport)))
    }

    pub fn new_with_transport(options: ClientOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let limiter = Arc::new(ApiRateLimiter::per_minute(options.max_requests_per_minute));
        let token = options.token.filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::debug!("No API token configured; requests are unauthenticated");
        }
        Self {
            transport,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            token,
            page_size: options.page_size.max(1),
            fetcher: RetryingFetcher::new(limiter, options.retry),
        }
    }

    /// Records requested per list page.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn limiter(&self) -> &Arc<ApiRateLimiter> {
        self.fetcher.limiter()
    }

    /// Build `{base}/{path}?{params}` with proper query encoding.
    pub fn endpoint(&self, path: &str, params: &[(String, String)]) -> Result<String, ApiError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url.into())
    }

    fn request(&self, method: HttpMethod, url: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, url);
        request
            .headers
            .push(("Accept".to_string(), "application/json".to_string()));
        if let Some(token) = &self.token {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        request
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::Status {
                status: response.status,
                body: response.body_text(),
            });
        }
        Ok(response)
    }

    /// One GET attempt, no retry.
    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(HttpMethod::Get, url)).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Fetch one page of a list endpoint with rate limiting and retry.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<ResultsPage<T>, ApiError> {
        self.fetcher
            .fetch(url, || self.get_once::<ResultsPage<T>>(url), on_progress)
            .await
    }

    /// Add an observation to a project.
    pub async fn add_to_project(
        &self,
        project_id: u64,
        observation_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint("project_observations", &[])?;
        let body = serde_json::json!({
            "project_observation": {
                "project_id": project_id,
                "observation_id": observation_id,
            }
        });

        let mut request = self.request(HttpMethod::Post, &url);
        request
            .headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        request.body = serde_json::to_vec(&body)?;

        self.limiter().acquire(on_progress).await;
        self.send(request).await?;
        Ok(())
    }

    /// Delete a project membership link.
    pub async fn remove_project_observation(
        &self,
        link_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("project_observations/{link_id}"), &[])?;
        self.limiter().acquire(on_progress).await;
        self.send(self.request(HttpMethod::Delete, &url)).await?;
        Ok(())
    }
}
