//! Transport boundary for all HTTP I/O.
//!
//! The API client never talks to reqwest directly. It builds an
//! [`HttpRequest`], hands it to an [`HttpTransport`], and interprets the
//! [`HttpResponse`]. Tests swap in [`MockTransport`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Minimal HTTP method enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// HTTP headers represented as key/value pairs.
pub type HttpHeaders = Vec<(String, String)>;

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Build a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Get the first header value matching `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response body as lossy UTF-8, for error messages.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A real HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose every request is bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("herbarium/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (k, v) in request.headers {
            builder = builder.header(&k, &v);
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();

        let body = resp
            .bytes()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

// ---------- In-memory mock transport ----------

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory mock transport.
    ///
    /// No sockets, no loopback servers. Responses are queued per method + URL
    /// and returned in FIFO order; a queued `Err` simulates a transport failure.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<MockTransportInner>>,
    }

    #[derive(Default)]
    struct MockTransportInner {
        routes: HashMap<(HttpMethod, String), VecDeque<Result<HttpResponse, String>>>,
        requests: Vec<HttpRequest>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a JSON response with the given status.
        pub fn push_json(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            status: u16,
            body: &serde_json::Value,
        ) {
            let response = HttpResponse {
                status,
                body: body.to_string().into_bytes(),
            };
            self.push(method, url.into(), Ok(response));
        }

        /// Register a transport-level failure for a method + URL.
        pub fn push_transport_error(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            message: impl Into<String>,
        ) {
            self.push(method, url.into(), Err(message.into()));
        }

        fn push(&self, method: HttpMethod, url: String, entry: Result<HttpResponse, String>) {
            let mut inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");
            inner
                .routes
                .entry((method, url))
                .or_default()
                .push_back(entry);
        }

        #[must_use]
        pub fn requests(&self) -> Vec<HttpRequest> {
            let inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");
            inner.requests.clone()
        }

        /// Number of requests sent to `method` + `url`.
        #[must_use]
        pub fn count(&self, method: HttpMethod, url: &str) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.method == method && r.url == url)
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");

            let key = (request.method, request.url.clone());
            inner.requests.push(request);

            match inner.routes.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(message)) => Err(HttpError::Transport(message)),
                None => Err(HttpError::NoMockResponse {
                    method: key.0.as_str().to_string(),
                    url: key.1,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_get_is_case_insensitive_and_returns_first_match() {
        let headers: HttpHeaders = vec![
            ("Authorization".to_string(), "Bearer a".to_string()),
            ("authorization".to_string(), "Bearer b".to_string()),
        ];
        assert_eq!(header_get(&headers, "AUTHORIZATION"), Some("Bearer a"));
        assert_eq!(header_get(&headers, "missing"), None);
    }

    #[test]
    fn http_method_as_str_matches_expected_values() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }

    #[test]
    fn response_success_range() {
        let mut resp = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        assert!(resp.is_success());
        resp.status = 422;
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn mock_transport_replays_queue_in_order_and_records_requests() {
        let transport = MockTransport::new();
        let url = "https://example.com/api";

        transport.push_transport_error(HttpMethod::Get, url, "connection reset");
        transport.push_json(HttpMethod::Get, url, 200, &serde_json::json!({"ok": true}));

        let first = transport
            .send(HttpRequest::new(HttpMethod::Get, url))
            .await
            .expect_err("first entry is a transport error");
        assert!(matches!(first, HttpError::Transport(ref m) if m == "connection reset"));

        let second = transport
            .send(HttpRequest::new(HttpMethod::Get, url))
            .await
            .expect("second entry is a response");
        assert_eq!(second.status, 200);
        assert_eq!(second.body_text(), r#"{"ok":true}"#);

        assert_eq!(transport.count(HttpMethod::Get, url), 2);
    }

    #[tokio::test]
    async fn mock_transport_errors_when_no_response_is_registered() {
        let transport = MockTransport::new();
        let err = transport
            .send(HttpRequest::new(HttpMethod::Delete, "https://example.com/x"))
            .await
            .expect_err("missing mock should error");
        match err {
            HttpError::NoMockResponse { method, url } => {
                assert_eq!(method, "DELETE");
                assert_eq!(url, "https://example.com/x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reqwest_transport_with_timeout_builds_client() {
        let transport = ReqwestTransport::with_timeout(Duration::from_secs(30))
            .expect("reqwest transport should build");
        let _ = transport;
    }
}
