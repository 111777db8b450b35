//! Transport adapter for the NIBE Uplink API.
//!
//! - `RequestExecutor` turns a [`Request`] into one authenticated HTTP call,
//!   retries exactly once with a fresh token on 401, and classifies the
//!   response status.
//! - The HTTP stack and the token source are capabilities (`Transport`,
//!   `CredentialProvider`) so the scheduler can be driven without a network.
//! - `UreqTransport` is the production transport: blocking `ureq` on the
//!   tokio blocking pool.

use async_trait::async_trait;
use http::{Method, StatusCode};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::RequestError;
use crate::request::{Query, Request};

pub const DEFAULT_BASE_URL: &str = "https://api.nibeuplink.com/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully specified HTTP call handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Network failure below HTTP (DNS, connect, TLS, timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Source of bearer tokens. Acquisition and refresh flows live behind it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String, RequestError>;

    /// The last token was rejected; the next `token()` call must not return it.
    fn invalidate(&self) {}
}

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    timeout: Duration,
    /// Held for the whole exchange: at most one call is on the wire.
    in_flight: Mutex<()>,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        RequestExecutor {
            transport,
            credentials,
            base_url,
            timeout,
            in_flight: Mutex::new(()),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self, request: &Request, token: &str) -> HttpRequest {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", token)),
        ];
        if request.body().is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        HttpRequest {
            method: request.method(),
            url: self.url(&request.path()),
            query: flatten_query(request.query()),
            headers,
            body: request.body().map(str::to_string),
            timeout: self.timeout,
        }
    }

    async fn send_once(&self, request: &Request, token: &str) -> Result<HttpResponse, RequestError> {
        let http_request = self.build(request, token);
        match tokio::time::timeout(self.timeout, self.transport.send(http_request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(RequestError::Transport(e.0)),
            Err(_) => Err(RequestError::Transport(format!(
                "no response within {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }

    /// Execute one request and return the response body (`""` for 204).
    /// Concurrent callers are served one after the other.
    pub async fn execute(&self, request: &Request) -> Result<String, RequestError> {
        let _in_flight = self.in_flight.lock().await;
        let token = self.credentials.token().await?;
        let mut response = self.send_once(request, &token).await?;

        // retry once on 401 after forcing a fresh token
        if response.status == StatusCode::UNAUTHORIZED.as_u16() {
            debug!(
                "{} {} rejected with 401; retrying with a fresh token",
                request.method(),
                request.path()
            );
            self.credentials.invalidate();
            let token = self.credentials.token().await?;
            response = self.send_once(request, &token).await?;
        }

        let result = classify(response);
        if let Err(e) = &result
            && e.is_rate_limited()
        {
            warn!("Rate limited by the remote API on {} {}", request.method(), request.path());
        }
        result
    }
}

fn flatten_query(query: &Query) -> Vec<(String, String)> {
    query
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |v| (name.clone(), v.clone())))
        .collect()
}

/// Map an HTTP status to the request outcome.
pub fn classify(response: HttpResponse) -> Result<String, RequestError> {
    match response.status {
        200 => Ok(response.body),
        204 => Ok(String::new()),
        400 | 401 | 403 | 404 | 429 => Err(RequestError::Client {
            status: response.status,
            body: response.body,
        }),
        500..=504 => Err(RequestError::Server {
            status: response.status,
        }),
        status => Err(RequestError::Protocol { status }),
    }
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        UreqTransport { agent: config.into() }
    }

    fn send_blocking(agent: &ureq::Agent, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            query,
            headers,
            body,
            ..
        } = request;

        let response = match method {
            Method::GET => {
                let mut req = agent.get(&url);
                for (k, v) in &query {
                    req = req.query(k, v);
                }
                for (k, v) in &headers {
                    req = req.header(k, v);
                }
                req.call()
            }
            Method::PUT | Method::POST => {
                let mut req = if method == Method::PUT { agent.put(&url) } else { agent.post(&url) };
                for (k, v) in &query {
                    req = req.query(k, v);
                }
                for (k, v) in &headers {
                    req = req.header(k, v);
                }
                req.send(body.unwrap_or_default())
            }
            other => return Err(TransportError(format!("unsupported method {}", other))),
        };

        let mut response = response.map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| TransportError(format!("reading body failed: {}", e)))?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || Self::send_blocking(&agent, request))
            .await
            .map_err(|e| TransportError(format!("transport task failed: {}", e)))?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and counting credentials shared by the unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        pub sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn push(&self, status: u16, body: &str) {
            self.responses.lock().unwrap().push_back(Ok(HttpResponse {
                status,
                body: body.to_string(),
            }));
        }

        pub fn push_error(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(TransportError(message.to_string())));
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(request);
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            }))
        }
    }

    #[derive(Default)]
    pub struct CountingCredentials {
        pub fetches: AtomicUsize,
        pub invalidations: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingCredentials {
        async fn token(&self) -> Result<String, RequestError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}", n))
        }

        fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }
}
