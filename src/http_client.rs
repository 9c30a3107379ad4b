use anyhow::Context;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::ClientError;

/// Outgoing request as seen by the interceptor chain
///
/// Owned by the caller until handed to [`HttpClient::send`]. The body is kept as
/// JSON so the request can be cloned for a retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Endpoint path relative to the base URL, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,

    /// This request is itself the retry produced by a refresh
    pub retried: bool,

    /// A credential was attached by the request interceptor
    pub credential_bearing: bool,

    /// Credential store generation seen when the credential was attached
    pub observed_generation: Option<u64>,

    /// Whether an authentication failure on this request may trigger a refresh
    pub refreshable: bool,

    /// Short id used to correlate log lines
    pub request_id: String,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
            credential_bearing: false,
            observed_generation: None,
            refreshable: true,
            request_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        let value = serde_json::to_value(body).context("Failed to serialize request body")?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Session endpoints answer 401/403 on purpose; those answers must not start a refresh
    pub fn not_refreshable(mut self) -> Self {
        self.refreshable = false;
        self
    }
}

/// Response to a successful (2xx) request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ClientError::InvalidResponse(format!("Failed to parse response body: {}", e))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Handle returned on registration, used to remove an interceptor again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

/// Mutates requests before they are dispatched
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: &mut ApiRequest) -> Result<(), ClientError>;
}

/// Sees every outcome (success or failure) after it is received
///
/// May replace the outcome, including by re-issuing the request through `client`.
pub trait ResponseInterceptor: Send + Sync {
    fn on_response<'a>(
        &'a self,
        client: &'a HttpClient,
        request: &'a ApiRequest,
        outcome: Result<ApiResponse, ClientError>,
    ) -> BoxFuture<'a, Result<ApiResponse, ClientError>>;
}

type RequestChain = Vec<(InterceptorId, Arc<dyn RequestInterceptor>)>;
type ResponseChain = Vec<(InterceptorId, Arc<dyn ResponseInterceptor>)>;

/// The single HTTP client every backend call goes through
pub struct HttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Backend base URL
    base_url: Url,

    /// Cookie jar holding the long-lived refresh cookie
    cookies: Arc<Jar>,

    /// Applied before dispatch, in registration order
    request_interceptors: RwLock<RequestChain>,

    /// Applied after receive, in registration order
    response_interceptors: RwLock<ResponseChain>,

    next_id: AtomicU64,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: Url, connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let cookies = Arc::new(Jar::default());

        let client = Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            cookies,
            request_interceptors: RwLock::new(Vec::new()),
            response_interceptors: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Put an externally persisted cookie (e.g. `refresh_token=...`) into the jar
    pub fn seed_cookie(&self, cookie: &str) {
        self.cookies.add_cookie_str(cookie, &self.base_url);
    }

    pub async fn add_request_interceptor(
        &self,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> InterceptorId {
        let id = self.next_interceptor_id();
        self.request_interceptors.write().await.push((id, interceptor));
        id
    }

    pub async fn add_response_interceptor(
        &self,
        interceptor: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorId {
        let id = self.next_interceptor_id();
        self.response_interceptors.write().await.push((id, interceptor));
        id
    }

    /// Remove a request interceptor; requests already in flight keep their chain
    pub async fn remove_request_interceptor(&self, id: InterceptorId) -> bool {
        let mut chain = self.request_interceptors.write().await;
        let before = chain.len();
        chain.retain(|(existing, _)| *existing != id);
        chain.len() != before
    }

    /// Remove a response interceptor; requests already in flight keep their chain
    pub async fn remove_response_interceptor(&self, id: InterceptorId) -> bool {
        let mut chain = self.response_interceptors.write().await;
        let before = chain.len();
        chain.retain(|(existing, _)| *existing != id);
        chain.len() != before
    }

    fn next_interceptor_id(&self) -> InterceptorId {
        InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Send a request through both interceptor chains
    ///
    /// Fails with `Network` on transport errors and with a status-classified
    /// error on non-2xx responses, unless a response interceptor recovers.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        // Snapshot the chains so concurrent add/remove does not touch this request
        let request_chain: Vec<Arc<dyn RequestInterceptor>> = self
            .request_interceptors
            .read()
            .await
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect();
        let response_chain: Vec<Arc<dyn ResponseInterceptor>> = self
            .response_interceptors
            .read()
            .await
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect();

        for interceptor in &request_chain {
            interceptor.on_request(&mut request)?;
        }

        let mut outcome = self.dispatch(&request).await;

        for interceptor in &response_chain {
            outcome = interceptor.on_response(self, &request, outcome).await;
        }

        outcome
    }

    /// Execute one request on the wire, no interceptors
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.endpoint_url(&request.path)?;

        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            url = %url,
            retried = request.retried,
            credential_bearing = request.credential_bearing,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error_kind = ClientError::network_kind(&e),
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                return Err(ClientError::Network(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            tracing::debug!(
                request_id = %request.request_id,
                status = %status,
                "Request successful"
            );
            return Ok(ApiResponse {
                status,
                headers,
                body,
            });
        }

        let body_text = String::from_utf8_lossy(&body);
        let error = ClientError::from_status(status, &body_text);
        tracing::warn!(
            request_id = %request.request_id,
            status = status.as_u16(),
            url = %url,
            error = %error,
            "Received error response"
        );
        Err(error)
    }

    /// Resolve an endpoint path against the base URL
    fn endpoint_url(&self, path: &str) -> Result<Url, ClientError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .with_context(|| format!("Invalid request URL: {}", path))
                .map_err(ClientError::from);
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        Url::parse(&joined)
            .with_context(|| format!("Invalid request URL: {}", joined))
            .map_err(ClientError::from)
    }
}
