// Portfolio API client with interceptors, deadlines and cancellation
// Author: kelexine (https://github.com/kelexine)

use super::dedupe::InflightRequests;
use super::interceptors::{
    AuthInterceptor, Navigator, RequestInterceptor, ResponseInterceptor, UnauthorizedInterceptor,
};
use super::{
    multipart, request_key, ApiRequest, ApiResponse, CancellationToken, Connectivity,
    NetworkStatus, RequestBody,
};
use crate::auth::TokenStore;
use crate::config::{ApiConfig, AuthConfig};
use crate::error::{ApiError, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Client for the portfolio REST API.
///
/// Every request:
/// - fails fast with `Offline` when connectivity reports offline
/// - runs the request interceptor chain
/// - races the transfer against its deadline and its cancellation scope
/// - runs the response interceptor chain
/// - maps non-2xx responses to `ApiError::Http`
///
/// Retrying is not built in; wrap calls with `utils::retry::with_retry`.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: Client,
    base_url: String,
    timeout: Duration,
    coalesce: bool,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    connectivity: Arc<dyn Connectivity>,
    inflight: InflightRequests,
    root_cancel: CancellationToken,
    sanitize_logs: bool,
}

pub struct ApiClientBuilder {
    config: ApiConfig,
    http_client: Option<Client>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    connectivity: Arc<dyn Connectivity>,
    sanitize_logs: bool,
}

impl ApiClientBuilder {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            config: config.clone(),
            http_client: None,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            connectivity: Arc::new(NetworkStatus::default()),
            sanitize_logs: true,
        }
    }

    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }

    /// Install the built-in bearer-token and 401 interceptors.
    pub fn with_auth(
        self,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        auth: &AuthConfig,
    ) -> Self {
        self.request_interceptor(Arc::new(AuthInterceptor::new(store.clone())))
            .response_interceptor(Arc::new(UnauthorizedInterceptor::new(
                store,
                navigator,
                auth.login_route.clone(),
            )))
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Use a preconfigured transport instead of building one from the config.
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn sanitize_logs(mut self, enabled: bool) -> Self {
        self.sanitize_logs = enabled;
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => Client::builder()
                .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .tcp_nodelay(true)
                .use_rustls_tls()
                .user_agent(concat!("estate-client/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| ApiError::Internal(format!("Failed to create HTTP client: {}", e)))?,
        };

        debug!("Created API client for {}", self.config.base_url);

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http_client,
                base_url: self.config.base_url.trim_end_matches('/').to_string(),
                timeout: Duration::from_millis(self.config.timeout_ms),
                coalesce: self.config.coalesce_requests,
                request_interceptors: self.request_interceptors,
                response_interceptors: self.response_interceptors,
                connectivity: self.connectivity,
                inflight: InflightRequests::default(),
                root_cancel: CancellationToken::new(),
                sanitize_logs: self.sanitize_logs,
            }),
        })
    }
}

impl ApiClient {
    pub fn builder(config: &ApiConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// A new cancellation scope. Cancelling it aborts only the requests that
    /// carry it; [`ApiClient::cancel_all`] aborts every scope.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.root_cancel.child_token()
    }

    /// Cancel every request issued through this client, now and later.
    pub fn cancel_all(&self) {
        warn!("Cancelling all requests on {}", self.inner.base_url);
        self.inner.root_cancel.cancel();
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::new(Method::POST, path).json(body)?)
            .await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::new(Method::PUT, path).json(body)?)
            .await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::new(Method::PATCH, path).json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::new(Method::DELETE, path)).await
    }

    /// POST a multipart form. No JSON content type is set, so the transport
    /// writes the multipart boundary itself.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, form: multipart::Form) -> Result<T> {
        self.send_json(ApiRequest::new(Method::POST, path).multipart(form))
            .await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        response.json().map_err(|e| {
            error!("Failed to decode response from {}: {}", response.url, e);
            e
        })
    }

    /// Run one request through the full pipeline and return the buffered response.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let method = request.method.clone();
        let start = Instant::now();
        let result = self.execute_inner(request).await;

        let outcome = match &result {
            Ok(_) => "succeeded",
            Err(ApiError::Http { .. }) => "http_error",
            Err(ApiError::Timeout { .. }) => "timed_out",
            Err(ApiError::Cancelled) => "cancelled",
            Err(ApiError::Offline(_)) => "offline",
            Err(_) => "failed",
        };
        crate::metrics::record_request(method.as_str(), outcome, start.elapsed().as_secs_f64());
        result
    }

    async fn execute_inner(&self, request: ApiRequest) -> Result<ApiResponse> {
        if !self.inner.connectivity.is_online() {
            return Err(ApiError::Offline(format!(
                "No connectivity, {} {} not sent",
                request.method, request.path
            )));
        }

        let mut request = request;
        for interceptor in &self.inner.request_interceptors {
            request = interceptor.intercept(request)?;
        }

        let deadline = request.timeout.unwrap_or(self.inner.timeout);
        let scope = request.cancel.take();
        if scope.as_ref().is_some_and(CancellationToken::is_cancelled)
            || self.inner.root_cancel.is_cancelled()
        {
            return Err(ApiError::Cancelled);
        }

        let url = self.resolve_url(&request.path);
        let method = request.method.clone();
        let transfer = self.dispatch(url.clone(), request);

        let root = self.inner.root_cancel.clone();
        let scope = scope.unwrap_or_else(|| root.clone());
        let response = tokio::select! {
            biased;
            _ = scope.cancelled() => {
                debug!("{} {} cancelled", method, url);
                return Err(ApiError::Cancelled);
            }
            _ = root.cancelled() => return Err(ApiError::Cancelled),
            result = tokio::time::timeout(deadline, transfer) => match result {
                Ok(response) => response?,
                Err(_) => {
                    warn!("{} {} timed out after {}ms", method, url, deadline.as_millis());
                    return Err(ApiError::Timeout {
                        timeout_ms: crate::cache::models::duration_ms(deadline),
                    });
                }
            },
        };

        let mut response = response;
        for interceptor in &self.inner.response_interceptors {
            response = interceptor.intercept(response)?;
        }

        if !response.is_success() {
            let err = classify_http_error(&response);
            let body = response.text();
            let body = if self.inner.sanitize_logs {
                crate::utils::logging::sanitize(&body)
            } else {
                body
            };
            debug!("{} {} failed: HTTP {} - {}", method, url, response.status, body);
            return Err(err);
        }

        Ok(response)
    }

    /// Start (or join) the network transfer for a prepared request.
    fn dispatch(&self, url: String, request: ApiRequest) -> BoxFuture<'static, Result<ApiResponse>> {
        let coalescable = self.inner.coalesce
            && matches!(request.method, Method::GET | Method::HEAD);
        let key = if coalescable {
            request_key(&request.method, &self.url_with_query(&url, &request.query), &request.body)
        } else {
            None
        };

        let http_client = self.inner.http_client.clone();
        let transfer = move || send(http_client, url, request).boxed();

        match key {
            Some(key) => {
                let method = key.split(' ').next().unwrap_or("GET").to_string();
                let (shared, joined) = self.inner.inflight.join_or_start(key, transfer);
                if joined {
                    debug!("Joined in-flight request ({} pending)", self.inner.inflight.len());
                    crate::metrics::record_coalesced(&method);
                }
                shared.boxed()
            }
            None => transfer(),
        }
    }

    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    fn url_with_query(&self, url: &str, query: &[(String, String)]) -> String {
        if query.is_empty() {
            return url.to_string();
        }
        let pairs: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", url, pairs.join("&"))
    }
}

/// Perform the transfer and buffer the body.
async fn send(http_client: Client, url: String, request: ApiRequest) -> Result<ApiResponse> {
    let request_id = uuid::Uuid::new_v4().to_string();
    debug!("{} {} [{}]", request.method, url, request_id);

    let mut builder = http_client
        .request(request.method.clone(), &url)
        .headers(request.headers.clone())
        .header(REQUEST_ID_HEADER, request_id.as_str());
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }

    builder = match request.body {
        RequestBody::Empty => with_json_content_type(builder, &request.headers),
        RequestBody::Json(value) => with_json_content_type(builder, &request.headers).json(&value),
        RequestBody::Multipart(form) => builder.multipart(form),
    };

    let response = builder.send().await.map_err(|e| {
        debug!("Transport failure for {}: {}", url, e);
        ApiError::from(e)
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let final_url = response.url().to_string();
    let body = response
        .bytes()
        .await
        .map_err(|e| ApiError::Network(format!("Failed to read response body: {}", e)))?;

    Ok(ApiResponse {
        status,
        headers,
        body,
        url: final_url,
    })
}

fn with_json_content_type(
    builder: reqwest::RequestBuilder,
    headers: &reqwest::header::HeaderMap,
) -> reqwest::RequestBuilder {
    if headers.contains_key(CONTENT_TYPE) {
        builder
    } else {
        builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }
}

/// Map a non-2xx response to `ApiError::Http`.
///
/// Understands `{code, message, details}` bodies, optionally nested under
/// `error`, and `{"error": "text"}`. Anything else falls back to the
/// canonical status text.
pub(crate) fn classify_http_error(response: &ApiResponse) -> ApiError {
    let status = response.status;
    let fallback = status
        .canonical_reason()
        .unwrap_or("Unknown status")
        .to_string();
    let default_code = format!("HTTP_{}", status.as_u16());

    let parsed: Option<serde_json::Value> = serde_json::from_slice(&response.body).ok();
    let Some(body) = parsed.filter(serde_json::Value::is_object) else {
        return ApiError::Http {
            status: status.as_u16(),
            code: default_code,
            message: fallback,
            details: None,
        };
    };

    let source = match body.get("error") {
        Some(inner) if inner.is_object() => inner,
        _ => &body,
    };

    let message = source
        .get("message")
        .and_then(|v| v.as_str())
        .or_else(|| body.get("error").and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or(fallback);
    let code = source
        .get("code")
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or(default_code);
    let details = source.get("details").cloned();

    ApiError::Http {
        status: status.as_u16(),
        code,
        message,
        details,
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("timeout", &self.inner.timeout)
            .field("coalesce", &self.inner.coalesce)
            .field("request_interceptors", &self.inner.request_interceptors.len())
            .field("response_interceptors", &self.inner.response_interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    fn response(status: u16, body: &'static str) -> ApiResponse {
        ApiResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            url: "http://api/estates".to_string(),
        }
    }

    #[test]
    fn test_classify_structured_error_body() {
        let err = classify_http_error(&response(
            409,
            r#"{"code":"ESTATE_EXISTS","message":"Estate already exists","details":{"id":"e1"}}"#,
        ));
        match err {
            ApiError::Http { status, code, message, details } => {
                assert_eq!(status, 409);
                assert_eq!(code, "ESTATE_EXISTS");
                assert_eq!(message, "Estate already exists");
                assert_eq!(details.unwrap()["id"], "e1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_classify_nested_error_body() {
        let err = classify_http_error(&response(
            400,
            r#"{"error":{"code":"VALIDATION","message":"name is required"}}"#,
        ));
        assert_eq!(err.code(), "VALIDATION");
        assert!(err.to_string().contains("name is required"));
    }

    #[test]
    fn test_classify_falls_back_to_status_text() {
        let err = classify_http_error(&response(503, "<html>upstream down</html>"));
        assert_eq!(err.code(), "HTTP_503");
        assert_eq!(err.status(), 503);
        assert!(err.to_string().contains("Service Unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_resolve_url() {
        let client = ApiClient::builder(&ApiConfig {
            base_url: "http://localhost:3001/api/".to_string(),
            ..ApiConfig::default()
        })
        .build()
        .unwrap();

        assert_eq!(client.resolve_url("/estates"), "http://localhost:3001/api/estates");
        assert_eq!(client.resolve_url("estates/e1"), "http://localhost:3001/api/estates/e1");
        assert_eq!(client.resolve_url("https://cdn.example.com/doc.pdf"), "https://cdn.example.com/doc.pdf");
    }
}
