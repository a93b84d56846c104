// Portfolio API client module
// Author: kelexine (https://github.com/kelexine)

mod client;
pub mod connectivity;
mod dedupe;
pub mod interceptors;

pub use client::{ApiClient, ApiClientBuilder};
pub use connectivity::{Connectivity, NetworkStatus};
pub use interceptors::{
    AuthInterceptor, Navigator, RequestInterceptor, ResponseInterceptor, SessionRoute,
    UnauthorizedInterceptor,
};
pub use reqwest::multipart;
pub use reqwest::{Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Body of an outgoing request.
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// Sent without a JSON content type so the transport can set the multipart boundary.
    Multipart(multipart::Form),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            RequestBody::Multipart(_) => f.write_str("Multipart(..)"),
        }
    }
}

/// A request as seen by interceptors, before it is handed to the transport.
#[derive(Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, or an absolute URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Overrides the client-wide deadline.
    pub timeout: Option<Duration>,
    /// Cancellation scope for this request. Defaults to the client root scope.
    pub cancel: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, form: multipart::Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON. An empty body decodes as `null`, so `()` and
    /// `Option<T>` targets accept 204 responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Identity of a request for in-flight coalescing: method, full URL with
/// query, and a SHA-256 of the body. Multipart bodies are never coalesced.
pub(crate) fn request_key(method: &Method, url: &str, body: &RequestBody) -> Option<String> {
    let body_bytes = match body {
        RequestBody::Empty => Vec::new(),
        RequestBody::Json(value) => serde_json::to_vec(value).ok()?,
        RequestBody::Multipart(_) => return None,
    };

    let mut hasher = Sha256::new();
    hasher.update(&body_bytes);
    Some(format!(
        "{} {} {}",
        method,
        url,
        hex::encode(hasher.finalize())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_key_depends_on_body() {
        let url = "http://api/estates";
        let a = request_key(&Method::POST, url, &RequestBody::Json(json!({"name": "A"})));
        let b = request_key(&Method::POST, url, &RequestBody::Json(json!({"name": "B"})));
        let empty = request_key(&Method::GET, url, &RequestBody::Empty);

        assert_ne!(a, b);
        assert!(empty.unwrap().starts_with("GET http://api/estates "));
        assert!(request_key(&Method::POST, url, &RequestBody::Multipart(multipart::Form::new())).is_none());
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let response = ApiResponse {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: "http://api/estates/e1".to_string(),
        };
        let unit: () = response.json().unwrap();
        assert_eq!(unit, ());
        let maybe: Option<u32> = response.json().unwrap();
        assert!(maybe.is_none());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = ApiRequest::get("/estates").header("bad header", "x");
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
