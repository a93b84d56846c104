//! Request and response interceptor chains.
//!
//! Request interceptors run in registration order before dispatch; response
//! interceptors run in registration order on every received response,
//! success or not, before status classification.
//!
//! Two interceptors ship with the client:
//! - [`AuthInterceptor`] attaches the stored bearer token.
//! - [`UnauthorizedInterceptor`] reacts to 401 by clearing the token and
//!   sending the session to the login route, unless it is already there.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::{ApiRequest, ApiResponse};
use crate::auth::TokenStore;
use crate::error::Result;
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: ApiRequest) -> Result<ApiRequest>;
}

pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: ApiResponse) -> Result<ApiResponse>;
}

/// Where the session currently is, and how to move it.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;
    fn navigate(&self, route: &str);
}

/// In-process session route tracker.
#[derive(Debug)]
pub struct SessionRoute {
    route: RwLock<String>,
    navigations: AtomicUsize,
}

impl SessionRoute {
    pub fn new(initial_route: impl Into<String>) -> Self {
        Self {
            route: RwLock::new(initial_route.into()),
            navigations: AtomicUsize::new(0),
        }
    }

    /// Number of navigations performed so far.
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

impl Navigator for SessionRoute {
    fn current_route(&self) -> String {
        self.route.read().clone()
    }

    fn navigate(&self, route: &str) {
        info!("Navigating session to {}", route);
        *self.route.write() = route.to_string();
        self.navigations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Injects `Authorization: Bearer <token>` from the token store.
///
/// An explicit `Authorization` header on the request wins.
pub struct AuthInterceptor {
    store: Arc<dyn TokenStore>,
}

impl AuthInterceptor {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl RequestInterceptor for AuthInterceptor {
    fn intercept(&self, mut request: ApiRequest) -> Result<ApiRequest> {
        if request.headers.contains_key(AUTHORIZATION) {
            return Ok(request);
        }

        match self.store.load() {
            Ok(Some(token)) => {
                let mut value = HeaderValue::from_str(&token.bearer()).map_err(|e| {
                    crate::error::ApiError::InvalidRequest(format!(
                        "Stored token is not a valid header value: {}",
                        e
                    ))
                })?;
                value.set_sensitive(true);
                request.headers.insert(AUTHORIZATION, value);
            }
            Ok(None) => debug!("No auth token stored, sending {} unauthenticated", request.path),
            // A broken store must not block public endpoints.
            Err(e) => warn!("Failed to read auth token: {}", e),
        }
        Ok(request)
    }
}

/// On 401: clear the stored token and navigate to the login route.
pub struct UnauthorizedInterceptor {
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

impl UnauthorizedInterceptor {
    pub fn new(
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            login_route: login_route.into(),
        }
    }
}

impl ResponseInterceptor for UnauthorizedInterceptor {
    fn intercept(&self, response: ApiResponse) -> Result<ApiResponse> {
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Received 401 from {}, clearing session token", response.url);
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear auth token: {}", e);
        }
        crate::metrics::record_auth_event("token_cleared");

        if self.navigator.current_route() != self.login_route {
            self.navigator.navigate(&self.login_route);
            crate::metrics::record_auth_event("login_redirect");
        } else {
            debug!("Already on {}, not redirecting again", self.login_route);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthToken, MemoryTokenStore};
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    fn response(status: StatusCode) -> ApiResponse {
        ApiResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: "http://api/estates".to_string(),
        }
    }

    #[test]
    fn test_auth_interceptor_injects_bearer() {
        let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("tok")));
        let request = AuthInterceptor::new(store)
            .intercept(ApiRequest::get("/estates"))
            .unwrap();

        assert_eq!(request.headers[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn test_auth_interceptor_keeps_explicit_header() {
        let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("tok")));
        let request = ApiRequest::get("/estates")
            .header("authorization", "Bearer other")
            .unwrap();
        let request = AuthInterceptor::new(store).intercept(request).unwrap();

        assert_eq!(request.headers[AUTHORIZATION], "Bearer other");
    }

    #[test]
    fn test_auth_interceptor_without_token() {
        let request = AuthInterceptor::new(Arc::new(MemoryTokenStore::new()))
            .intercept(ApiRequest::get("/estates"))
            .unwrap();
        assert!(!request.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_unauthorized_redirects_once() {
        let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("expired")));
        let route = Arc::new(SessionRoute::new("/estates"));
        let interceptor = UnauthorizedInterceptor::new(store.clone(), route.clone(), "/login");

        interceptor.intercept(response(StatusCode::UNAUTHORIZED)).unwrap();
        interceptor.intercept(response(StatusCode::UNAUTHORIZED)).unwrap();

        assert!(store.load().unwrap().is_none());
        assert_eq!(route.current_route(), "/login");
        assert_eq!(route.navigations(), 1);
    }

    #[test]
    fn test_other_statuses_pass_through() {
        let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("tok")));
        let route = Arc::new(SessionRoute::new("/"));
        let interceptor = UnauthorizedInterceptor::new(store.clone(), route.clone(), "/login");

        interceptor.intercept(response(StatusCode::FORBIDDEN)).unwrap();
        assert!(store.load().unwrap().is_some());
        assert_eq!(route.navigations(), 0);
    }
}
