//! Short-lived cache for GET responses of the resource endpoints.
//!
//! Entries are keyed by method, full URI and the raw `Authorization` header,
//! so viewer-dependent fields are never served to another principal. Any
//! successful write drops every entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use moka::future::Cache;
use tracing::{debug, warn};

use crate::state::AppState;

const MAX_ENTRIES: u64 = 10_000;
const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

#[derive(Clone)]
struct CachedResponse {
    content_type: Option<HeaderValue>,
    body: Bytes,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, CachedResponse>,
    /// Bumped on every invalidation. A read that saw the cache change while
    /// it was running must not store its body.
    generation: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all();
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

fn cache_key(req: &Request) -> String {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    format!("{} {} {}", req.method(), req.uri(), auth)
}

pub async fn cache_reads(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        let response = next.run(req).await;
        if response.status().is_success() {
            state.cache.invalidate_all();
        }
        return response;
    }

    let key = cache_key(&req);
    if let Some(hit) = state.cache.inner.get(&key).await {
        debug!("Cache hit for {}", key);
        return hit.into_response();
    }

    let started = state.cache.generation();
    let response = next.run(req).await;
    if response.status() != StatusCode::OK || state.cache.generation() != started {
        return response;
    }

    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => {
            let entry = CachedResponse {
                content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
                body: bytes.clone(),
            };
            state.cache.inner.insert(key.clone(), entry).await;
            if state.cache.generation() != started {
                state.cache.inner.invalidate(&key).await;
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            warn!("Failed to buffer response for caching: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppStateInner, JwtSettings};
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use bazaar_db::Database;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt: JwtSettings {
                secret: "test-secret".into(),
                access_ttl: chrono::Duration::minutes(5),
                refresh_ttl: chrono::Duration::hours(24),
            },
            media_dir: std::env::temp_dir(),
            public_url: None,
            cache: ResponseCache::new(Duration::from_secs(60)),
        })
    }

    /// Each GET returns how many times the handler ran; the first call
    /// invalidates the cache mid-request, as a concurrent write would.
    fn counting_app(state: &AppState) -> Router {
        let hits = Arc::new(AtomicU64::new(0));
        let handler_state = state.clone();
        Router::new()
            .route(
                "/count",
                get(move || {
                    let hits = hits.clone();
                    let state = handler_state.clone();
                    async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            state.cache.invalidate_all();
                        }
                        n.to_string()
                    }
                }),
            )
            .layer(from_fn_with_state(state.clone(), cache_reads))
    }

    async fn get_count(app: &Router) -> String {
        let req = axum::http::Request::builder().uri("/count").body(Body::empty()).unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn read_overlapping_an_invalidation_is_not_stored() {
        let state = state();
        let app = counting_app(&state);

        assert_eq!(get_count(&app).await, "0");
        // Not cached: the handler runs again.
        assert_eq!(get_count(&app).await, "1");
        // Now cached.
        assert_eq!(get_count(&app).await, "1");
    }

    #[tokio::test]
    async fn invalidation_drops_stored_reads() {
        let state = state();
        let app = counting_app(&state);

        get_count(&app).await;
        assert_eq!(get_count(&app).await, "1");
        state.cache.invalidate_all();
        assert_eq!(get_count(&app).await, "2");
    }
}
