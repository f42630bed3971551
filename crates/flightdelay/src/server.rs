//! HTTP front end for the lookup service.
//!
//! Routes:
//! - `POST /lookup` runs one lookup
//! - `POST /register` issues a new identity
//! - `GET /health` reports liveness
//!
//! Any origin may call the API. Each lookup runs on its own task, so a
//! caller that disconnects early does not cancel the cache write or the
//! usage count.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lookup::{Lookup, LookupError, LookupRequest, LookupResponse, RegisterResponse};
use crate::storage::Storage;
use crate::upstream::HistoryClient;

#[derive(Clone)]
struct AppState {
    lookup: Lookup,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
}

/// A [`LookupError`] on its way to the caller.
#[derive(Debug)]
struct ApiError(LookupError);

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.0.code(), self.0);
        } else {
            debug!("Request refused ({}): {}", self.0.code(), self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

/// Build the application router around `lookup`.
#[must_use]
pub fn router(lookup: Lookup) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/lookup", post(lookup_flight))
        .route("/register", post(register))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { lookup })
}

async fn lookup_flight(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LookupRequest>, JsonRejection>,
) -> std::result::Result<Json<LookupResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!("Unreadable lookup body: {}", rejection);
        LookupError::MissingFields
    })?;

    let lookup = state.lookup.clone();
    let task = tokio::spawn(async move { lookup.handle(&request).await });
    let response = task
        .await
        .map_err(|e| LookupError::Storage(Error::internal(format!("lookup task failed: {e}"))))??;

    Ok(Json(response))
}

async fn register(
    State(state): State<AppState>,
) -> std::result::Result<Json<RegisterResponse>, ApiError> {
    Ok(Json(state.lookup.register(Utc::now()).await?))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Periodically delete stale cache entries.
fn spawn_pruner(storage: Arc<Storage>, every: Duration, ttl: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let pass = Arc::clone(&storage);
            match tokio::task::spawn_blocking(move || pass.prune_cache(Utc::now(), ttl)).await {
                Ok(Ok(pruned)) => debug!("Prune pass removed {} entries", pruned),
                Ok(Err(e)) => warn!("Cache prune failed: {}", e),
                Err(e) => warn!("Cache prune task failed: {}", e),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Open the stores and serve the API until interrupted.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, the address cannot be
/// bound, or the server fails.
pub async fn serve(config: &Config) -> Result<()> {
    let storage = Arc::new(Storage::open(config.database_path())?);
    let history = Arc::new(HistoryClient::new(&config.upstream)?);
    let lookup = Lookup::new(storage.clone(), storage.clone(), history).with_config(config);

    let pruner = config
        .prune_interval()
        .map(|every| spawn_pruner(Arc::clone(&storage), every, config.cache_ttl()));

    let listener = TcpListener::bind(config.bind_address()?).await?;
    info!(
        "Lookup service listening on {} (daily limit {}, cache ttl {} days)",
        listener.local_addr()?,
        config.quota.daily_limit,
        config.cache.ttl_days
    );

    axum::serve(listener, router(lookup))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::FlightRecord;
    use crate::identity::Identity;
    use crate::lookup::ErrorBody;
    use crate::upstream::{FetchError, HistorySource};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    struct StaticHistory(Vec<FlightRecord>);

    #[async_trait]
    impl HistorySource for StaticHistory {
        async fn fetch_history(
            &self,
            _flight: &str,
        ) -> std::result::Result<Vec<FlightRecord>, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn test_app() -> (Router, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let history = Arc::new(StaticHistory(vec![
            FlightRecord::operated(600),
            FlightRecord::operated(1200),
            FlightRecord::operated(1800),
        ]));
        let lookup = Lookup::new(storage.clone(), storage.clone(), history);
        (router(lookup), storage)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: HealthResponse = read_json(response).await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(Request::post("/register").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let registered: serde_json::Value = read_json(response).await;
        let id = registered["identityId"].as_str().unwrap().to_string();
        assert!(id.starts_with("ext_"));
        assert_eq!(registered["dailyLimit"], 20);

        let body = format!(r#"{{"identityId": "{id}", "flightNumber": "dl 1234"}}"#);
        let response = app
            .clone()
            .oneshot(post_json("/lookup", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first: serde_json::Value = read_json(response).await;
        assert_eq!(first["source"], "api");
        assert_eq!(first["stats"]["avg_delay"], 20);
        assert_eq!(first["usage"]["today"], 1);
        assert_eq!(first["usage"]["limit"], 20);

        let response = app.oneshot(post_json("/lookup", &body)).await.unwrap();
        let second: LookupResponse = read_json(response).await;
        assert_eq!(second.source, crate::lookup::Source::Cache);
        assert!(second.usage.is_none());
    }

    #[tokio::test]
    async fn test_lookup_accepts_install_id() {
        let (app, storage) = test_app();
        storage
            .insert_identity(&Identity::with_id("ext_legacy", Utc::now()))
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/lookup",
                r#"{"installId": "ext_legacy", "flightNumber": "UA55"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_lookup_missing_fields() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_json("/lookup", r#"{"flightNumber": "DL1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read_json(response).await;
        assert_eq!(body.code, "missing_fields");
    }

    #[tokio::test]
    async fn test_lookup_malformed_json() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_json("/lookup", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read_json(response).await;
        assert_eq!(body.code, "missing_fields");
    }

    #[tokio::test]
    async fn test_lookup_unknown_identity() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_json(
                "/lookup",
                r#"{"identityId": "ext_nobody", "flightNumber": "DL1"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorBody = read_json(response).await;
        assert_eq!(body.code, "invalid_identity");
    }

    #[tokio::test]
    async fn test_lookup_quota_exceeded() {
        let (app, storage) = test_app();
        let mut identity = Identity::with_id("ext_busy", Utc::now());
        identity.usage_today = 20;
        storage.insert_identity(&identity).unwrap();

        let response = app
            .oneshot(post_json(
                "/lookup",
                r#"{"identityId": "ext_busy", "flightNumber": "DL1"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: ErrorBody = read_json(response).await;
        assert_eq!(body.code, "quota_exceeded");
        assert_eq!(body.limit, Some(20));
        assert_eq!(body.resets_at.as_deref(), Some("midnight UTC"));
    }

    #[tokio::test]
    async fn test_wrong_method_not_allowed() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/lookup").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "chrome-extension://abcdef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
