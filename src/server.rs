//! Reward Engine Server
//!
//! HTTP surface over the coordinator.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::anti_bot::RecordedSignals;
use crate::boost::BoostKind;
use crate::collaborators::Notifier;
use crate::config::Config;
use crate::coordinator::{Collaborators, RewardCoordinator};
use crate::error::RewardError;
use crate::notify::{LogNotifier, WebhookNotifier};
use crate::quality::HeuristicContentModel;
use crate::referral::ReferralSnapshot;
use crate::storage::SqliteStore;
use crate::types::ActivityEvent;

pub struct AppState {
    pub coordinator: Arc<RewardCoordinator>,
    pub started_at: std::time::Instant,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/users", post(register_handler))
        .route("/users/:user_id", get(profile_handler))
        .route("/users/:user_id/kyc", post(kyc_handler))
        .route("/users/:user_id/mining", get(status_handler))
        .route("/users/:user_id/mining/start", post(start_handler))
        .route("/users/:user_id/mining/stop", post(stop_handler))
        .route("/users/:user_id/mining/claim", post(claim_handler))
        .route("/users/:user_id/boosts", post(boost_handler))
        .route("/users/:user_id/referrals", get(referral_handler).post(referral_update_handler))
        .route("/activities", post(activity_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn status_for(e: &RewardError) -> StatusCode {
    match e {
        RewardError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RewardError::SuspiciousActivity { .. } => StatusCode::FORBIDDEN,
        RewardError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        RewardError::SessionConflict(_) => StatusCode::CONFLICT,
        RewardError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_body(e: &RewardError) -> serde_json::Value {
    let mut body = serde_json::json!({
        "error": e.kind(),
        "message": e.to_string(),
        "retryable": e.is_retryable(),
    });
    if let RewardError::LimitExceeded {
        retry_after: Some(at),
        ..
    } = e
    {
        body["retry_after"] = serde_json::json!(at);
    }
    body
}

fn respond<T: Serialize>(result: Result<T, RewardError>) -> ApiResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(json) => (StatusCode::OK, Json(json)),
            Err(e) => {
                error!("Failed to encode response: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "encoding", "message": e.to_string() })),
                )
            }
        },
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Request failed: {}", e);
            }
            (status, Json(error_body(&e)))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn config_handler(State(state): State<Arc<AppState>>) -> ApiResponse {
    respond(Ok(state.coordinator.config()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    #[serde(default)]
    pub kyc_verified: bool,
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResponse {
    respond(
        state
            .coordinator
            .register_user(&req.user_id, req.kyc_verified, Utc::now())
            .await,
    )
}

async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    respond(state.coordinator.profile(&user_id).await)
}

#[derive(Debug, Deserialize)]
pub struct KycRequest {
    pub verified: bool,
}

async fn kyc_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<KycRequest>,
) -> ApiResponse {
    respond(state.coordinator.set_kyc(&user_id, req.verified, Utc::now()).await)
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    respond(state.coordinator.mining_status(&user_id, Utc::now()).await)
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    respond(state.coordinator.start_mining(&user_id, Utc::now()).await)
}

async fn stop_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    respond(state.coordinator.stop_mining(&user_id, Utc::now()).await)
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub session_id: Uuid,
}

async fn claim_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> ApiResponse {
    respond(state.coordinator.claim(&user_id, req.session_id, Utc::now()).await)
}

#[derive(Debug, Deserialize)]
pub struct BoostRequest {
    pub kind: BoostKind,
}

async fn boost_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<BoostRequest>,
) -> ApiResponse {
    respond(
        state
            .coordinator
            .activate_boost(&user_id, req.kind, Utc::now())
            .await,
    )
}

async fn referral_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    respond(state.coordinator.referral_value(&user_id, Utc::now()).await)
}

async fn referral_update_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(snapshot): Json<ReferralSnapshot>,
) -> ApiResponse {
    respond(
        state
            .coordinator
            .update_referral_network(&user_id, snapshot, Utc::now())
            .await,
    )
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ActivityEvent>,
) -> ApiResponse {
    respond(state.coordinator.record_activity(&event, Utc::now()).await)
}

/// Wire a coordinator from configuration: SQLite for state and ledger, the
/// built-in content model and signal recorder, and a webhook or log notifier.
pub fn build_coordinator(config: &Config) -> anyhow::Result<RewardCoordinator> {
    let store = Arc::new(SqliteStore::new(&config.database.path)?);
    info!("SQLite storage initialized at {}", config.database.path);

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => {
            info!("Sending notifications to {}", url);
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let collaborators = Collaborators {
        store: store.clone(),
        ledger: store,
        content_model: Arc::new(HeuristicContentModel::default()),
        signals: Arc::new(RecordedSignals::new(config.engine.anti_bot.history_len)),
        notifier,
    };
    Ok(RewardCoordinator::new(config.engine.clone(), collaborators)?)
}

/// Run the server
pub async fn run_server(
    host: &str,
    port: u16,
    coordinator: Arc<RewardCoordinator>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        coordinator,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Reward Engine server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&RewardError::invalid("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&RewardError::SuspiciousActivity {
                human_probability: 0.1,
                threshold: 0.5
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&RewardError::limit("cap", None)), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(&RewardError::conflict("dup")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&RewardError::unavailable("ledger", "down")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_limit_error_carries_retry_after() {
        let at = Utc::now();
        let body = error_body(&RewardError::limit("daily cap", Some(at)));
        assert_eq!(body["error"], "limit_exceeded");
        assert_eq!(body["retryable"], true);
        assert!(body.get("retry_after").is_some());
    }
}
