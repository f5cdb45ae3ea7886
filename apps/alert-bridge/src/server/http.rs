//! HTTP/JSON API implementation.
//!
//! `POST /webhook` is the alert intake: the shared secret is checked before
//! anything else, then the payload is mapped onto an alert intent and run
//! through the pipeline. Management endpoints expose health, open positions,
//! and an on-demand catalog refresh.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{CatalogError, InstrumentCatalog};
use crate::models::{
    AlertIntent, AlertSide, InstrumentClass, OptionType, OrderOutcome, PositionRecord, SizeSpec,
};
use crate::pipeline::{AlertError, AlertPipeline};
use crate::state::StateStore;

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Alert pipeline.
    pub pipeline: Arc<AlertPipeline>,
    /// Instrument catalog, for health and refresh endpoints.
    pub catalog: Arc<InstrumentCatalog>,
    /// Durable state, for the positions endpoint.
    pub state: Arc<StateStore>,
    /// Shared webhook secret.
    pub webhook_secret: Arc<str>,
    /// Dataset path used by the refresh endpoint.
    pub dataset_path: Arc<str>,
}

/// Create the Axum router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/v1/positions", get(positions))
        .route("/v1/refresh-catalog", post(refresh_catalog))
        .with_state(state)
}

/// Health response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    catalog_instruments: usize,
    catalog_stale: bool,
    open_positions: usize,
    server_time: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        catalog_instruments: state.catalog.len(),
        catalog_stale: state.catalog.is_stale(),
        open_positions: state.state.open_position_count(),
        server_time: Utc::now().to_rfc3339(),
    })
}

/// Inbound webhook payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAlert {
    /// Shared secret; must match the configured value.
    pub secret: String,
    /// Raw symbol as sent by the alert provider.
    pub symbol: String,
    /// Trade side.
    pub side: AlertSide,
    /// Instrument class; defaults to futures.
    #[serde(default = "default_class")]
    pub class: InstrumentClass,
    /// Explicit quantity in whole lots (shares for equities).
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Fraction of capital to risk, alternative to `quantity`.
    #[serde(default)]
    pub risk_fraction: Option<Decimal>,
    /// Reference (spot) price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Option strike.
    #[serde(default)]
    pub strike: Option<Decimal>,
    /// Option type.
    #[serde(default)]
    pub option_type: Option<OptionType>,
    /// Explicit expiry hint.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Caller-supplied alert identifier; generated when absent.
    #[serde(default)]
    pub alert_id: Option<String>,
}

const fn default_class() -> InstrumentClass {
    InstrumentClass::Future
}

/// Webhook response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Terminal outcome label.
    pub status: String,
    /// Whether the outcome was replayed from the processed log.
    pub replayed: bool,
    /// Outcome detail (broker order id, rejection reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookAlert>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if payload.secret != *state.webhook_secret {
        warn!(symbol = %payload.symbol, "Webhook secret mismatch");
        return Err(ApiError::Forbidden);
    }

    let size = match (payload.quantity, payload.risk_fraction) {
        (Some(q), _) => SizeSpec::Quantity(q),
        (None, Some(f)) => SizeSpec::RiskFraction(f),
        (None, None) if payload.side == AlertSide::Exit => SizeSpec::Quantity(0),
        (None, None) => {
            return Err(ApiError::Unprocessable(
                "either quantity or risk_fraction is required".to_string(),
            ));
        }
    };

    let alert = AlertIntent {
        raw_symbol: payload.symbol,
        class: payload.class,
        side: payload.side,
        strike: payload.strike,
        option_type: payload.option_type,
        size,
        reference_price: payload.price,
        expiry_hint: payload.expiry,
        alert_id: payload
            .alert_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        received_at: Utc::now(),
    };

    let report = state.pipeline.handle_alert(&alert).await?;

    info!(
        alert_id = %alert.alert_id,
        outcome = report.outcome.label(),
        replayed = report.replayed,
        "Alert handled"
    );

    let detail = match &report.outcome {
        OrderOutcome::Accepted {
            broker_order_id, ..
        } => Some(broker_order_id.clone()),
        OrderOutcome::Rejected { reason } | OrderOutcome::RiskRejected { reason } => {
            Some(reason.clone())
        }
        OrderOutcome::Failed { attempts } => Some(format!("gave up after {attempts} attempts")),
        OrderOutcome::NothingToClose => None,
    };

    Ok(Json(WebhookResponse {
        status: report.outcome.label().to_string(),
        replayed: report.replayed,
        detail,
    }))
}

/// Open positions response.
#[derive(Debug, Serialize)]
struct PositionsResponse {
    positions: Vec<PositionRecord>,
}

async fn positions(State(state): State<AppState>) -> Json<PositionsResponse> {
    let mut positions = state.state.open_positions();
    positions.sort_by(|a, b| a.instrument_key.cmp(&b.instrument_key));
    Json(PositionsResponse { positions })
}

/// Catalog refresh response.
#[derive(Debug, Serialize)]
struct RefreshResponse {
    instruments: usize,
}

async fn refresh_catalog(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    let instruments = state
        .catalog
        .refresh_from_path(std::path::Path::new(&*state.dataset_path))?;
    Ok(Json(RefreshResponse { instruments }))
}

/// API error mapped onto an HTTP status.
#[derive(Debug)]
enum ApiError {
    Forbidden,
    Unprocessable(String),
    Unavailable(String),
    Internal(String),
}

impl From<AlertError> for ApiError {
    fn from(error: AlertError) -> Self {
        match error {
            AlertError::UnrecognizedSymbol(_)
            | AlertError::NoValidExpiry(_)
            | AlertError::Catalog(CatalogError::NotFound { .. }) => {
                Self::Unprocessable(error.to_string())
            }
            AlertError::Catalog(CatalogError::Stale(_)) => Self::Unavailable(error.to_string()),
            AlertError::State(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound { .. } => Self::Unprocessable(error.to_string()),
            CatalogError::Stale(_) => Self::Unavailable(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::Forbidden => (StatusCode::FORBIDDEN, "invalid webhook secret".to_string()),
            Self::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            Self::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockBroker, RetryPolicy};
    use crate::execution::OrderExecutor;
    use crate::expiry::{ExpiryResolver, default_cutoff};
    use crate::notify::NoopNotifier;
    use crate::risk::{QuantitySizer, RiskLimits};
    use crate::symbols::SymbolNormalizer;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tower::ServiceExt;

    // Equity only: equity alerts skip expiry resolution, so the tests do
    // not depend on the wall clock.
    const DATASET: &str = "\
SECURITY_ID,EXCH_ID,UNDERLYING_SYMBOL,INSTRUMENT_TYPE,LOT_SIZE,TICK_SIZE,SM_EXPIRY_DATE,STRIKE_PRICE,OPTION_TYPE
11536,NSE,TCS,EQUITY,1,0.05,,,
";

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn make_state(dir: &tempfile::TempDir) -> AppState {
        let dataset_path = dir.path().join("scrip-master.csv");
        std::fs::write(&dataset_path, DATASET).expect("write dataset");

        let store = Arc::new(
            StateStore::open(dir.path().join("state.json"), ChronoDuration::days(7), 100)
                .expect("open"),
        );
        let catalog = Arc::new(InstrumentCatalog::new(&[]));
        catalog
            .refresh_from_reader(DATASET.as_bytes())
            .expect("refresh");

        let executor = OrderExecutor::new(
            Arc::new(MockBroker::accepting()),
            Arc::clone(&store),
            Arc::new(NoopNotifier),
            RetryPolicy::default(),
        );
        let pipeline = Arc::new(AlertPipeline::new(
            SymbolNormalizer::default(),
            Arc::clone(&catalog),
            ExpiryResolver::new(&[], default_cutoff()),
            QuantitySizer::new(RiskLimits::default()),
            Arc::clone(&store),
            executor,
        ));

        AppState {
            pipeline,
            catalog,
            state: store,
            webhook_secret: Arc::from("s3cret"),
            dataset_path: Arc::from(dataset_path.to_string_lossy().as_ref()),
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn health_reports_catalog_and_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = create_router(make_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let parsed = body_json(response).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["catalog_instruments"], 1);
        assert_eq!(parsed["catalog_stale"], false);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_secret_before_processing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = create_router(make_state(&dir));

        let response = app
            .oneshot(post_json(
                "/webhook",
                json!({
                    "secret": "wrong",
                    "symbol": "NSE:TCS",
                    "side": "buy",
                    "class": "EQUITY",
                    "quantity": 10,
                    "alert_id": "abc-1",
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn webhook_accepts_and_replays() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = make_state(&dir);

        let payload = json!({
            "secret": "s3cret",
            "symbol": "NSE:TCS",
            "side": "buy",
            "class": "EQUITY",
            "quantity": 10,
            "price": "100",
            "alert_id": "abc-1",
        });

        let response = create_router(state.clone())
            .oneshot(post_json("/webhook", payload.clone()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let first: WebhookResponse =
            serde_json::from_value(body_json(response).await).expect("decode");
        assert_eq!(first.status, "accepted");
        assert!(!first.replayed);

        let response = create_router(state)
            .oneshot(post_json("/webhook", payload))
            .await
            .expect("response");
        let second: WebhookResponse =
            serde_json::from_value(body_json(response).await).expect("decode");
        assert_eq!(second.status, "accepted");
        assert!(second.replayed);
    }

    #[tokio::test]
    async fn webhook_unknown_symbol_is_unprocessable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = create_router(make_state(&dir));

        let response = app
            .oneshot(post_json(
                "/webhook",
                json!({
                    "secret": "s3cret",
                    "symbol": "BANKNIFTY1!",
                    "side": "buy",
                    "quantity": 75,
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn webhook_requires_a_size_for_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = create_router(make_state(&dir));

        let response = app
            .oneshot(post_json(
                "/webhook",
                json!({
                    "secret": "s3cret",
                    "symbol": "NSE:TCS",
                    "side": "buy",
                    "class": "EQUITY",
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn positions_endpoint_lists_open_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = make_state(&dir);

        create_router(state.clone())
            .oneshot(post_json(
                "/webhook",
                json!({
                    "secret": "s3cret",
                    "symbol": "NSE:TCS",
                    "side": "buy",
                    "class": "EQUITY",
                    "quantity": 10,
                    "price": "100",
                    "alert_id": "abc-2",
                }),
            ))
            .await
            .expect("response");

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/positions")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let parsed = body_json(response).await;
        assert_eq!(parsed["positions"][0]["instrument_key"], "TCS:EQ");
        assert_eq!(parsed["positions"][0]["quantity"], 10);
    }

    #[tokio::test]
    async fn refresh_catalog_reloads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = make_state(&dir);

        let response = create_router(state)
            .oneshot(post_json("/v1/refresh-catalog", json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let parsed = body_json(response).await;
        assert_eq!(parsed["instruments"], 1);
    }
}
