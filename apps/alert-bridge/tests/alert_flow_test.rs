//! End-to-end alert flow tests.
//!
//! Drives the full pipeline (normalize, resolve, look up, size, execute)
//! against an in-memory broker, and the HTTP surface against a mocked
//! broker API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use alert_bridge::broker::dhan::DhanConfig;
use alert_bridge::broker::{BrokerApi, DhanClient, MockBroker, RetryPolicy};
use alert_bridge::catalog::InstrumentCatalog;
use alert_bridge::execution::OrderExecutor;
use alert_bridge::expiry::{ExpiryResolver, default_cutoff};
use alert_bridge::models::{AlertIntent, AlertSide, InstrumentClass, OrderOutcome, SizeSpec};
use alert_bridge::notify::NoopNotifier;
use alert_bridge::pipeline::{AlertError, AlertPipeline};
use alert_bridge::risk::{QuantitySizer, RiskLimits};
use alert_bridge::server::{AppState, create_router};
use alert_bridge::state::StateStore;
use alert_bridge::symbols::SymbolNormalizer;

const DATASET: &str = "\
SECURITY_ID,EXCH_ID,UNDERLYING_SYMBOL,INSTRUMENT_TYPE,LOT_SIZE,TICK_SIZE,SM_EXPIRY_DATE,STRIKE_PRICE,OPTION_TYPE
53001,NSE,NIFTY,FUTIDX,75,0.05,2024-12-26,,
53002,NSE,NIFTY,FUTIDX,75,0.05,2025-01-30,,
11536,NSE,TCS,EQUITY,1,0.05,,,
";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

fn build_pipeline(
    dir: &tempfile::TempDir,
    broker: Arc<dyn BrokerApi>,
) -> (Arc<AlertPipeline>, Arc<StateStore>, Arc<InstrumentCatalog>) {
    let state = Arc::new(
        StateStore::open(dir.path().join("state.json"), ChronoDuration::days(7), 100)
            .expect("open state"),
    );
    let catalog = Arc::new(InstrumentCatalog::new(&["NIFTY".to_string()]));
    catalog
        .refresh_from_reader(DATASET.as_bytes())
        .expect("refresh");

    let executor = OrderExecutor::new(
        broker,
        Arc::clone(&state),
        Arc::new(NoopNotifier),
        fast_retry(),
    );
    let pipeline = Arc::new(AlertPipeline::new(
        SymbolNormalizer::default(),
        Arc::clone(&catalog),
        ExpiryResolver::new(&[], default_cutoff()),
        QuantitySizer::new(RiskLimits::default()),
        Arc::clone(&state),
        executor,
    ));
    (pipeline, state, catalog)
}

fn nifty_alert(id: &str, side: AlertSide, lots: i64) -> AlertIntent {
    AlertIntent {
        raw_symbol: "NIFTY24DECFUT".to_string(),
        class: InstrumentClass::Future,
        side,
        strike: None,
        option_type: None,
        size: SizeSpec::Quantity(lots),
        reference_price: Some(dec!(24000)),
        expiry_hint: None,
        alert_id: id.to_string(),
        // Monday 2024-12-23, 09:00 IST.
        received_at: Utc.with_ymd_and_hms(2024, 12, 23, 3, 30, 0).single().unwrap(),
    }
}

#[tokio::test]
async fn dated_nifty_alert_buys_one_lot_and_replays_idempotently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let broker = Arc::new(MockBroker::accepting());
    let (pipeline, state, _catalog) = build_pipeline(&dir, Arc::clone(&broker) as _);

    let first = pipeline
        .handle_alert(&nifty_alert("abc-1", AlertSide::Buy, 1))
        .await
        .expect("handle");
    assert!(matches!(first.outcome, OrderOutcome::Accepted { quantity: 75, .. }));
    assert!(!first.replayed);

    // The dated spelling pinned the December contract.
    let requests = broker.requests();
    assert_eq!(requests[0].security_id, "53001");
    assert_eq!(requests[0].quantity, 75);
    assert_eq!(state.position("NIFTY:FUT").expect("position").quantity, 75);

    // Identical alert again: stored outcome, no second broker call.
    let second = pipeline
        .handle_alert(&nifty_alert("abc-1", AlertSide::Buy, 1))
        .await
        .expect("handle");
    assert!(second.replayed);
    assert_eq!(second.outcome, first.outcome);
    assert_eq!(broker.call_count(), 1);
}

#[tokio::test]
async fn unlisted_symbol_leaves_state_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let broker = Arc::new(MockBroker::accepting());
    let (pipeline, state, _catalog) = build_pipeline(&dir, Arc::clone(&broker) as _);

    let mut alert = nifty_alert("abc-2", AlertSide::Buy, 1);
    alert.raw_symbol = "NSE:".to_string();
    let err = pipeline.handle_alert(&alert).await.expect_err("unrecognized");

    assert!(matches!(err, AlertError::UnrecognizedSymbol(_)));
    assert_eq!(broker.call_count(), 0);
    assert_eq!(state.open_position_count(), 0);
    assert!(!dir.path().join("state.json").exists());
}

#[tokio::test]
async fn concurrent_duplicates_submit_at_most_one_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let broker = Arc::new(MockBroker::accepting());
    let (pipeline, _state, _catalog) = build_pipeline(&dir, Arc::clone(&broker) as _);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline
                .handle_alert(&nifty_alert("abc-3", AlertSide::Buy, 1))
                .await
                .expect("handle")
        }));
    }

    let mut accepted = 0usize;
    for handle in handles {
        let report = handle.await.expect("join");
        assert!(matches!(report.outcome, OrderOutcome::Accepted { .. }));
        if !report.replayed {
            accepted += 1;
        }
    }

    assert_eq!(broker.call_count(), 1);
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn exhausted_retries_allow_a_resend_to_succeed() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Two transient failures exhaust the 2-attempt budget; the re-send
    // finds a healthy broker.
    let broker = Arc::new(MockBroker::failing_transiently(2));
    let (pipeline, state, _catalog) = build_pipeline(&dir, Arc::clone(&broker) as _);

    let first = pipeline
        .handle_alert(&nifty_alert("abc-4", AlertSide::Buy, 1))
        .await
        .expect("handle");
    assert_eq!(first.outcome, OrderOutcome::Failed { attempts: 2 });
    assert!(state.position("NIFTY:FUT").is_none());

    let second = pipeline
        .handle_alert(&nifty_alert("abc-4", AlertSide::Buy, 1))
        .await
        .expect("handle");
    assert!(!second.replayed);
    assert!(matches!(second.outcome, OrderOutcome::Accepted { .. }));
}

#[tokio::test]
async fn webhook_to_broker_wire_flow() {
    let broker_api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/orders"))
        .and(body_partial_json(json!({
            "dhanClientId": "client-1",
            "transactionType": "BUY",
            "securityId": "11536",
            "quantity": 10,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orderId": "112111182198",
            "orderStatus": "TRANSIT",
        })))
        .expect(1)
        .mount(&broker_api)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let client = DhanClient::new(DhanConfig {
        base_url: broker_api.uri(),
        client_id: "client-1".to_string(),
        access_token: "token-1".to_string(),
        timeout: Duration::from_secs(2),
    })
    .expect("client");
    let (pipeline, state, catalog) = build_pipeline(&dir, Arc::new(client));

    let app = create_router(AppState {
        pipeline,
        catalog,
        state,
        webhook_secret: Arc::from("s3cret"),
        dataset_path: Arc::from("unused.csv"),
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "secret": "s3cret",
                        "symbol": "NSE:TCS",
                        "side": "buy",
                        "class": "EQUITY",
                        "quantity": 10,
                        "price": "4100",
                        "alert_id": "abc-5",
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(parsed["status"], "accepted");
    assert_eq!(parsed["detail"], "112111182198");
}
