//! HTTP endpoint server using Axum

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::core::service::{SignalService, SubmitError, Submission};
use crate::metrics::Metrics;
use crate::models::SignalId;

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<RwLock<HealthStatus>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub service: Arc<SignalService>,
}

impl AppState {
    pub fn new(service: Arc<SignalService>, metrics: Arc<Metrics>) -> Self {
        Self {
            health: Arc::new(RwLock::new(HealthStatus::default())),
            metrics,
            start_time: Arc::new(Instant::now()),
            service,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "uptime_seconds": uptime_seconds,
        "active_tracking_tasks": state.service.tracker().active(),
        "service": "signalmeter"
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.metrics.http_requests_in_flight.dec();

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

/// Fields pulled out of a TradingView alert body
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAlert {
    pub ticker: String,
    pub close: String,
    pub action: String,
}

impl WebhookAlert {
    /// The action may arrive as a flat `"strategy.order.action"` key, nested
    /// under `strategy.order`, or as a plain `"action"`.
    pub fn from_json(body: &Value) -> Result<Self, String> {
        let ticker = body
            .get("ticker")
            .and_then(Value::as_str)
            .ok_or("missing 'ticker'")?;
        let close = match body.get("close") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err("missing 'close'".to_string()),
        };
        let action = body
            .get("strategy.order.action")
            .or_else(|| body.pointer("/strategy/order/action"))
            .or_else(|| body.get("action"))
            .and_then(Value::as_str)
            .ok_or("missing 'strategy.order.action'")?;

        Ok(Self {
            ticker: ticker.to_string(),
            close,
            action: action.to_string(),
        })
    }
}

fn rejected(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({ "status": "rejected", "error": error.to_string() })),
    )
        .into_response()
}

/// TradingView alerts are often sent as `text/plain`, so the body is parsed here
async fn webhook(State(state): State<AppState>, body: String) -> Response {
    let alert = match serde_json::from_str::<Value>(&body)
        .map_err(|e| format!("invalid JSON: {}", e))
        .and_then(|value| WebhookAlert::from_json(&value))
    {
        Ok(alert) => alert,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            state.metrics.signals_rejected_total.inc();
            return rejected(StatusCode::BAD_REQUEST, e);
        }
    };

    let service = &state.service;
    match service
        .submit(&alert.ticker, &alert.close, &alert.action, service.now())
        .await
    {
        Ok(Submission::Accepted(signal)) => {
            let counters = service.counters();
            Json(json!({
                "status": "success",
                "signal_id": signal.id,
                "symbol": signal.symbol,
                "side": signal.side,
                "entry_price": signal.entry_price,
                "buy_count": counters.buy_count,
                "sell_count": counters.sell_count,
            }))
            .into_response()
        }
        Ok(Submission::Duplicate(id)) => {
            Json(json!({ "status": "duplicate", "signal_id": id })).into_response()
        }
        Err(SubmitError::Invalid(e)) => rejected(StatusCode::BAD_REQUEST, e),
        Err(SubmitError::Store(e)) => {
            error!(error = %e, ticker = %alert.ticker, "Failed to record signal");
            rejected(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

async fn counters(State(state): State<AppState>) -> Json<Value> {
    let counters = state.service.counters();
    Json(json!({
        "buy_count": counters.buy_count,
        "sell_count": counters.sell_count,
    }))
}

async fn signal_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let id = SignalId::new(id);
    match state.service.checkpoint_status(&id).await {
        Ok(Some(view)) => Ok(Json(json!(view))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(error = %e, signal_id = %id, "Failed to read signal status");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/webhook", post(webhook))
        .route("/api/counters", get(counters))
        .route("/api/signals/{id}", get(signal_status))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(
    port: u16,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    info!("Webhook endpoint available at http://0.0.0.0:{}/webhook", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
