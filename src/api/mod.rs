//! HTTP control surface
//!
//! `POST /cmd` takes a JSON body `{"cmd": ..., ...}` and always answers
//! HTTP 200 with `{"status": "ok" | "error", ...}`. `GET /health` reports the
//! device connection phase.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::device::{Channel, ConnectionPhase};
use crate::error::GatewayError;
use crate::gateway::Gateway;

/// Reply body of `POST /cmd`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            payload: None,
            msg: None,
        }
    }

    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::ok()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            payload: None,
            msg: Some(msg.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    device: ConnectionPhase,
}

#[derive(Debug, Deserialize)]
struct PowerOnArgs {
    channel: i64,
    current: f64,
    voltage: f64,
}

#[derive(Debug, Deserialize)]
struct PowerOffArgs {
    channel: i64,
}

/// Build the API router
pub fn build_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/cmd", post(handle_cmd))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// POST /cmd - dispatch one control request
async fn handle_cmd(State(gateway): State<Gateway>, body: Bytes) -> Json<ControlResponse> {
    let response = match dispatch(&gateway, &body).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Control request failed: {}", e);
            ControlResponse::error(e.to_string())
        }
    };
    Json(response)
}

async fn dispatch(gateway: &Gateway, body: &[u8]) -> Result<ControlResponse, GatewayError> {
    let request: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::validation(format!("Malformed JSON: {}", e)))?;
    let cmd = request
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::validation("Missing \"cmd\" field"))?;
    debug!("[http_cmd] {}", cmd);

    match cmd {
        "power_on" => {
            let args: PowerOnArgs = arguments(&request)?;
            let channel = Channel::new(args.channel)?;
            gateway.power_on(channel, args.current, args.voltage).await?;
            Ok(ControlResponse::ok())
        }
        "power_off" => {
            let args: PowerOffArgs = arguments(&request)?;
            gateway.power_off(Channel::new(args.channel)?).await?;
            Ok(ControlResponse::ok())
        }
        "get_state" => {
            let snapshot = gateway.get_state();
            let payload = serde_json::to_value(&snapshot.channels).map_err(|e| {
                GatewayError::internal(format!("Failed to serialize state: {}", e))
            })?;
            Ok(ControlResponse::with_payload(payload))
        }
        other => Err(GatewayError::validation(format!(
            "Command not supported: {}",
            other
        ))),
    }
}

fn arguments<T: DeserializeOwned>(request: &Value) -> Result<T, GatewayError> {
    T::deserialize(request)
        .map_err(|e| GatewayError::validation(format!("Invalid arguments: {}", e)))
}

/// GET /health - liveness plus device connection phase
async fn health_check(State(gateway): State<Gateway>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        device: gateway.session().phase(),
    })
}

/// Start the HTTP server on all interfaces
pub async fn start_server(gateway: Gateway, port: u16) -> Result<()> {
    let router = build_router(gateway);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting control server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind control server")?;

    axum::serve(listener, router)
        .await
        .context("Control server error")?;

    Ok(())
}
