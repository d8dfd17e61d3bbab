//! Connector REST API Handlers

use axum::{
    Extension,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use common::Serial;
use device::UsbBackend;
use tokio::task;
use tracing::{error, warn};

use super::middleware::{CorrelationId, status_response};
use super::server::AppState;
use crate::config::split_listen;

// ==================== Error Handling ====================

/// Failure surfaced to the HTTP caller as a bare status
pub struct ApiError(pub StatusCode);

impl ApiError {
    pub fn internal() -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        status_response(self.0)
    }
}

// ==================== Handlers ====================

/// `POST /connector/api`: forward the body to the device, return its answer
pub async fn api<B: UsbBackend>(
    State(state): State<AppState<B>>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let proxy = state.proxy.clone();
    let cid = correlation_id.clone();
    let result = task::spawn_blocking(move || proxy.transact(&body, &cid)).await;

    match result {
        Ok(Ok(response)) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            response,
        )
            .into_response()),
        Ok(Err(e)) => {
            error!(correlation_id = %correlation_id, error = %e, "failed usb proxy");
            Err(ApiError::internal())
        }
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "usb proxy task failed");
            Err(ApiError::internal())
        }
    }
}

/// `GET /connector/status`: probe the device and describe the connector
pub async fn status<B: UsbBackend>(
    State(state): State<AppState<B>>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
) -> Response {
    let proxy = state.proxy.clone();
    let cid = correlation_id.clone();
    let healthy = match task::spawn_blocking(move || proxy.check(&cid)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(correlation_id = %correlation_id, error = %e, "status failed to open usb device");
            false
        }
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "usb status task failed");
            false
        }
    };

    let body = status_body(healthy, &state.serial, &state.listen, std::process::id());
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// The `key=value` block served by the status endpoint
pub fn status_body(healthy: bool, serial: &Serial, listen: &str, pid: u32) -> String {
    let (address, port) = split_listen(listen).unwrap_or((listen, ""));
    format!(
        "status={}\nserial={}\nversion={}\npid={}\naddress={}\nport={}\n",
        if healthy { "OK" } else { "NO_DEVICE" },
        serial.display_or_wildcard(),
        env!("CARGO_PKG_VERSION"),
        pid,
        address,
        port
    )
}
