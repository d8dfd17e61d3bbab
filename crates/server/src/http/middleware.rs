//! Request wrapper applied to every route
//!
//! Assigns the correlation id, enforces the Host header allow-list, turns
//! handler panics into 500 responses and writes the access log.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::new_correlation_id;
use futures_util::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id of the request being handled
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Hosts accepted in the Host header; `None` disables the check
#[derive(Debug, Clone, Default)]
pub struct HostAllowlist(Option<Arc<[String]>>);

impl HostAllowlist {
    pub fn new(hosts: Option<Vec<String>>) -> Self {
        Self(hosts.map(Arc::from))
    }

    /// Whether a request carrying `host` may proceed
    pub fn permits(&self, host: &str) -> bool {
        match &self.0 {
            None => true,
            Some(hosts) => {
                let host = extract_host(host);
                hosts.iter().any(|h| h == host)
            }
        }
    }
}

/// Strip the port from a Host header value; IPv6 literals keep their brackets
pub fn extract_host(addr: &str) -> &str {
    match addr.rfind(':') {
        Some(colon) => {
            let bracket = addr.find(']').unwrap_or(0);
            if colon > bracket { &addr[..colon] } else { addr }
        }
        None => addr,
    }
}

/// Plain-text response carrying the reason phrase, like the stock error pages
pub fn status_response(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    (status, format!("{}\n", reason)).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

pub async fn wrap(
    State(allowlist): State<HostAllowlist>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let correlation_id = match header_str(headers, &REQUEST_ID_HEADER) {
        "" => new_correlation_id(),
        id => id.to_string(),
    };
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let host = header_str(headers, &header::HOST).to_string();
    let user_agent = header_str(headers, &header::USER_AGENT).to_string();
    let content_length = header_str(headers, &header::CONTENT_LENGTH).to_string();

    let mut response = if !allowlist.permits(&host) {
        error!(
            correlation_id = %correlation_id,
            host = %host,
            remote_addr = %remote_addr,
            "host not in allowlist"
        );
        status_response(StatusCode::FORBIDDEN)
    } else {
        request
            .extensions_mut()
            .insert(CorrelationId(correlation_id.clone()));

        let started = Instant::now();
        let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                error!(
                    correlation_id = %correlation_id,
                    panic = panic_message(panic.as_ref()),
                    "recovered from handler panic"
                );
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
        let latency = started.elapsed();

        let status = response.status();
        if status == StatusCode::OK {
            info!(
                correlation_id = %correlation_id,
                method = %method,
                uri = %uri,
                remote_addr = %remote_addr,
                user_agent = %user_agent,
                content_length = %content_length,
                status = status.as_u16(),
                latency = ?latency,
                "handled request"
            );
        } else {
            error!(
                correlation_id = %correlation_id,
                method = %method,
                uri = %uri,
                remote_addr = %remote_addr,
                user_agent = %user_agent,
                content_length = %content_length,
                status = status.as_u16(),
                latency = ?latency,
                "error in handling request"
            );
        }
        response
    };

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(&REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("localhost"), "localhost");
        assert_eq!(extract_host("localhost:12345"), "localhost");
        assert_eq!(extract_host("127.0.0.1:80"), "127.0.0.1");
        assert_eq!(extract_host("[::1]"), "[::1]");
        assert_eq!(extract_host("[::1]:12345"), "[::1]");
        assert_eq!(extract_host(""), "");
    }

    #[test]
    fn test_disabled_allowlist_permits_everything() {
        let allowlist = HostAllowlist::default();
        assert!(allowlist.permits("evil.example:80"));
        assert!(allowlist.permits(""));
    }

    #[test]
    fn test_allowlist() {
        let allowlist = HostAllowlist::new(Some(vec![
            "localhost".to_string(),
            "localhost.".to_string(),
            "127.0.0.1".to_string(),
            "[::1]".to_string(),
        ]));
        for host in [
            "localhost",
            "localhost:12345",
            "localhost.:12345",
            "127.0.0.1:12345",
            "[::1]",
            "[::1]:12345",
        ] {
            assert!(allowlist.permits(host), "{}", host);
        }
        for host in ["", "evil.example", "evil.example:12345", "127.0.0.2", "::1"] {
            assert!(!allowlist.permits(host), "{}", host);
        }
    }

    #[test]
    fn test_status_response() {
        let response = status_response(StatusCode::FORBIDDEN);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
