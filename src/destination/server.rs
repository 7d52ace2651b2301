//! Axum adapter mounting a destination behind a real listener.
//!
//! # Responsibilities
//! - Turn each axum request into a [`BufferedRequest`] and
//!   [`BufferedResponse`] pair
//! - Re-invoke the destination whenever a suspended request resumes
//! - Map transport errors to HTTP statuses
//! - Wire up tracing and the request timeout

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ListenerConfig;
use crate::destination::{
    BufferedRequest, BufferedResponse, ContinuationState, HttpDestination, InvokeOutcome,
    ServerRequest, SharedResponse,
};
use crate::error::TransportError;
use crate::lifecycle::Shutdown;

/// Router answering every path through `destination`.
#[allow(deprecated)]
pub fn router(destination: HttpDestination, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(destination)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Serve `destination` on `listener` until `shutdown` triggers.
pub async fn serve(
    listener: TcpListener,
    destination: HttpDestination,
    config: &ListenerConfig,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        address = %addr,
        destination = %destination.name(),
        base_path = %destination.base_path(),
        "Destination listening"
    );

    let app = router(destination, Duration::from_secs(config.request_timeout_secs));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    tracing::info!("Destination stopped");
    Ok(())
}

/// Drops the parked message of a request whose handler went away while it
/// was suspended, e.g. on request timeout.
struct SuspendGuard<'a> {
    destination: &'a HttpDestination,
    key: String,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if self.destination.release_suspended(&self.key) {
            tracing::debug!(request = %self.key, "Released abandoned suspended request");
        }
    }
}

async fn dispatch(State(destination): State<HttpDestination>, request: Request<Body>) -> Response {
    let limit = destination.server_policy().max_request_body;
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, limit, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut request = BufferedRequest::from_parts(parts, body);
    let _guard = SuspendGuard {
        destination: &destination,
        key: request.key().to_string(),
    };
    let response = BufferedResponse::shared();
    let shared: SharedResponse = response.clone();

    loop {
        match destination.invoke(&mut request, shared.clone()).await {
            Ok(InvokeOutcome::Suspended(continuation)) => {
                if continuation.wait_resumed().await == ContinuationState::Completed {
                    break;
                }
            }
            Ok(_) => break,
            Err(TransportError::InvalidEncoding { charset }) => {
                return (StatusCode::BAD_REQUEST, format!("Unsupported charset {}", charset))
                    .into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, uri = %request.request_uri(), "Destination invoke failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
    }

    let mut guard = response.lock().await;
    std::mem::take(&mut *guard).into_http_response()
}
