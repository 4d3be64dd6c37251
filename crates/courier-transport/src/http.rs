//! HTTP routes for operators and local integrations.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use courier_core::SendError;
use courier_session::{SupervisorError, SupervisorHandle};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio_stream::wrappers::WatchStream;
use tower_http::trace::TraceLayer;

use crate::protocol::{
    ErrorResponse, RecipientError, SendRequest, SendResponse, StatusResponse, normalize_recipient,
};

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    handle: SupervisorHandle,
    recipient_domain: Arc<str>,
}

impl HttpState {
    #[must_use]
    pub fn new(handle: SupervisorHandle, recipient_domain: &str) -> Self {
        Self {
            handle,
            recipient_domain: Arc::from(recipient_domain),
        }
    }
}

/// Handler error mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Recipient(#[from] RecipientError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Recipient(_) => StatusCode::BAD_REQUEST,
            Self::Send(SendError::NotConnected) => StatusCode::CONFLICT,
            Self::Send(SendError::Rejected(_)) => StatusCode::BAD_GATEWAY,
            Self::Supervisor(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Build the router.
///
/// Routes:
/// - `GET /status` - current connection status, including any QR payload
/// - `GET /status/events` - server-sent stream of status changes
/// - `POST /send` - send a text message
/// - `POST /session/start`, `POST /session/stop` - operator control
#[must_use]
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/status/events", get(status_events))
        .route("/send", post(send_message))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /status
async fn get_status(State(state): State<HttpState>) -> Json<StatusResponse> {
    let handle = &state.handle;
    Json(StatusResponse::new(handle.session_key(), handle.status()))
}

/// GET /status/events
///
/// Emits the current status immediately, then one `status` event per change.
async fn status_events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_key = state.handle.session_key().to_string();
    let stream = WatchStream::new(state.handle.subscribe()).map(move |status| {
        let body = StatusResponse::new(&session_key, status);
        let event = Event::default().event("status");
        Ok::<_, Infallible>(event.json_data(&body).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize status event: {e}");
            Event::default().event("error").data(e.to_string())
        }))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// POST /send
async fn send_message(
    State(state): State<HttpState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let recipient = normalize_recipient(&request.number, &state.recipient_domain)?;
    state.handle.send(&recipient, &request.message).await?;
    tracing::debug!(recipient = %recipient, "Message sent");

    Ok(Json(SendResponse {
        success: true,
        recipient,
    }))
}

/// POST /session/start
async fn start_session(State(state): State<HttpState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.handle.start().await?;
    Ok(Json(StatusResponse::new(state.handle.session_key(), status)))
}

/// POST /session/stop
async fn stop_session(State(state): State<HttpState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.handle.stop().await?;
    Ok(Json(StatusResponse::new(state.handle.session_key(), status)))
}
