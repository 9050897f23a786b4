//! Session HTTP handlers.
//!
//! Each handler validates its body, turns it into one session operation, and
//! waits for that operation's outcome.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::{
    AuthByCodeRequest, AuthByPhoneRequest, AuthByPhoneResponse, ClientSummary, DisconnectRequest,
    ListClientsResponse, SendMessageRequest, SendMessageToSelfRequest, StatusResponse,
};
use crate::server::AppState;
use crate::session::{Operation, SessionError, SessionRegistry};

use super::error::{ApiError, required};

type JsonBody<T> = Result<Json<T>, JsonRejection>;

// ============================================================================
// Authentication
// ============================================================================

/// POST /auth_by_phone
///
/// Admits a new session and asks the service for a confirmation code. If the
/// code request fails the session is discarded.
pub async fn auth_by_phone(
    State(state): State<AppState>,
    body: JsonBody<AuthByPhoneRequest>,
) -> Result<Json<AuthByPhoneResponse>, ApiError> {
    let Json(req) = body?;
    let phone = required(req.phone, "phone")?;

    let (reply, admitted) = oneshot::channel();
    tokio::spawn(admit_session(state.registry.clone(), phone, reply));

    let client_id = admitted.await.unwrap_or_else(|_| {
        Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "session admission was interrupted",
        ))
    })?;

    Ok(Json(AuthByPhoneResponse {
        is_ok: true,
        client_id,
    }))
}

/// Admit a session and request its code, detached from the HTTP request.
///
/// If the request is dropped (client gone, request timeout) before the
/// session ID is handed over, the session is discarded instead of being left
/// registered under an ID nobody received.
async fn admit_session(
    registry: SessionRegistry,
    phone: String,
    mut reply: oneshot::Sender<Result<String, ApiError>>,
) {
    let handle = match registry.admit(&phone).await {
        Ok(handle) => handle,
        Err(e) => {
            let _ = reply.send(Err(e.into()));
            return;
        }
    };

    let outcome = tokio::select! {
        outcome = handle.request_code() => outcome,
        () = reply.closed() => {
            warn!(session_id = %handle.id(), "Caller gone before code was requested, discarding session");
            registry.discard(handle.id()).await;
            return;
        }
    };

    match outcome {
        Ok(outcome) => {
            info!(session_id = %handle.id(), outcome = ?outcome, "Code requested");
            if let Err(Ok(client_id)) = reply.send(Ok(handle.id().to_string())) {
                warn!(session_id = %client_id, "Caller gone before receiving session, discarding");
                registry.discard(&client_id).await;
            }
        }
        Err(e) => {
            warn!(session_id = %handle.id(), error = %e, "Code request failed, discarding session");
            registry.discard(handle.id()).await;
            let err = match e {
                // A fresh worker exits this early on connect failure or shutdown.
                SessionError::SessionGone => ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "could not connect to the messaging service",
                ),
                e => e.into(),
            };
            let _ = reply.send(Err(err));
        }
    }
}

/// POST /auth_by_code
pub async fn auth_by_code(
    State(state): State<AppState>,
    body: JsonBody<AuthByCodeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body?;
    let client_id = required(req.client_id, "client_id")?;
    let code = required(req.code, "code")?;

    state
        .registry
        .dispatch(&client_id, Operation::SubmitCode { code })
        .await?;

    info!(session_id = %client_id, "Signed in");
    Ok(Json(StatusResponse::ok()))
}

// ============================================================================
// Messaging
// ============================================================================

/// POST /send_message
pub async fn send_message(
    State(state): State<AppState>,
    body: JsonBody<SendMessageRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body?;
    let client_id = required(req.client_id, "client_id")?;
    let to = required(req.to_phone, "to_phone")?;
    let text = required(req.text, "text")?;

    state
        .registry
        .dispatch(&client_id, Operation::SendMessage { to, text })
        .await?;

    debug!(session_id = %client_id, "Message sent");
    Ok(Json(StatusResponse::ok()))
}

/// POST /send_message_to_self
pub async fn send_message_to_self(
    State(state): State<AppState>,
    body: JsonBody<SendMessageToSelfRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body?;
    let client_id = required(req.client_id, "client_id")?;
    let text = required(req.text, "text")?;

    state
        .registry
        .dispatch(&client_id, Operation::SendMessageToSelf { text })
        .await?;

    debug!(session_id = %client_id, "Message sent to self");
    Ok(Json(StatusResponse::ok()))
}

// ============================================================================
// Sessions
// ============================================================================

/// GET /get_clients
pub async fn get_clients(State(state): State<AppState>) -> Json<ListClientsResponse> {
    let clients = state
        .registry
        .list()
        .into_iter()
        .map(|m| ClientSummary {
            client_id: m.id,
            phone_number: m.identity,
            created_at: m.created_at.to_rfc3339(),
        })
        .collect();

    Json(ListClientsResponse {
        is_ok: true,
        clients,
    })
}

/// POST /disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    body: JsonBody<DisconnectRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body?;
    let client_id = required(req.client_id, "client_id")?;

    state
        .registry
        .dispatch(&client_id, Operation::Terminate)
        .await?;

    info!(session_id = %client_id, "Session disconnected");
    Ok(Json(StatusResponse::ok()))
}
