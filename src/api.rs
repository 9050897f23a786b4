//! Wire types for the HTTP API.
//!
//! Every response carries `isOK`; failures add a human-readable `error`.
//! Request fields are optional at the serde level so a missing field becomes a
//! validation error with a useful message instead of a generic rejection.

use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthByPhoneRequest {
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthByCodeRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub to_phone: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageToSelfRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub client_id: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// Plain acknowledgement or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "isOK")]
    pub is_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            is_ok: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_ok: false,
            error: Some(message.into()),
        }
    }
}

/// Response to `POST /auth_by_phone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthByPhoneResponse {
    #[serde(rename = "isOK")]
    pub is_ok: bool,
    pub client_id: String,
}

/// One session in `GET /get_clients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub phone_number: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListClientsResponse {
    #[serde(rename = "isOK")]
    pub is_ok: bool,
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(rename = "isOK")]
    pub is_ok: bool,
    pub message: String,
}
