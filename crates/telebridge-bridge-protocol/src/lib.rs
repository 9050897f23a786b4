//! Bridge protocol types for communication between telebridge and messaging bridges.
//!
//! A bridge is an external process that holds one authenticated connection to
//! the messaging service on behalf of a single telebridge session. telebridge
//! spawns one bridge per session and talks to it over stdio.
//!
//! # Protocol Overview
//!
//! JSON Lines (newline-delimited JSON) in both directions:
//!
//! - **Requests** (telebridge → bridge): one capability call each, tagged with a
//!   `request_id`. telebridge never has more than one request outstanding.
//! - **Events** (bridge → telebridge): a `ready` event once the bridge is up,
//!   then one `reply` per request carrying the same `request_id`.
//!
//! # Example: Minimal Bridge
//!
//! ```ignore
//! use telebridge_bridge_protocol::{BridgeEvent, BridgeRequest, BridgeResult};
//!
//! println!("{}", serde_json::to_string(&BridgeEvent::ready("my-bridge", "1.0.0"))?);
//!
//! let request: BridgeRequest = serde_json::from_str(&read_line_from_stdin())?;
//! let reply = BridgeEvent::reply(request.request_id, BridgeResult::Ok);
//! println!("{}", serde_json::to_string(&reply)?);
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Requests (telebridge → Bridge)
// ============================================================================

/// A single capability call sent to a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub request_id: String,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

/// Capability calls a bridge must support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Open the connection to the messaging service.
    Connect,
    /// Ask whether the connection already holds an authorized account.
    IsAuthorized,
    /// Ask the service to deliver a confirmation code to `phone`.
    RequestCode { phone: String },
    /// Sign in with the confirmation code delivered to `phone`.
    VerifyCode { phone: String, code: String },
    /// Resolve a phone number to an entity the account may message.
    ResolveEntity { phone: String },
    /// Add a phone number to the account's contacts.
    ImportContact {
        phone: String,
        #[serde(default)]
        first_name: String,
        #[serde(default)]
        last_name: String,
    },
    /// Send a text message to a previously resolved entity.
    SendMessage { entity_id: String, text: String },
    /// Return the entity of the signed-in account.
    GetSelf,
    /// Terminate the authorization on the service side.
    LogOut,
    /// Close the connection. The bridge exits after replying.
    Disconnect,
}

impl BridgeCommand {
    /// Short name of the command, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Connect => "connect",
            BridgeCommand::IsAuthorized => "is_authorized",
            BridgeCommand::RequestCode { .. } => "request_code",
            BridgeCommand::VerifyCode { .. } => "verify_code",
            BridgeCommand::ResolveEntity { .. } => "resolve_entity",
            BridgeCommand::ImportContact { .. } => "import_contact",
            BridgeCommand::SendMessage { .. } => "send_message",
            BridgeCommand::GetSelf => "get_self",
            BridgeCommand::LogOut => "log_out",
            BridgeCommand::Disconnect => "disconnect",
        }
    }
}

// ============================================================================
// Events (Bridge → telebridge)
// ============================================================================

/// Events emitted by a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Bridge process is up and ready to receive requests.
    Ready { bridge: String, version: String },

    /// Completion of the request with the same `request_id`.
    Reply {
        request_id: String,
        result: BridgeResult,
    },

    /// Bridge-level error (not tied to a specific request).
    Error {
        code: String,
        message: String,
        /// Whether the bridge is about to exit.
        #[serde(default)]
        fatal: bool,
    },
}

impl BridgeEvent {
    pub fn ready(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        BridgeEvent::Ready {
            bridge: bridge.into(),
            version: version.into(),
        }
    }

    pub fn reply(request_id: impl Into<String>, result: BridgeResult) -> Self {
        BridgeEvent::Reply {
            request_id: request_id.into(),
            result,
        }
    }
}

/// Result payload of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResult {
    /// Command completed with no payload.
    Ok,
    /// Reply to `is_authorized`.
    Authorized { authorized: bool },
    /// Reply to `resolve_entity` and `get_self`. `None` means the phone number
    /// is not known to the account.
    Entity {
        #[serde(default)]
        entity: Option<Entity>,
    },
    /// Reply to `import_contact`. Empty when nothing was imported.
    Imported {
        #[serde(default)]
        entities: Vec<Entity>,
    },
    /// Command failed on the service side.
    Failed { code: String, message: String },
}

/// A messageable entity on the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes for `failed` results and `error` events.
pub mod error_codes {
    /// Bridge is not connected to the service.
    pub const NOT_CONNECTED: &str = "not_connected";
    /// Confirmation code is wrong or expired.
    pub const CODE_INVALID: &str = "code_invalid";
    /// Account must sign in before this command.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// Rate limited by the service.
    pub const FLOOD_WAIT: &str = "flood_wait";
    /// Request could not be decoded.
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// Any other service error.
    pub const SERVICE_ERROR: &str = "service_error";
}
