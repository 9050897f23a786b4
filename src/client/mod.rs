//! Messaging service clients.
//!
//! A [`MessagingClient`] is the async capability a session worker drives. It is
//! created by a [`ClientFactory`] when the worker starts and is owned by that
//! worker alone until it exits.
//!
//! Backends:
//! - [`loopback`]: in-memory messaging service, for development and tests.
//! - [`subprocess`]: one external bridge process per session, JSON Lines over stdio.

mod error;
pub mod loopback;
pub mod subprocess;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::{ClientError, Result};
pub use loopback::{LoopbackFactory, LoopbackService};
pub use subprocess::SubprocessFactory;

use crate::config::{ClientConfig, CredentialsConfig};

// ============================================================================
// Types
// ============================================================================

/// Reference to an entity the account can message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub id: String,
    pub display_name: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

impl From<telebridge_bridge_protocol::Entity> for EntityRef {
    fn from(entity: telebridge_bridge_protocol::Entity) -> Self {
        Self {
            id: entity.id,
            display_name: entity.display_name,
        }
    }
}

/// Outcome of adding a phone number to the account's contacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub imported: Vec<EntityRef>,
}

impl ImportResult {
    /// True when the service accepted at least one contact.
    pub fn is_imported(&self) -> bool {
        !self.imported.is_empty()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Async capability for one authenticated connection to the messaging service.
///
/// Methods take `&mut self`: a client is driven by exactly one worker and
/// never shared.
#[async_trait]
pub trait MessagingClient: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn is_authorized(&mut self) -> Result<bool>;

    async fn request_code(&mut self, phone: &str) -> Result<()>;

    async fn verify_code(&mut self, phone: &str, code: &str) -> Result<()>;

    /// Resolve a phone number. `Ok(None)` means the number is not known to the
    /// account, which is distinct from a failed call.
    async fn resolve_entity(&mut self, phone: &str) -> Result<Option<EntityRef>>;

    async fn register_contact(&mut self, phone: &str) -> Result<ImportResult>;

    async fn send_message(&mut self, to: &EntityRef, text: &str) -> Result<()>;

    async fn get_self(&mut self) -> Result<EntityRef>;

    async fn log_out(&mut self) -> Result<()>;

    /// Release the connection. Called once, when the worker exits.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Creates one client per session.
pub trait ClientFactory: Send + Sync {
    fn create(&self, session_id: &str, identity: &str) -> Box<dyn MessagingClient>;

    /// Backend name, used in logs.
    fn backend(&self) -> &'static str;
}

/// Build the client factory selected by configuration.
pub fn factory_from_config(
    config: &ClientConfig,
    credentials: &CredentialsConfig,
) -> Arc<dyn ClientFactory> {
    match config {
        ClientConfig::Loopback(loopback) => {
            let service = LoopbackService::new(loopback.code.clone());
            for phone in &loopback.users {
                service.add_user(phone);
            }
            Arc::new(LoopbackFactory::new(service))
        }
        ClientConfig::Subprocess(bridge) => {
            Arc::new(SubprocessFactory::new(bridge.clone(), credentials.clone()))
        }
    }
}
