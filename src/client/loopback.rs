//! In-memory messaging service.
//!
//! `LoopbackService` models the parts of the real service that matter to a
//! session: registered users, confirmation codes, per-account contact lists
//! (entities only resolve once they are contacts), and delivered messages.
//! Authorizations outlive a single client, so a second session for the same
//! phone starts out authorized until it logs out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use telebridge_bridge_protocol::error_codes;
use tracing::debug;

use super::{ClientError, ClientFactory, EntityRef, ImportResult, MessagingClient, Result};

/// Code accepted when none is configured.
pub const DEFAULT_LOOPBACK_CODE: &str = "00000";

// ============================================================================
// Service
// ============================================================================

/// Shared in-memory messaging service. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    code: String,
    /// Registered users: phone -> entity id.
    users: DashMap<String, String>,
    next_user_id: AtomicU64,
    /// Phones with an outstanding confirmation code.
    pending_codes: DashSet<String>,
    /// Phones with a live authorization.
    authorized: DashSet<String>,
    /// Contacts per account phone.
    contacts: DashMap<String, HashSet<String>>,
    delivered: Mutex<Vec<DeliveredMessage>>,
    offline: AtomicBool,
    calls: Counters,
}

/// A message accepted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub from: String,
    pub to_id: String,
    pub text: String,
}

#[derive(Default)]
struct Counters {
    connect: AtomicU64,
    request_code: AtomicU64,
    verify_code: AtomicU64,
    resolve_entity: AtomicU64,
    register_contact: AtomicU64,
    send_message: AtomicU64,
    log_out: AtomicU64,
    disconnect: AtomicU64,
}

/// Snapshot of how often each capability was called, across all clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connect: u64,
    pub request_code: u64,
    pub verify_code: u64,
    pub resolve_entity: u64,
    pub register_contact: u64,
    pub send_message: u64,
    pub log_out: u64,
    pub disconnect: u64,
}

impl LoopbackService {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                code: code.into(),
                users: DashMap::new(),
                next_user_id: AtomicU64::new(1000),
                pending_codes: DashSet::new(),
                authorized: DashSet::new(),
                contacts: DashMap::new(),
                delivered: Mutex::new(Vec::new()),
                offline: AtomicBool::new(false),
                calls: Counters::default(),
            }),
        }
    }

    /// Register a user on the service. Returns its entity id.
    pub fn add_user(&self, phone: &str) -> String {
        self.inner
            .users
            .entry(phone.to_string())
            .or_insert_with(|| {
                self.inner
                    .next_user_id
                    .fetch_add(1, Ordering::Relaxed)
                    .to_string()
            })
            .clone()
    }

    /// Mark an account as already authorized.
    pub fn authorize(&self, phone: &str) {
        self.add_user(phone);
        self.inner.authorized.insert(phone.to_string());
    }

    pub fn is_authorized(&self, phone: &str) -> bool {
        self.inner.authorized.contains(phone)
    }

    /// Make every subsequent `connect` fail.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.lock_delivered().clone()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.inner.calls;
        CallCounts {
            connect: c.connect.load(Ordering::SeqCst),
            request_code: c.request_code.load(Ordering::SeqCst),
            verify_code: c.verify_code.load(Ordering::SeqCst),
            resolve_entity: c.resolve_entity.load(Ordering::SeqCst),
            register_contact: c.register_contact.load(Ordering::SeqCst),
            send_message: c.send_message.load(Ordering::SeqCst),
            log_out: c.log_out.load(Ordering::SeqCst),
            disconnect: c.disconnect.load(Ordering::SeqCst),
        }
    }

    fn user_id(&self, phone: &str) -> Option<String> {
        self.inner.users.get(phone).map(|id| id.clone())
    }

    fn is_contact(&self, owner: &str, phone: &str) -> bool {
        self.inner
            .contacts
            .get(owner)
            .is_some_and(|contacts| contacts.contains(phone))
    }

    fn lock_delivered(&self) -> std::sync::MutexGuard<'_, Vec<DeliveredMessage>> {
        // A panic while pushing cannot leave the vector half-written.
        self.inner
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new(DEFAULT_LOOPBACK_CODE)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client bound to one account phone on a [`LoopbackService`].
pub struct LoopbackClient {
    service: LoopbackService,
    phone: String,
    connected: bool,
}

impl LoopbackClient {
    pub fn new(service: LoopbackService, phone: impl Into<String>) -> Self {
        Self {
            service,
            phone: phone.into(),
            connected: false,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn ensure_authorized(&self) -> Result<()> {
        self.ensure_connected()?;
        if self.service.is_authorized(&self.phone) {
            Ok(())
        } else {
            Err(ClientError::service(
                error_codes::UNAUTHORIZED,
                "The account is not signed in",
            ))
        }
    }

    fn count(&self, counter: impl Fn(&Counters) -> &AtomicU64) {
        counter(&self.service.inner.calls).fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingClient for LoopbackClient {
    async fn connect(&mut self) -> Result<()> {
        self.count(|c| &c.connect);
        if self.service.inner.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(
                "loopback service is offline".to_string(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn is_authorized(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.service.is_authorized(&self.phone))
    }

    async fn request_code(&mut self, phone: &str) -> Result<()> {
        self.count(|c| &c.request_code);
        self.ensure_connected()?;
        self.service.inner.pending_codes.insert(phone.to_string());
        debug!(phone = %phone, "Loopback confirmation code issued");
        Ok(())
    }

    async fn verify_code(&mut self, phone: &str, code: &str) -> Result<()> {
        self.count(|c| &c.verify_code);
        self.ensure_connected()?;
        if !self.service.inner.pending_codes.contains(phone) {
            return Err(ClientError::service(
                error_codes::CODE_INVALID,
                "No confirmation code was requested for this phone number",
            ));
        }
        if code != self.service.inner.code {
            return Err(ClientError::service(
                error_codes::CODE_INVALID,
                "The confirmation code is invalid",
            ));
        }
        self.service.inner.pending_codes.remove(phone);
        self.service.authorize(phone);
        Ok(())
    }

    async fn resolve_entity(&mut self, phone: &str) -> Result<Option<EntityRef>> {
        self.count(|c| &c.resolve_entity);
        self.ensure_authorized()?;
        if phone != self.phone && !self.service.is_contact(&self.phone, phone) {
            return Ok(None);
        }
        Ok(self.service.user_id(phone).map(EntityRef::new))
    }

    async fn register_contact(&mut self, phone: &str) -> Result<ImportResult> {
        self.count(|c| &c.register_contact);
        self.ensure_authorized()?;
        let Some(id) = self.service.user_id(phone) else {
            return Ok(ImportResult::default());
        };
        self.service
            .inner
            .contacts
            .entry(self.phone.clone())
            .or_default()
            .insert(phone.to_string());
        Ok(ImportResult {
            imported: vec![EntityRef::new(id)],
        })
    }

    async fn send_message(&mut self, to: &EntityRef, text: &str) -> Result<()> {
        self.count(|c| &c.send_message);
        self.ensure_authorized()?;
        self.service.lock_delivered().push(DeliveredMessage {
            from: self.phone.clone(),
            to_id: to.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn get_self(&mut self) -> Result<EntityRef> {
        self.ensure_authorized()?;
        Ok(EntityRef::new(self.service.add_user(&self.phone)))
    }

    async fn log_out(&mut self) -> Result<()> {
        self.count(|c| &c.log_out);
        self.ensure_authorized()?;
        self.service.inner.authorized.remove(&self.phone);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.count(|c| &c.disconnect);
        self.connected = false;
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Creates [`LoopbackClient`]s that share one [`LoopbackService`].
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    service: LoopbackService,
}

impl LoopbackFactory {
    pub fn new(service: LoopbackService) -> Self {
        Self { service }
    }
}

impl ClientFactory for LoopbackFactory {
    fn create(&self, _session_id: &str, identity: &str) -> Box<dyn MessagingClient> {
        Box::new(LoopbackClient::new(self.service.clone(), identity))
    }

    fn backend(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn signed_in(service: &LoopbackService, phone: &str) -> LoopbackClient {
        let mut client = LoopbackClient::new(service.clone(), phone);
        client.connect().await.unwrap();
        client.request_code(phone).await.unwrap();
        client.verify_code(phone, DEFAULT_LOOPBACK_CODE).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_calls_require_connect() {
        let mut client = LoopbackClient::new(LoopbackService::default(), "+1555");
        let err = client.request_code("+1555").await.unwrap_err();
        assert_eq!(err, ClientError::NotConnected);
    }

    #[tokio::test]
    async fn test_offline_service_rejects_connect() {
        let service = LoopbackService::default();
        service.set_offline(true);
        let mut client = LoopbackClient::new(service, "+1555");
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_code_is_rejected() {
        let service = LoopbackService::default();
        let mut client = LoopbackClient::new(service.clone(), "+1555");
        client.connect().await.unwrap();
        client.request_code("+1555").await.unwrap();

        let err = client.verify_code("+1555", "99999").await.unwrap_err();
        assert!(matches!(err, ClientError::Service { ref code, .. } if code == error_codes::CODE_INVALID));
        assert!(!service.is_authorized("+1555"));
    }

    #[tokio::test]
    async fn test_verify_without_request_is_rejected() {
        let mut client = LoopbackClient::new(LoopbackService::default(), "+1555");
        client.connect().await.unwrap();
        assert!(client.verify_code("+1555", DEFAULT_LOOPBACK_CODE).await.is_err());
    }

    #[tokio::test]
    async fn test_strangers_resolve_only_after_import() {
        let service = LoopbackService::default();
        service.add_user("+1777");
        let mut client = signed_in(&service, "+1555").await;

        assert_eq!(client.resolve_entity("+1777").await.unwrap(), None);

        let result = client.register_contact("+1777").await.unwrap();
        assert!(result.is_imported());
        assert!(client.resolve_entity("+1777").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_phone_is_not_imported() {
        let service = LoopbackService::default();
        let mut client = signed_in(&service, "+1555").await;

        let result = client.register_contact("+1999").await.unwrap();
        assert!(!result.is_imported());
    }

    #[tokio::test]
    async fn test_send_to_self_is_recorded() {
        let service = LoopbackService::default();
        let mut client = signed_in(&service, "+1555").await;

        let me = client.get_self().await.unwrap();
        client.send_message(&me, "hi").await.unwrap();

        let delivered = service.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to_id, me.id);
        assert_eq!(delivered[0].text, "hi");
    }

    #[tokio::test]
    async fn test_log_out_revokes_authorization() {
        let service = LoopbackService::default();
        let mut client = signed_in(&service, "+1555").await;
        assert!(client.is_authorized().await.unwrap());

        client.log_out().await.unwrap();
        assert!(!service.is_authorized("+1555"));
        assert_eq!(service.calls().log_out, 1);
    }
}
