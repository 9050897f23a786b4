//! Scripted messaging client for session tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    ClientError, ClientFactory, EntityRef, ImportResult, MessagingClient, Result,
};

pub(crate) const SCRIPTED_CODE: &str = "12345";
pub(crate) const SELF_ID: &str = "self";

/// Per-method call counters.
#[derive(Default)]
pub(crate) struct Calls {
    pub connect: AtomicUsize,
    pub is_authorized: AtomicUsize,
    pub request_code: AtomicUsize,
    pub verify_code: AtomicUsize,
    pub resolve_entity: AtomicUsize,
    pub register_contact: AtomicUsize,
    pub send_message: AtomicUsize,
    pub get_self: AtomicUsize,
    pub log_out: AtomicUsize,
    pub disconnect: AtomicUsize,
}

/// Shared, mutable behaviour of every client a [`ScriptedFactory`] creates.
#[derive(Default)]
pub(crate) struct Script {
    pub authorized: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_request_code: AtomicBool,
    pub fail_log_out: AtomicBool,
    pub import_succeeds: AtomicBool,
    /// Whether a contact becomes resolvable once imported.
    pub resolvable_after_import: AtomicBool,
    pub delay_ms: AtomicU64,
    pub calls: Calls,
    pub contacts: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn add_contact(&self, phone: &str) {
        self.contacts.lock().unwrap().insert(phone.to_string());
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total calls that reached the client after connect.
    pub fn calls_after_connect(&self) -> usize {
        let c = &self.calls;
        [
            &c.is_authorized,
            &c.request_code,
            &c.verify_code,
            &c.resolve_entity,
            &c.register_contact,
            &c.send_message,
            &c.get_self,
            &c.log_out,
        ]
        .iter()
        .map(|counter| Self::count(counter))
        .sum()
    }

    async fn enter(&self, counter: &AtomicUsize) -> InFlight<'_> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedClient {
    script: Arc<Script>,
}

#[async_trait]
impl MessagingClient for ScriptedClient {
    async fn connect(&mut self) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.connect).await;
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn is_authorized(&mut self) -> Result<bool> {
        let _guard = self.script.enter(&self.script.calls.is_authorized).await;
        Ok(self.script.authorized.load(Ordering::SeqCst))
    }

    async fn request_code(&mut self, _phone: &str) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.request_code).await;
        if self.script.fail_request_code.load(Ordering::SeqCst) {
            return Err(ClientError::service("flood_wait", "Too many requests"));
        }
        Ok(())
    }

    async fn verify_code(&mut self, _phone: &str, code: &str) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.verify_code).await;
        if code != SCRIPTED_CODE {
            return Err(ClientError::service("code_invalid", "The code is invalid"));
        }
        self.script.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve_entity(&mut self, phone: &str) -> Result<Option<EntityRef>> {
        let _guard = self.script.enter(&self.script.calls.resolve_entity).await;
        let known = self.script.contacts.lock().unwrap().contains(phone);
        Ok(known.then(|| EntityRef::new(phone)))
    }

    async fn register_contact(&mut self, phone: &str) -> Result<ImportResult> {
        let _guard = self.script.enter(&self.script.calls.register_contact).await;
        if !self.script.import_succeeds.load(Ordering::SeqCst) {
            return Ok(ImportResult::default());
        }
        if self.script.resolvable_after_import.load(Ordering::SeqCst) {
            self.script.add_contact(phone);
        }
        Ok(ImportResult {
            imported: vec![EntityRef::new(phone)],
        })
    }

    async fn send_message(&mut self, to: &EntityRef, text: &str) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.send_message).await;
        self.script
            .sent
            .lock()
            .unwrap()
            .push((to.id.clone(), text.to_string()));
        Ok(())
    }

    async fn get_self(&mut self) -> Result<EntityRef> {
        let _guard = self.script.enter(&self.script.calls.get_self).await;
        Ok(EntityRef::new(SELF_ID))
    }

    async fn log_out(&mut self) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.log_out).await;
        if self.script.fail_log_out.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection reset".to_string()));
        }
        self.script.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let _guard = self.script.enter(&self.script.calls.disconnect).await;
        Ok(())
    }
}

pub(crate) struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new(script: Arc<Script>) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self, _session_id: &str, _identity: &str) -> Box<dyn MessagingClient> {
        Box::new(ScriptedClient {
            script: self.script.clone(),
        })
    }

    fn backend(&self) -> &'static str {
        "scripted"
    }
}
