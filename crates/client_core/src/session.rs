//! Credential storage and the session context handed to the transport layer.
//!
//! The gateway reads the bearer token from [`SessionContext`] on every call
//! and calls [`SessionContext::expire`] when the API answers 401. Callers
//! learn about it through [`SessionContext::subscribe`] instead of a redirect
//! buried in the HTTP layer.

use std::sync::{Arc, PoisonError, RwLock};

use shared::domain::UserId;
use tokio::sync::broadcast;
use tracing::{info, warn};

const SESSION_EVENT_BUFFER: usize = 16;

pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear_token(&self);
    fn user_id(&self) -> Option<UserId>;
    fn set_user_id(&self, user_id: UserId);
    fn clear_user_id(&self);

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn logout(&self) {
        self.clear_token();
        self.clear_user_id();
    }
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    token: Option<String>,
    user_id: Option<UserId>,
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    fn read(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, apply: impl FnOnce(&mut Credentials)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.read().token
    }

    fn set_token(&self, token: String) {
        self.write(|creds| creds.token = Some(token));
    }

    fn clear_token(&self) {
        self.write(|creds| creds.token = None);
    }

    fn user_id(&self) -> Option<UserId> {
        self.read().user_id
    }

    fn set_user_id(&self, user_id: UserId) {
        self.write(|creds| creds.user_id = Some(user_id));
    }

    fn clear_user_id(&self) {
        self.write(|creds| creds.user_id = None);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { user_id: UserId },
    /// The API rejected the bearer token; credentials have been cleared.
    Expired,
    LoggedOut,
}

pub struct SessionContext {
    store: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn CredentialStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENT_BUFFER);
        Arc::new(Self { store, events })
    }

    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryCredentialStore::default()))
    }

    pub fn token(&self) -> Option<String> {
        self.store.token()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.store.user_id()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn establish(&self, user_id: UserId, token: String) {
        self.store.set_token(token);
        self.store.set_user_id(user_id.clone());
        info!(user_id = %user_id, "session: authenticated");
        let _ = self.events.send(SessionEvent::Authenticated { user_id });
    }

    pub fn expire(&self) {
        let had_token = self.store.is_authenticated();
        self.store.logout();
        warn!(had_token, "session: credentials rejected by server; session expired");
        let _ = self.events.send(SessionEvent::Expired);
    }

    pub fn logout(&self) {
        self.store.logout();
        info!("session: logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
