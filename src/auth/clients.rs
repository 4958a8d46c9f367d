//! Per-client auth contexts.
//!
//! Every browser gets an opaque client id (see [`crate::middleware::client_id`])
//! and its own session slot under `<prefix>_<client id>`. Tabs of one browser
//! share the id, so they share the slot and see each other's sign-ins and
//! sign-outs. Contexts idle past the timeout, or beyond capacity, are evicted
//! oldest first; a Redis slot outlives its context and is restored on the
//! next request.

use super::context::AuthContext;
use super::service::{AuthService, DEFAULT_AUTH_MESSAGE, DEFAULT_SESSION_MAX_AGE};
use super::wallet::{DisconnectedWallet, Wallet};
use crate::storage::{
    ProfileRepository, SessionSlots, StorageError, StorageKeys, DEFAULT_STORAGE_PREFIX,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

const CLIENT_ID_LENGTH: usize = 21;

/// Opaque per-browser identifier carried in a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        ClientId(nanoid::nanoid!(CLIENT_ID_LENGTH))
    }

    /// Accepts only ids this server could have issued.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == CLIENT_ID_LENGTH
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| ClientId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ClientEntry {
    auth: Arc<AuthContext>,
    last_seen: Instant,
}

pub struct ClientRegistry {
    profiles: Arc<dyn ProfileRepository>,
    slots: Arc<dyn SessionSlots>,
    wallet: Arc<dyn Wallet>,
    prefix: String,
    max_age: Duration,
    challenge_message: String,
    idle_timeout: Duration,
    capacity: usize,
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new(profiles: Arc<dyn ProfileRepository>, slots: Arc<dyn SessionSlots>) -> Self {
        ClientRegistry {
            profiles,
            slots,
            wallet: Arc::new(DisconnectedWallet),
            prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            max_age: DEFAULT_SESSION_MAX_AGE,
            challenge_message: DEFAULT_AUTH_MESSAGE.to_string(),
            idle_timeout: DEFAULT_SESSION_MAX_AGE,
            capacity: DEFAULT_MAX_CLIENTS,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Session lifetime. Also the idle timeout: a context unused for that
    /// long could only hold an expired session.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self.idle_timeout = max_age;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_challenge_message(mut self, message: impl Into<String>) -> Self {
        self.challenge_message = message.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = wallet;
        self
    }

    /// Slot keys of one client.
    pub fn keys_for(&self, client: &ClientId) -> StorageKeys {
        StorageKeys::new(&format!("{}_{}", self.prefix, client))
    }

    /// The client's auth context, restoring its stored session on first use.
    pub async fn context(&self, client: &ClientId) -> Result<Arc<AuthContext>, StorageError> {
        if let Some(auth) = self.touch(client) {
            return Ok(auth);
        }

        let sessions = self.slots.open(self.keys_for(client)).await?;
        let service = AuthService::new(Arc::clone(&self.profiles), sessions)
            .with_max_age(self.max_age)
            .with_challenge_message(self.challenge_message.clone());
        let auth = Arc::new(AuthContext::new(service, Arc::clone(&self.wallet)));
        auth.init().await;

        let mut clients = self.clients.lock();
        // A concurrent first request may have won.
        if let Some(entry) = clients.get_mut(client) {
            entry.last_seen = Instant::now();
            return Ok(Arc::clone(&entry.auth));
        }

        self.evict(&mut clients);
        clients.insert(
            client.clone(),
            ClientEntry {
                auth: Arc::clone(&auth),
                last_seen: Instant::now(),
            },
        );
        if let Some(user) = auth.state().user {
            tracing::debug!(address = %user.address, "Restored client session");
        }
        Ok(auth)
    }

    fn touch(&self, client: &ClientId) -> Option<Arc<AuthContext>> {
        let mut clients = self.clients.lock();
        let entry = clients.get_mut(client)?;
        entry.last_seen = Instant::now();
        Some(Arc::clone(&entry.auth))
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Drop idle contexts, then the least recently seen until one slot is free.
    fn evict(&self, clients: &mut HashMap<ClientId, ClientEntry>) {
        let before = clients.len();
        clients.retain(|_, entry| entry.last_seen.elapsed() < self.idle_timeout);

        while clients.len() >= self.capacity {
            let oldest = clients
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    clients.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before - clients.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = clients.len(), "Evicted client contexts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::wallet::LocalWallet;
    use crate::models::{LoginCredentials, Role};
    use crate::storage::{MemoryProfiles, MemorySessionSlots, SessionStore};

    struct Harness {
        registry: ClientRegistry,
        slots: Arc<MemorySessionSlots>,
    }

    fn harness() -> Harness {
        let slots = Arc::new(MemorySessionSlots::new());
        Harness {
            registry: ClientRegistry::new(Arc::new(MemoryProfiles::new()), slots.clone()),
            slots,
        }
    }

    fn credentials(wallet: &LocalWallet) -> LoginCredentials {
        LoginCredentials {
            address: wallet.address_string(),
            signature: Some(wallet.sign_personal_message(DEFAULT_AUTH_MESSAGE).unwrap()),
            message: Some(DEFAULT_AUTH_MESSAGE.to_string()),
        }
    }

    #[test]
    fn test_client_id_parse() {
        let id = ClientId::generate();
        assert_eq!(ClientId::parse(id.as_str()), Some(id));
        assert!(ClientId::parse("").is_none());
        assert!(ClientId::parse("short").is_none());
        assert!(ClientId::parse("abcdefghij;klmnopqrst").is_none());
        assert!(ClientId::parse(&"a".repeat(64)).is_none());
    }

    #[tokio::test]
    async fn test_same_client_gets_same_context() {
        let h = harness();
        let client = ClientId::generate();
        let first = h.registry.context(&client).await.unwrap();
        let second = h.registry.context(&client).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_clients_do_not_share_sessions() {
        let h = harness();
        let alice = ClientId::generate();
        let bob = ClientId::generate();
        let wallet = LocalWallet::random();

        let alice_auth = h.registry.context(&alice).await.unwrap();
        alice_auth.login(credentials(&wallet)).await.unwrap();
        assert!(alice_auth.refresh().await.is_authenticated);

        let bob_auth = h.registry.context(&bob).await.unwrap();
        let state = bob_auth.refresh().await;
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(!state.has_permission(crate::auth::Permission::ViewAllData));

        // Bob signing out leaves Alice signed in.
        bob_auth.logout().await;
        assert!(alice_auth.refresh().await.is_authenticated);
    }

    #[tokio::test]
    async fn test_client_slot_uses_prefixed_keys() {
        let h = harness();
        let registry = h.registry.with_prefix("farm");
        let client = ClientId::generate();
        let keys = registry.keys_for(&client);
        assert_eq!(keys.session, format!("farm_{}_user_session", client));

        let wallet = LocalWallet::random();
        let auth = registry.context(&client).await.unwrap();
        auth.login(credentials(&wallet)).await.unwrap();

        let tab = h.slots.open_tab(keys);
        let session = tab.load().await.unwrap().unwrap();
        assert_eq!(session.user.address, wallet.address_string().to_lowercase());
        assert_eq!(session.user.role, Role::Consumer);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let h = harness();
        let registry = h.registry.with_capacity(2);
        let first = ClientId::generate();
        let second = ClientId::generate();
        let third = ClientId::generate();

        registry.context(&first).await.unwrap();
        registry.context(&second).await.unwrap();
        // Touch the first so the second is the oldest.
        registry.context(&first).await.unwrap();
        registry.context(&third).await.unwrap();

        assert_eq!(registry.len(), 2);
        let clients = registry.clients.lock();
        assert!(clients.contains_key(&first));
        assert!(!clients.contains_key(&second));
        assert!(clients.contains_key(&third));
    }

    #[tokio::test]
    async fn test_idle_contexts_are_evicted() {
        let h = harness();
        let registry = h.registry.with_idle_timeout(Duration::ZERO);
        registry.context(&ClientId::generate()).await.unwrap();
        registry.context(&ClientId::generate()).await.unwrap();
        assert_eq!(registry.len(), 1);
        // The evicted client's memory slot went with it.
        assert_eq!(h.slots.len(), 1);
    }
}
