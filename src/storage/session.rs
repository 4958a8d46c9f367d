//! Session slot stores.
//!
//! Slot layout (key names from [`StorageKeys`]):
//! - `<prefix>_user_session`: session record (JSON)
//! - `<prefix>_wallet_address`: lowercased address of the session user
//!
//! Every save or clear publishes a [`StorageEvent`] so other handles on the
//! same storage learn about it without polling. In Redis the events travel
//! over pub/sub on `<prefix>_storage`.
//!
//! The session JSON carries the signature, so raw payloads are held in
//! `Zeroizing` buffers while being decoded.

use super::{new_origin, SessionSlots, SessionStore, StorageError, StorageEvent, StorageKeys};
use crate::models::{normalize_address, Session};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

const EVENT_CAPACITY: usize = 64;

/// Parse a stored session; garbage reads as absent.
fn decode_session(raw: String) -> Option<Session> {
    let data = Zeroizing::new(raw);
    match serde_json::from_str(&data) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unparsable session record");
            None
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

struct MemoryInner {
    entries: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    keys: StorageKeys,
}

/// Process-local slot. Handles from [`open_tab`](Self::open_tab) share the
/// same entries and see each other's events, like browser tabs sharing
/// `localStorage`.
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
    origin: String,
}

impl MemorySessionStore {
    pub fn new(keys: StorageKeys) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        MemorySessionStore {
            inner: Arc::new(MemoryInner {
                entries: Mutex::new(HashMap::new()),
                events,
                keys,
            }),
            origin: new_origin(),
        }
    }

    /// Another handle on the same slot with its own origin.
    pub fn open_tab(&self) -> Self {
        MemorySessionStore {
            inner: Arc::clone(&self.inner),
            origin: new_origin(),
        }
    }

    /// Write a raw value under `key`, notifying like a real write.
    pub fn write_raw(&self, key: &str, value: Option<&str>) {
        {
            let mut entries = self.inner.entries.lock();
            match value {
                Some(v) => entries.insert(key.to_string(), v.to_string()),
                None => entries.remove(key),
            };
        }
        self.notify(key, value.map(str::to_string));
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine.
        let _ = self.inner.events.send(StorageEvent {
            origin: self.origin.clone(),
            key: key.to_string(),
            new_value,
        });
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        MemorySessionStore::new(StorageKeys::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)?;
        let address = normalize_address(&session.user.address);
        {
            let mut entries = self.inner.entries.lock();
            entries.insert(self.inner.keys.session.clone(), json.clone());
            entries.insert(self.inner.keys.address.clone(), address.clone());
        }
        self.notify(&self.inner.keys.session, Some(json));
        self.notify(&self.inner.keys.address, Some(address));
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let raw = self.inner.entries.lock().get(&self.inner.keys.session).cloned();
        Ok(raw.and_then(decode_session))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let (had_session, had_address) = {
            let mut entries = self.inner.entries.lock();
            (
                entries.remove(&self.inner.keys.session).is_some(),
                entries.remove(&self.inner.keys.address).is_some(),
            )
        };
        if had_session {
            self.notify(&self.inner.keys.session, None);
        }
        if had_address {
            self.notify(&self.inner.keys.address, None);
        }
        Ok(())
    }

    async fn load_address(&self) -> Result<Option<String>, StorageError> {
        Ok(self.inner.entries.lock().get(&self.inner.keys.address).cloned())
    }

    fn keys(&self) -> &StorageKeys {
        &self.inner.keys
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.events.subscribe()
    }
}

/// In-memory slots by key set. A slot lives while some handle on it does.
#[derive(Default)]
pub struct MemorySessionSlots {
    slots: Mutex<HashMap<String, Weak<MemoryInner>>>,
}

impl MemorySessionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle on the slot for `keys`, creating it if needed.
    pub fn open_tab(&self, keys: StorageKeys) -> MemorySessionStore {
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| slot.strong_count() > 0);

        if let Some(inner) = slots.get(&keys.session).and_then(Weak::upgrade) {
            return MemorySessionStore {
                inner,
                origin: new_origin(),
            };
        }

        let store = MemorySessionStore::new(keys);
        slots.insert(
            store.inner.keys.session.clone(),
            Arc::downgrade(&store.inner),
        );
        store
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionSlots for MemorySessionSlots {
    async fn open(&self, keys: StorageKeys) -> Result<Arc<dyn SessionStore>, StorageError> {
        Ok(Arc::new(self.open_tab(keys)))
    }
}

// ============================================================================
// Redis
// ============================================================================

/// Slot kept in Redis; every process connected to the same server and
/// prefix shares it.
pub struct RedisSessionStore {
    con: redis::aio::MultiplexedConnection,
    keys: StorageKeys,
    origin: String,
    events: broadcast::Sender<StorageEvent>,
    listener: JoinHandle<()>,
}

impl RedisSessionStore {
    /// Open a connection and start forwarding change events.
    pub async fn connect(client: &redis::Client, keys: StorageKeys) -> Result<Self, StorageError> {
        let con = client.get_multiplexed_async_connection().await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&keys.channel).await?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let forward = events.clone();
        let channel = keys.channel.clone();
        let listener = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable storage event payload");
                        continue;
                    }
                };
                match serde_json::from_str::<StorageEvent>(&payload) {
                    Ok(event) => {
                        let _ = forward.send(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "Malformed storage event"),
                }
            }
            tracing::warn!(channel = %channel, "Storage event channel closed");
        });

        Ok(RedisSessionStore {
            con,
            keys,
            origin: new_origin(),
            events,
            listener,
        })
    }

    async fn publish(&self, key: &str, new_value: Option<String>) -> Result<(), StorageError> {
        let event = StorageEvent {
            origin: self.origin.clone(),
            key: key.to_string(),
            new_value,
        };
        let payload = serde_json::to_string(&event)?;
        let mut con = self.con.clone();
        con.publish::<_, _, ()>(&self.keys.channel, payload).await?;
        Ok(())
    }
}

/// Redis slots by key set. Each handle holds its own pub/sub listener.
pub struct RedisSessionSlots {
    client: redis::Client,
}

impl RedisSessionSlots {
    pub fn new(client: redis::Client) -> Self {
        RedisSessionSlots { client }
    }
}

#[async_trait]
impl SessionSlots for RedisSessionSlots {
    async fn open(&self, keys: StorageKeys) -> Result<Arc<dyn SessionStore>, StorageError> {
        Ok(Arc::new(RedisSessionStore::connect(&self.client, keys).await?))
    }
}

impl Drop for RedisSessionStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)?;
        let address = normalize_address(&session.user.address);

        let mut con = self.con.clone();
        con.set::<_, _, ()>(&self.keys.session, &json).await?;
        con.set::<_, _, ()>(&self.keys.address, &address).await?;

        self.publish(&self.keys.session, Some(json)).await?;
        self.publish(&self.keys.address, Some(address)).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let mut con = self.con.clone();
        let raw: Option<String> = con.get(&self.keys.session).await?;
        Ok(raw.and_then(decode_session))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut con = self.con.clone();
        let removed: i32 = con.del(&[&self.keys.session, &self.keys.address]).await?;
        if removed > 0 {
            self.publish(&self.keys.session, None).await?;
            self.publish(&self.keys.address, None).await?;
        }
        Ok(())
    }

    async fn load_address(&self) -> Result<Option<String>, StorageError> {
        let mut con = self.con.clone();
        Ok(con.get(&self.keys.address).await?)
    }

    fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, Role};
    use chrono::Utc;

    fn session(address: &str) -> Session {
        let now = Utc::now();
        Session {
            user: Profile {
                id: "p1".to_string(),
                address: address.to_string(),
                role: Role::Consumer,
                name: Some("Usuario".to_string()),
                email: None,
                organization: None,
                created_at: now,
                updated_at: now,
                is_active: true,
            },
            signature: "0xsig".to_string(),
            message: "Agro-bootcamp Authentication".to_string(),
            timestamp: now.timestamp_millis(),
        }
    }

    #[tokio::test]
    async fn test_memory_save_load_clear() {
        let store = MemorySessionStore::default();
        assert!(store.load().await.unwrap().is_none());

        let s = session("0xAbC");
        store.save(&s).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(s));
        assert_eq!(store.load_address().await.unwrap().as_deref(), Some("0xabc"));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(store.load_address().await.unwrap().is_none());

        // Idempotent
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_save_overwrites_slot() {
        let store = MemorySessionStore::default();
        store.save(&session("0xaaa")).await.unwrap();
        store.save(&session("0xbbb")).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().user.address, "0xbbb");
        assert_eq!(store.load_address().await.unwrap().as_deref(), Some("0xbbb"));
    }

    #[tokio::test]
    async fn test_memory_unparsable_reads_absent() {
        let store = MemorySessionStore::default();
        let key = store.keys().session.clone();
        store.write_raw(&key, Some("{not json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_tabs_share_slot_and_events() {
        let tab_a = MemorySessionStore::default();
        let tab_b = tab_a.open_tab();
        assert_ne!(tab_a.origin(), tab_b.origin());

        let mut events = tab_b.subscribe();
        tab_a.save(&session("0xabc")).await.unwrap();

        assert_eq!(tab_b.load().await.unwrap().unwrap().user.address, "0xabc");

        let event = events.recv().await.unwrap();
        assert_eq!(event.origin, tab_a.origin());
        assert_eq!(event.key, tab_a.keys().session);
        assert!(event.new_value.is_some());

        let _address_event = events.recv().await.unwrap();

        tab_a.clear().await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.key, tab_a.keys().session);
        assert!(event.new_value.is_none());
    }

    #[tokio::test]
    async fn test_memory_clear_of_empty_slot_is_silent() {
        let store = MemorySessionStore::default();
        let mut events = store.subscribe();
        store.clear().await.unwrap();
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_memory_slots_are_separate_per_key_set() {
        let slots = MemorySessionSlots::new();
        let alice = slots.open_tab(StorageKeys::new("agro_alice"));
        let bob = slots.open_tab(StorageKeys::new("agro_bob"));

        alice.save(&session("0xaaa")).await.unwrap();
        assert!(bob.load().await.unwrap().is_none());

        let alice_again = slots.open(StorageKeys::new("agro_alice")).await.unwrap();
        assert_ne!(alice_again.origin(), alice.origin());
        assert_eq!(
            alice_again.load().await.unwrap().unwrap().user.address,
            "0xaaa"
        );
        assert_eq!(slots.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_slot_released_with_last_handle() {
        let slots = MemorySessionSlots::new();
        let tab = slots.open_tab(StorageKeys::new("agro_gone"));
        tab.save(&session("0xabc")).await.unwrap();
        drop(tab);
        assert!(slots.is_empty());

        let fresh = slots.open_tab(StorageKeys::new("agro_gone"));
        assert!(fresh.load().await.unwrap().is_none());
    }

    async fn redis_store(prefix: &str) -> Option<RedisSessionStore> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(redis_url).ok()?;
        match RedisSessionStore::connect(&client, StorageKeys::new(prefix)).await {
            Ok(store) => Some(store),
            Err(_) => {
                eprintln!("Skipping test: Redis connection failed");
                None
            }
        }
    }

    #[tokio::test]
    async fn test_redis_save_load_clear() {
        let prefix = format!("test_session_{}", nanoid::nanoid!(6));
        let Some(store) = redis_store(&prefix).await else {
            return;
        };

        store.clear().await.unwrap();
        let s = session("0xDEF");
        store.save(&s).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(s));
        assert_eq!(store.load_address().await.unwrap().as_deref(), Some("0xdef"));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_events_reach_other_handles() {
        let prefix = format!("test_session_{}", nanoid::nanoid!(6));
        let Some(writer) = redis_store(&prefix).await else {
            return;
        };
        let Some(reader) = redis_store(&prefix).await else {
            return;
        };

        let mut events = reader.subscribe();
        writer.save(&session("0xabc")).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .expect("no storage event")
            .unwrap();
        assert_eq!(event.origin, writer.origin());
        assert_eq!(event.key, writer.keys().session);

        writer.clear().await.unwrap();
    }
}
