//! Storage layer: the session slot and the profile record store.
//!
//! Both sit behind traits so the auth service can run against Redis, the
//! hosted PostgREST backend, or in-memory stores in tests and local mode.

pub mod postgrest;
pub mod profile;
pub mod session;

use crate::models::{NewProfile, ProfileChanges, ProfileKey, ProfileRecord, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

pub use postgrest::PostgrestProfiles;
pub use profile::{MemoryProfiles, RedisProfiles};
pub use session::{MemorySessionSlots, MemorySessionStore, RedisSessionSlots, RedisSessionStore};

/// Session slot transport failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Profile store failures, passed through to callers unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Profile not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("{message} (code {code})")]
    Backend { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for RepositoryError {
    fn from(err: redis::RedisError) -> Self {
        RepositoryError::Transport(format!("Redis error: {}", err))
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RepositoryError::Decode(err.to_string())
        } else {
            RepositoryError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Decode(err.to_string())
    }
}

/// Query surface of the profile record store.
///
/// Address uniqueness is the store's job; a losing concurrent insert
/// surfaces as [`RepositoryError::Conflict`].
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// `address` is normalized by the caller.
    async fn find_by_address(&self, address: &str)
        -> Result<Option<ProfileRecord>, RepositoryError>;

    async fn insert(&self, profile: NewProfile) -> Result<ProfileRecord, RepositoryError>;

    async fn update(
        &self,
        key: &ProfileKey,
        changes: &ProfileChanges,
    ) -> Result<ProfileRecord, RepositoryError>;
}

pub const DEFAULT_STORAGE_PREFIX: &str = "agro_bootcamp";

/// Key names of the session slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub session: String,
    pub address: String,
    /// Change notification channel.
    pub channel: String,
}

impl StorageKeys {
    pub fn new(prefix: &str) -> Self {
        StorageKeys {
            session: format!("{}_user_session", prefix),
            address: format!("{}_wallet_address", prefix),
            channel: format!("{}_storage", prefix),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        StorageKeys::new(DEFAULT_STORAGE_PREFIX)
    }
}

/// A write to the session slot, as seen by other handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// Handle that performed the write.
    pub origin: String,
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Single-slot session persistence with change notification.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Overwrite the slot and the address record.
    async fn save(&self, session: &Session) -> Result<(), StorageError>;

    /// Empty or unparsable slots read as `None`.
    async fn load(&self) -> Result<Option<Session>, StorageError>;

    /// Remove both records. Idempotent.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Lowercased address of the stored session, if any.
    async fn load_address(&self) -> Result<Option<String>, StorageError>;

    fn keys(&self) -> &StorageKeys;

    /// Identifies this handle in emitted events.
    fn origin(&self) -> &str;

    /// Events for every write on the slot, including this handle's own.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Opens session slots by key set, one per client.
///
/// Opening the same keys twice yields two handles on one slot.
#[async_trait]
pub trait SessionSlots: Send + Sync {
    async fn open(&self, keys: StorageKeys) -> Result<Arc<dyn SessionStore>, StorageError>;
}

/// Generate a handle origin id.
pub(crate) fn new_origin() -> String {
    nanoid::nanoid!(10)
}
