//! Profile record stores: in-memory and Redis.
//!
//! Redis key patterns:
//! - `profile:{id}`: profile row (JSON)
//! - `profile_address:{address}`: address lookup to profile id (STRING)
//!
//! The address key is claimed with `SET NX` before the row is written, so
//! two concurrent inserts for one address cannot both succeed.

use super::{ProfileRepository, RepositoryError};
use crate::models::{normalize_address, NewProfile, ProfileChanges, ProfileKey, ProfileRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;

fn duplicate_address(address: &str) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "duplicate key value violates unique constraint \"profiles_address_key\" ({})",
        address
    ))
}

fn new_record(profile: NewProfile) -> ProfileRecord {
    let now = Utc::now();
    ProfileRecord {
        id: nanoid::nanoid!(12),
        address: normalize_address(&profile.address),
        role: profile.role,
        name: profile.name,
        email: profile.email,
        organization: profile.organization,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Local profile store. Stands in for the hosted backend in local mode and
/// in tests.
#[derive(Default)]
pub struct MemoryProfiles {
    rows: Mutex<HashMap<String, ProfileRecord>>,
}

impl MemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl ProfileRepository for MemoryProfiles {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<ProfileRecord>, RepositoryError> {
        let address = normalize_address(address);
        Ok(self
            .rows
            .lock()
            .values()
            .find(|row| row.address == address)
            .cloned())
    }

    async fn insert(&self, profile: NewProfile) -> Result<ProfileRecord, RepositoryError> {
        let record = new_record(profile);
        let mut rows = self.rows.lock();
        if rows.values().any(|row| row.address == record.address) {
            return Err(duplicate_address(&record.address));
        }
        rows.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        key: &ProfileKey,
        changes: &ProfileChanges,
    ) -> Result<ProfileRecord, RepositoryError> {
        let mut rows = self.rows.lock();
        let row = match key {
            ProfileKey::Id(id) => rows.get_mut(id),
            ProfileKey::Address(address) => {
                let address = normalize_address(address);
                rows.values_mut().find(|row| row.address == address)
            }
        }
        .ok_or(RepositoryError::NotFound)?;

        changes.apply_to(row, Utc::now());
        Ok(row.clone())
    }
}

// ============================================================================
// Redis
// ============================================================================

/// Profiles kept in Redis without TTL.
#[derive(Clone)]
pub struct RedisProfiles {
    con: redis::aio::MultiplexedConnection,
}

impl RedisProfiles {
    pub async fn connect(client: &redis::Client) -> Result<Self, RepositoryError> {
        let con = client.get_multiplexed_async_connection().await?;
        Ok(RedisProfiles { con })
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ProfileRecord>, RepositoryError> {
        let mut con = self.con.clone();
        let json: Option<String> = con.get(format!("profile:{}", id)).await?;
        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn id_for_address(&self, address: &str) -> Result<Option<String>, RepositoryError> {
        let mut con = self.con.clone();
        let key = format!("profile_address:{}", normalize_address(address));
        Ok(con.get(&key).await?)
    }

    async fn put(&self, record: &ProfileRecord) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(record)?;
        let mut con = self.con.clone();
        con.set::<_, _, ()>(format!("profile:{}", record.id), json)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for RedisProfiles {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<ProfileRecord>, RepositoryError> {
        match self.id_for_address(address).await? {
            Some(id) => self.get_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn insert(&self, profile: NewProfile) -> Result<ProfileRecord, RepositoryError> {
        let record = new_record(profile);
        let address_key = format!("profile_address:{}", record.address);

        let mut con = self.con.clone();
        let claimed: bool = con.set_nx(&address_key, &record.id).await?;
        if !claimed {
            return Err(duplicate_address(&record.address));
        }

        if let Err(e) = self.put(&record).await {
            // Release the address so a retry can claim it.
            let _: Result<(), _> = con.del(&address_key).await;
            return Err(e);
        }
        Ok(record)
    }

    async fn update(
        &self,
        key: &ProfileKey,
        changes: &ProfileChanges,
    ) -> Result<ProfileRecord, RepositoryError> {
        let id = match key {
            ProfileKey::Id(id) => id.clone(),
            ProfileKey::Address(address) => self
                .id_for_address(address)
                .await?
                .ok_or(RepositoryError::NotFound)?,
        };

        let mut record = self
            .get_by_id(&id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        changes.apply_to(&mut record, Utc::now());
        self.put(&record).await?;
        Ok(record)
    }
}
