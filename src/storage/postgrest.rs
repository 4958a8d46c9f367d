//! Profile repository over the hosted relational backend (PostgREST API).
//!
//! - `GET   /rest/v1/profiles?address=eq.{address}&select=*`
//! - `POST  /rest/v1/profiles` with `Prefer: return=representation`
//! - `PATCH /rest/v1/profiles?{id|address}=eq.{value}` with the same header
//!
//! Requests carry the anon key both as `apikey` and as a bearer token.

use super::{ProfileRepository, RepositoryError};
use crate::models::{normalize_address, NewProfile, ProfileChanges, ProfileKey, ProfileRecord};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

/// PostgreSQL `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct PostgrestProfiles {
    http: reqwest::Client,
    table_url: String,
    api_key: String,
}

impl std::fmt::Debug for PostgrestProfiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestProfiles")
            .field("table_url", &self.table_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl PostgrestProfiles {
    /// `base_url` is the project URL, e.g. `https://xyz.supabase.co`.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        PostgrestProfiles {
            http,
            table_url: format!("{}/rest/v1/profiles", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
    }

    /// Decode the row list, or turn an error body into a `RepositoryError`.
    async fn rows(response: Response) -> Result<Vec<ProfileRecord>, RepositoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let body: PostgrestErrorBody =
            serde_json::from_str(&text).unwrap_or(PostgrestErrorBody {
                code: None,
                message: None,
            });
        let code = body.code.unwrap_or_else(|| status.as_u16().to_string());
        let message = body.message.unwrap_or(text);

        if status == StatusCode::CONFLICT || code == UNIQUE_VIOLATION {
            return Err(RepositoryError::Conflict(message));
        }
        Err(RepositoryError::Backend { code, message })
    }
}

#[async_trait]
impl ProfileRepository for PostgrestProfiles {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<ProfileRecord>, RepositoryError> {
        let filter = format!("eq.{}", normalize_address(address));
        let request = self
            .http
            .get(&self.table_url)
            .query(&[("address", filter.as_str()), ("select", "*")]);

        let response = self.authorized(request).send().await?;
        Ok(Self::rows(response).await?.into_iter().next())
    }

    async fn insert(&self, profile: NewProfile) -> Result<ProfileRecord, RepositoryError> {
        let body = NewProfile {
            address: normalize_address(&profile.address),
            ..profile
        };
        let request = self
            .http
            .post(&self.table_url)
            .header("prefer", "return=representation")
            .json(&body);

        let response = self.authorized(request).send().await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::Decode("insert returned no row".to_string()))
    }

    async fn update(
        &self,
        key: &ProfileKey,
        changes: &ProfileChanges,
    ) -> Result<ProfileRecord, RepositoryError> {
        let (column, value) = match key {
            ProfileKey::Id(id) => ("id", format!("eq.{}", id)),
            ProfileKey::Address(address) => ("address", format!("eq.{}", normalize_address(address))),
        };
        let request = self
            .http
            .patch(&self.table_url)
            .query(&[(column, value.as_str())])
            .header("prefer", "return=representation")
            .json(changes);

        let response = self.authorized(request).send().await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or(RepositoryError::NotFound)
    }
}
