//! Auth service: sign-in, registration, session restoration and sign-out.
//!
//! Each operation is one-shot. The profile write and the session write are
//! not atomic together; a failure between them leaves a profile without a
//! session, which the next sign-in picks up.

use super::verify::verify_signature;
use crate::error::AuthError;
use crate::models::{
    normalize_address, NewProfile, Profile, ProfileChanges, ProfileKey, RegisterData, Role,
    Session, DEFAULT_PROFILE_NAME,
};
use crate::storage::{ProfileRepository, SessionStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Challenge string signed by the wallet when none is given.
pub const DEFAULT_AUTH_MESSAGE: &str = "Agro-bootcamp Authentication";

/// Sessions older than this are discarded on read.
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Live auth-state listener. Dropping it unsubscribes.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct AuthService {
    profiles: Arc<dyn ProfileRepository>,
    sessions: Arc<dyn SessionStore>,
    max_age: Duration,
    challenge_message: String,
}

impl AuthService {
    pub fn new(profiles: Arc<dyn ProfileRepository>, sessions: Arc<dyn SessionStore>) -> Self {
        AuthService {
            profiles,
            sessions,
            max_age: DEFAULT_SESSION_MAX_AGE,
            challenge_message: DEFAULT_AUTH_MESSAGE.to_string(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_challenge_message(mut self, message: impl Into<String>) -> Self {
        self.challenge_message = message.into();
        self
    }

    pub fn challenge_message(&self) -> &str {
        &self.challenge_message
    }

    /// Sign in with a wallet signature, creating a consumer profile on first
    /// login.
    pub async fn sign_in(
        &self,
        address: &str,
        signature: &str,
        message: &str,
    ) -> Result<Profile, AuthError> {
        if !verify_signature(address, signature, message) {
            tracing::warn!(action = "auth_failed", address = %address, "Invalid signature");
            return Err(AuthError::InvalidSignature);
        }

        let address = normalize_address(address);
        let record = match self.profiles.find_by_address(&address).await? {
            Some(record) => record,
            None => {
                let record = self
                    .profiles
                    .insert(NewProfile {
                        address: address.clone(),
                        role: Role::Consumer,
                        name: Some(DEFAULT_PROFILE_NAME.to_string()),
                        email: None,
                        organization: None,
                    })
                    .await?;
                tracing::info!(action = "profile_created", address = %address, "First login, consumer profile created");
                record
            }
        };

        let user = Profile::from(record);
        self.persist_session(&user, signature, message).await?;

        tracing::info!(action = "sign_in", address = %address, role = %user.role, "Signed in");
        Ok(user)
    }

    /// Register or re-register. An existing profile gets role, name, email
    /// and organization overwritten.
    pub async fn register(&self, data: RegisterData) -> Result<Profile, AuthError> {
        let message = if data.message.is_empty() {
            self.challenge_message.clone()
        } else {
            data.message
        };

        if !verify_signature(&data.address, &data.signature, &message) {
            tracing::warn!(action = "auth_failed", address = %data.address, "Invalid signature");
            return Err(AuthError::InvalidSignature);
        }

        let address = normalize_address(&data.address);
        let existing = self.profiles.find_by_address(&address).await?;

        let record = match existing {
            Some(previous) => {
                if previous.role != data.role {
                    tracing::info!(
                        action = "role_changed",
                        address = %address,
                        from = %previous.role,
                        to = %data.role,
                        "Role overwritten by registration"
                    );
                }
                let changes =
                    ProfileChanges::overwrite(data.role, data.name, data.email, data.organization);
                self.profiles
                    .update(&ProfileKey::Address(address.clone()), &changes)
                    .await?
            }
            None => {
                self.profiles
                    .insert(NewProfile {
                        address: address.clone(),
                        role: data.role,
                        name: Some(data.name),
                        email: data.email,
                        organization: data.organization,
                    })
                    .await?
            }
        };

        let user = Profile::from(record);
        self.persist_session(&user, &data.signature, &message).await?;

        tracing::info!(action = "register", address = %address, role = %user.role, "Registered");
        Ok(user)
    }

    /// The authenticated user, if the stored session is fresh and its
    /// signature still verifies. Stale or forged sessions are cleared.
    pub async fn get_current_user(&self) -> Option<Profile> {
        let session = match self.sessions.load().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Session store unavailable");
                return None;
            }
        };

        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        let expired = Utc::now()
            .timestamp_millis()
            .checked_sub(session.timestamp)
            .is_none_or(|age_ms| age_ms > max_age_ms);
        if expired {
            tracing::info!(action = "session_expired", address = %session.user.address, "Session expired");
            self.sign_out().await;
            return None;
        }

        if !verify_signature(&session.user.address, &session.signature, &session.message) {
            tracing::warn!(action = "session_invalid", address = %session.user.address, "Stored session failed verification");
            self.sign_out().await;
            return None;
        }

        Some(session.user)
    }

    /// Clear the session. Never fails.
    pub async fn sign_out(&self) {
        if let Err(e) = self.sessions.clear().await {
            tracing::warn!(error = %e, "Failed to clear session");
        }
    }

    /// Call `callback` with the current user now, then again whenever another
    /// handle writes the session slot.
    pub async fn on_auth_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<Profile>) + Send + Sync + 'static,
    {
        // Subscribe first so a write racing the initial read is not lost.
        let mut events = self.sessions.subscribe();
        callback(self.get_current_user().await);

        let origin = self.sessions.origin().to_string();
        let key = self.sessions.keys().session.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.origin == origin || event.key != key {
                            continue;
                        }
                        let user = event
                            .new_value
                            .as_deref()
                            .and_then(|raw| serde_json::from_str::<Session>(raw).ok())
                            .map(|session| session.user);
                        callback(user);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Auth state listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { task }
    }

    /// Update the current user's profile and refresh the session snapshot.
    pub async fn update_profile(&self, changes: ProfileChanges) -> Result<Profile, AuthError> {
        let current = self
            .get_current_user()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        let record = self
            .profiles
            .update(&ProfileKey::Id(current.id.clone()), &changes)
            .await?;
        let user = Profile::from(record);

        if let Some(mut session) = self.sessions.load().await? {
            session.user = user.clone();
            self.sessions.save(&session).await?;
        }

        tracing::info!(action = "profile_updated", address = %user.address, "Profile updated");
        Ok(user)
    }

    async fn persist_session(
        &self,
        user: &Profile,
        signature: &str,
        message: &str,
    ) -> Result<(), AuthError> {
        let session = Session {
            user: user.clone(),
            signature: signature.to_string(),
            message: message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.sessions.save(&session).await?;
        Ok(())
    }
}
