//! Auth state machine consumed by the UI layer.
//!
//! State only changes through [`AuthAction`]s fed to [`AuthState::apply`].
//! [`AuthContext`] wraps the reducer around an [`AuthService`] and a
//! [`Wallet`], and follows session changes made by other handles once
//! [`AuthContext::init`] has run.

use super::permissions::{has_permission, Permission};
use super::service::{AuthService, Subscription};
use super::wallet::Wallet;
use crate::error::AuthError;
use crate::models::{LoginCredentials, Profile, ProfileChanges, RegisterData, RegisterRequest};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    pub user: Option<Profile>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthAction {
    SetLoading(bool),
    SetUser(Profile),
    SetError(Option<String>),
    Logout,
    ClearError,
}

impl AuthState {
    /// Reducer. `SetError` keeps the current user.
    pub fn apply(self, action: AuthAction) -> AuthState {
        match action {
            AuthAction::SetLoading(is_loading) => AuthState { is_loading, ..self },
            AuthAction::SetUser(user) => AuthState {
                is_authenticated: true,
                user: Some(user),
                is_loading: false,
                error: None,
            },
            AuthAction::SetError(error) => AuthState {
                error,
                is_loading: false,
                ..self
            },
            AuthAction::Logout => AuthState::default(),
            AuthAction::ClearError => AuthState { error: None, ..self },
        }
    }

    /// False whenever no user is present.
    pub fn has_permission(&self, permission: Permission) -> bool {
        match &self.user {
            Some(user) => has_permission(user.role, permission),
            None => false,
        }
    }
}

pub struct AuthContext {
    service: AuthService,
    wallet: Arc<dyn Wallet>,
    state: Arc<RwLock<AuthState>>,
    subscription: Mutex<Option<Subscription>>,
}

fn dispatch(state: &RwLock<AuthState>, action: AuthAction) {
    let mut guard = state.write();
    let current = std::mem::take(&mut *guard);
    *guard = current.apply(action);
}

impl AuthContext {
    pub fn new(service: AuthService, wallet: Arc<dyn Wallet>) -> Self {
        AuthContext {
            service,
            wallet,
            state: Arc::new(RwLock::new(AuthState::default())),
            subscription: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn dispatch(&self, action: AuthAction) {
        dispatch(&self.state, action);
    }

    /// Restore any stored session and start following session changes from
    /// other handles. Calling it again replaces the previous listener.
    pub async fn init(&self) {
        self.dispatch(AuthAction::SetLoading(true));

        let state = Arc::clone(&self.state);
        let subscription = self
            .service
            .on_auth_state_change(move |user| match user {
                Some(user) => dispatch(&state, AuthAction::SetUser(user)),
                None => dispatch(&state, AuthAction::Logout),
            })
            .await;
        *self.subscription.lock() = Some(subscription);

        self.dispatch(AuthAction::SetLoading(false));
    }

    /// Re-check the stored session, dropping to anonymous if it went stale.
    pub async fn refresh(&self) -> AuthState {
        let current = self.service.get_current_user().await;
        let known = self.state.read().user.clone();
        match current {
            Some(user) if known.as_ref() != Some(&user) => {
                self.dispatch(AuthAction::SetUser(user))
            }
            Some(_) => {}
            None if known.is_some() => self.dispatch(AuthAction::Logout),
            None => {}
        }
        self.state()
    }

    /// Ask the wallet to sign `message`. `None` when no wallet is connected
    /// or signing failed.
    pub async fn sign_message(&self, message: &str) -> Option<String> {
        self.wallet.address()?;
        match self.wallet.sign_message(message).await {
            Ok(signature) => Some(signature),
            Err(e) => {
                tracing::warn!(error = %e, "Wallet signature request failed");
                None
            }
        }
    }

    pub async fn login(&self, credentials: LoginCredentials) -> Result<Profile, AuthError> {
        self.dispatch(AuthAction::SetLoading(true));
        let result = self.try_login(credentials).await;
        self.settle(result)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<Profile, AuthError> {
        self.dispatch(AuthAction::SetLoading(true));
        let result = self.try_register(request).await;
        self.settle(result)
    }

    pub async fn logout(&self) {
        self.service.sign_out().await;
        self.dispatch(AuthAction::Logout);
        tracing::info!(action = "sign_out", "Signed out");
    }

    pub fn clear_error(&self) {
        self.dispatch(AuthAction::ClearError);
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.state.read().has_permission(permission)
    }

    pub async fn update_profile(&self, changes: ProfileChanges) -> Result<Profile, AuthError> {
        let result = self.service.update_profile(changes).await;
        match &result {
            Ok(user) => self.dispatch(AuthAction::SetUser(user.clone())),
            Err(AuthError::NotAuthenticated) => self.dispatch(AuthAction::Logout),
            Err(e) => self.dispatch(AuthAction::SetError(Some(e.to_string()))),
        }
        result
    }

    async fn try_login(&self, credentials: LoginCredentials) -> Result<Profile, AuthError> {
        let message = self.message_or_default(credentials.message);
        let signature = self.signature_for(credentials.signature, &message).await?;

        self.service
            .sign_in(&credentials.address, &signature, &message)
            .await?;
        self.service
            .get_current_user()
            .await
            .ok_or(AuthError::NotAuthenticated)
    }

    async fn try_register(&self, request: RegisterRequest) -> Result<Profile, AuthError> {
        let message = self.message_or_default(request.message);
        let signature = self.signature_for(request.signature, &message).await?;

        self.service
            .register(RegisterData {
                address: request.address,
                role: request.role,
                name: request.name,
                email: request.email,
                organization: request.organization,
                signature,
                message,
            })
            .await?;
        self.service
            .get_current_user()
            .await
            .ok_or(AuthError::NotAuthenticated)
    }

    fn message_or_default(&self, message: Option<String>) -> String {
        match message {
            Some(m) if !m.is_empty() => m,
            _ => self.service.challenge_message().to_string(),
        }
    }

    async fn signature_for(
        &self,
        given: Option<String>,
        message: &str,
    ) -> Result<String, AuthError> {
        match given {
            Some(signature) if !signature.is_empty() => Ok(signature),
            _ => self
                .sign_message(message)
                .await
                .ok_or(AuthError::SignatureRequest),
        }
    }

    fn settle(&self, result: Result<Profile, AuthError>) -> Result<Profile, AuthError> {
        match &result {
            Ok(user) => self.dispatch(AuthAction::SetUser(user.clone())),
            Err(e) => self.dispatch(AuthAction::SetError(Some(e.to_string()))),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::wallet::{DisconnectedWallet, LocalWallet};
    use crate::models::Role;
    use crate::storage::{MemoryProfiles, MemorySessionStore, SessionStore};
    use chrono::Utc;
    use std::time::Duration;

    fn profile(role: Role) -> Profile {
        let now = Utc::now();
        Profile {
            id: "p1".to_string(),
            address: "0xabc".to_string(),
            role,
            name: Some("Ana".to_string()),
            email: None,
            organization: None,
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    struct Harness {
        context: AuthContext,
        sessions: Arc<MemorySessionStore>,
        profiles: Arc<MemoryProfiles>,
        wallet: Arc<LocalWallet>,
    }

    fn harness() -> Harness {
        let profiles = Arc::new(MemoryProfiles::new());
        let sessions = Arc::new(MemorySessionStore::default());
        let wallet = Arc::new(LocalWallet::random());
        let service = AuthService::new(profiles.clone(), sessions.clone());
        Harness {
            context: AuthContext::new(service, wallet.clone()),
            sessions,
            profiles,
            wallet,
        }
    }

    fn credentials(wallet: &LocalWallet) -> LoginCredentials {
        LoginCredentials {
            address: wallet.address_string(),
            signature: None,
            message: None,
        }
    }

    fn registration(wallet: &LocalWallet, role: Role, name: &str) -> RegisterRequest {
        RegisterRequest {
            address: wallet.address_string(),
            role,
            name: name.to_string(),
            email: None,
            organization: None,
            signature: None,
            message: None,
        }
    }

    async fn wait_for<F: Fn(&AuthState) -> bool>(context: &AuthContext, predicate: F) {
        for _ in 0..100 {
            if predicate(&context.state()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state never matched: {:?}", context.state());
    }

    #[test]
    fn test_reducer_transitions() {
        let state = AuthState::default().apply(AuthAction::SetLoading(true));
        assert!(state.is_loading);
        assert!(!state.is_authenticated);

        let state = state.apply(AuthAction::SetUser(profile(Role::Producer)));
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.error, None);

        let state = state.apply(AuthAction::SetError(Some("boom".to_string())));
        assert!(state.is_authenticated);
        assert!(state.user.is_some());
        assert_eq!(state.error.as_deref(), Some("boom"));

        let state = state.apply(AuthAction::ClearError);
        assert_eq!(state.error, None);
        assert!(state.user.is_some());

        let state = state.apply(AuthAction::Logout);
        assert_eq!(state, AuthState::default());
    }

    #[test]
    fn test_set_user_clears_error() {
        let state = AuthState::default()
            .apply(AuthAction::SetError(Some("Invalid signature".to_string())))
            .apply(AuthAction::SetUser(profile(Role::Consumer)));
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_has_permission_without_user() {
        let state = AuthState::default();
        for p in Permission::ALL {
            assert!(!state.has_permission(p));
        }

        let state = state.apply(AuthAction::SetUser(profile(Role::Producer)));
        assert!(state.has_permission(Permission::CreateParcels));
        assert!(!state.has_permission(Permission::Audit));
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_value(AuthState::default()).unwrap();
        assert_eq!(json["isAuthenticated"], false);
        assert_eq!(json["isLoading"], false);
        assert!(json["user"].is_null());
        assert!(json["error"].is_null());
    }

    #[tokio::test]
    async fn test_login_signs_with_wallet() {
        let h = harness();
        let user = h.context.login(credentials(&h.wallet)).await.unwrap();

        let state = h.context.state();
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.user, Some(user.clone()));
        assert_eq!(user.role, Role::Consumer);
        assert!(!h.context.has_permission(Permission::CreateParcels));
        assert!(h.context.has_permission(Permission::ViewAllData));
    }

    #[tokio::test]
    async fn test_login_with_supplied_signature() {
        let profiles = Arc::new(MemoryProfiles::new());
        let sessions = Arc::new(MemorySessionStore::default());
        let context = AuthContext::new(
            AuthService::new(profiles, sessions),
            Arc::new(DisconnectedWallet),
        );
        let wallet = LocalWallet::random();
        let message = "Agro-bootcamp Authentication";

        let user = context
            .login(LoginCredentials {
                address: wallet.address_string(),
                signature: Some(wallet.sign_personal_message(message).unwrap()),
                message: Some(message.to_string()),
            })
            .await
            .unwrap();
        assert_eq!(user.address, wallet.address_string().to_lowercase());
    }

    #[tokio::test]
    async fn test_login_without_wallet_fails_to_sign() {
        let context = AuthContext::new(
            AuthService::new(
                Arc::new(MemoryProfiles::new()),
                Arc::new(MemorySessionStore::default()),
            ),
            Arc::new(DisconnectedWallet),
        );
        let wallet = LocalWallet::random();

        let err = context.login(credentials(&wallet)).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureRequest));

        let state = context.state();
        assert!(!state.is_loading);
        assert!(!state.is_authenticated);
        assert_eq!(state.error.as_deref(), Some("Failed to sign message"));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_user() {
        let h = harness();
        let user = h
            .context
            .register(registration(&h.wallet, Role::Producer, "Ana"))
            .await
            .unwrap();

        let other = LocalWallet::random();
        let err = h
            .context
            .login(LoginCredentials {
                address: h.wallet.address_string(),
                signature: Some(other.sign_personal_message("x").unwrap()),
                message: Some("x".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));

        let state = h.context.state();
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(user));
        assert_eq!(state.error.as_deref(), Some("Invalid signature"));

        h.context.clear_error();
        assert_eq!(h.context.state().error, None);
        assert!(h.context.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_register_and_logout() {
        let h = harness();
        let user = h
            .context
            .register(registration(&h.wallet, Role::Technician, "Eva"))
            .await
            .unwrap();
        assert_eq!(user.role, Role::Technician);
        assert_eq!(h.profiles.len(), 1);
        assert!(h.context.has_permission(Permission::Audit));

        h.context.logout().await;
        assert_eq!(h.context.state(), AuthState::default());
        assert!(h.sessions.load().await.unwrap().is_none());
        assert!(!h.context.has_permission(Permission::Audit));
    }

    #[tokio::test]
    async fn test_update_profile_sets_user() {
        let h = harness();
        h.context
            .register(registration(&h.wallet, Role::Producer, "Ana"))
            .await
            .unwrap();

        let user = h
            .context
            .update_profile(ProfileChanges {
                name: Some(Some("Ana María".to_string())),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(h.context.state().user, Some(user));
    }

    #[tokio::test]
    async fn test_init_restores_session() {
        let h = harness();
        h.context
            .register(registration(&h.wallet, Role::Distributor, "Luis"))
            .await
            .unwrap();

        let service = AuthService::new(h.profiles.clone(), Arc::new(h.sessions.open_tab()));
        let restored = AuthContext::new(service, Arc::new(DisconnectedWallet));
        restored.init().await;

        let state = restored.state();
        assert!(state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.user.unwrap().name.as_deref(), Some("Luis"));
    }

    #[tokio::test]
    async fn test_init_follows_other_tabs() {
        let h = harness();
        h.context.init().await;
        assert!(!h.context.state().is_authenticated);

        let tab_service = AuthService::new(h.profiles.clone(), Arc::new(h.sessions.open_tab()));
        let tab = AuthContext::new(tab_service, h.wallet.clone());

        tab.register(registration(&h.wallet, Role::Producer, "Ana"))
            .await
            .unwrap();
        wait_for(&h.context, |s| s.is_authenticated).await;

        tab.logout().await;
        wait_for(&h.context, |s| !s.is_authenticated).await;
        assert_eq!(h.context.state().user, None);
    }

    #[tokio::test]
    async fn test_refresh_drops_expired_session() {
        let h = harness();
        h.context
            .register(registration(&h.wallet, Role::Producer, "Ana"))
            .await
            .unwrap();

        let mut session = h.sessions.load().await.unwrap().unwrap();
        session.timestamp -= 25 * 60 * 60 * 1000;
        h.sessions.save(&session).await.unwrap();

        let state = h.context.refresh().await;
        assert!(!state.is_authenticated);
        assert!(h.sessions.load().await.unwrap().is_none());
    }
}
