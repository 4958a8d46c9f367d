//! Wallet authentication: signature checks, the auth service, role
//! permissions and the UI-facing state machine.

pub mod clients;
pub mod context;
pub mod middleware;
pub mod permissions;
pub mod service;
pub mod verify;
pub mod wallet;

pub use clients::{ClientId, ClientRegistry, DEFAULT_MAX_CLIENTS};
pub use context::{AuthAction, AuthContext, AuthState};
pub use middleware::{AppState, ClientAuth, CurrentUser};
pub use permissions::{has_permission, Permission, RolePermissions};
pub use service::{AuthService, Subscription, DEFAULT_AUTH_MESSAGE, DEFAULT_SESSION_MAX_AGE};
pub use verify::verify_signature;
pub use wallet::{DisconnectedWallet, LocalWallet, Wallet, WalletError};
