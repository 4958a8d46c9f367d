//! Domain and wire models.
//!
//! Profiles and sessions use camelCase on the wire because the persisted
//! session record is read back by page scripts. Store rows keep the
//! snake_case column names of the hosted `profiles` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name given to profiles created implicitly on first sign-in.
pub const DEFAULT_PROFILE_NAME: &str = "Usuario";

/// Lowercase a wallet address for comparison and storage.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

// ============================================================================
// Roles
// ============================================================================

/// Closed set of user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Technician,
    Distributor,
    Consumer,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Producer,
        Role::Technician,
        Role::Distributor,
        Role::Consumer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Technician => "technician",
            Role::Distributor => "distributor",
            Role::Consumer => "consumer",
        }
    }

    /// Display label shown in the UI.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Producer => "Productor",
            Role::Technician => "Técnico/Auditor",
            Role::Distributor => "Distribuidor/Comerciante",
            Role::Consumer => "Consumidor",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Producer => {
                "Puede crear y gestionar parcelas, eventos y lotes de sus productos"
            }
            Role::Technician => "Puede auditar y verificar toda la información del sistema",
            Role::Distributor => "Puede gestionar lotes y ver información de trazabilidad",
            Role::Consumer => "Puede consultar información de trazabilidad de productos",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer" => Ok(Role::Producer),
            "technician" => Ok(Role::Technician),
            "distributor" => Ok(Role::Distributor),
            "consumer" => Ok(Role::Consumer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Identity record keyed by wallet address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub address: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Profile row as returned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub address: String,
    pub role: Role,
    pub name: Option<String>,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProfileRecord> for Profile {
    fn from(record: ProfileRecord) -> Self {
        Profile {
            id: record.id,
            address: record.address,
            role: record.role,
            name: non_empty(record.name),
            email: non_empty(record.email),
            organization: non_empty(record.organization),
            created_at: record.created_at,
            updated_at: record.updated_at,
            is_active: true,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Fields for a profile insert. `address` must already be normalized.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub address: String,
    pub role: Role,
    pub name: Option<String>,
    pub email: Option<String>,
    pub organization: Option<String>,
}

/// Partial profile update.
///
/// Outer `None` leaves a column untouched; `Some(None)` writes null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub name: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub email: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub organization: Option<Option<String>>,
}

/// Distinguishes an explicit `null` from a missing field.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl ProfileChanges {
    /// Overwrite all four mutable columns, as registration does.
    pub fn overwrite(
        role: Role,
        name: String,
        email: Option<String>,
        organization: Option<String>,
    ) -> Self {
        ProfileChanges {
            role: Some(role),
            name: Some(Some(name)),
            email: Some(email),
            organization: Some(organization),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.name.is_none()
            && self.email.is_none()
            && self.organization.is_none()
    }

    /// Apply to a stored row, bumping `updated_at`.
    pub fn apply_to(&self, record: &mut ProfileRecord, now: DateTime<Utc>) {
        if let Some(role) = self.role {
            record.role = role;
        }
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(email) = &self.email {
            record.email = email.clone();
        }
        if let Some(organization) = &self.organization {
            record.organization = organization.clone();
        }
        record.updated_at = now;
    }
}

/// Row selector for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileKey {
    Id(String),
    Address(String),
}

// ============================================================================
// Sessions
// ============================================================================

/// Persisted proof of a successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: Profile,
    pub signature: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

// ============================================================================
// Auth requests
// ============================================================================

/// Input to the sign-in flow of the auth context.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginCredentials {
    pub address: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Registration input of the auth context. The signature is requested from
/// the wallet when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub address: String,
    pub role: Role,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Fully signed registration handed to the auth service.
#[derive(Debug, Clone)]
pub struct RegisterData {
    pub address: String,
    pub role: Role,
    pub name: String,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub signature: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProfileRecord {
        let now = Utc::now();
        ProfileRecord {
            id: "p1".to_string(),
            address: "0xabc".to_string(),
            role: Role::Consumer,
            name: Some("Usuario".to_string()),
            email: Some(String::new()),
            organization: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_record_to_profile_drops_empty_optionals() {
        let profile = Profile::from(record());
        assert_eq!(profile.name.as_deref(), Some("Usuario"));
        assert_eq!(profile.email, None);
        assert_eq!(profile.organization, None);
        assert!(profile.is_active);
    }

    #[test]
    fn test_profile_wire_format_is_camel_case() {
        let json = serde_json::to_value(Profile::from(record())).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("isActive").is_some());
        assert_eq!(json["role"], "consumer");
    }

    #[test]
    fn test_changes_distinguish_null_from_missing() {
        let changes: ProfileChanges =
            serde_json::from_str(r#"{"name":"Ana","email":null}"#).unwrap();
        assert_eq!(changes.name, Some(Some("Ana".to_string())));
        assert_eq!(changes.email, Some(None));
        assert_eq!(changes.organization, None);

        let body = serde_json::to_value(&changes).unwrap();
        assert!(body.get("organization").is_none());
        assert!(body["email"].is_null());
    }

    #[test]
    fn test_overwrite_clears_absent_optionals() {
        let mut row = record();
        row.email = Some("old@example.com".to_string());
        let later = row.updated_at + chrono::Duration::seconds(5);

        ProfileChanges::overwrite(Role::Producer, "Ana".to_string(), None, None)
            .apply_to(&mut row, later);

        assert_eq!(row.role, Role::Producer);
        assert_eq!(row.name.as_deref(), Some("Ana"));
        assert_eq!(row.email, None);
        assert_eq!(row.updated_at, later);
        assert_eq!(row.id, "p1");
        assert_eq!(row.address, "0xabc");
    }
}
