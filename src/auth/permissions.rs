//! Role → permission table.
//!
//! Every role maps to a fixed 11-flag record. No role can delete parcels,
//! events or batches.

use crate::models::Role;
use serde::{Deserialize, Serialize};

/// Named capability gating a UI action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "canCreateParcels")]
    CreateParcels,
    #[serde(rename = "canEditParcels")]
    EditParcels,
    #[serde(rename = "canDeleteParcels")]
    DeleteParcels,
    #[serde(rename = "canCreateEvents")]
    CreateEvents,
    #[serde(rename = "canEditEvents")]
    EditEvents,
    #[serde(rename = "canDeleteEvents")]
    DeleteEvents,
    #[serde(rename = "canCreateBatches")]
    CreateBatches,
    #[serde(rename = "canEditBatches")]
    EditBatches,
    #[serde(rename = "canDeleteBatches")]
    DeleteBatches,
    #[serde(rename = "canViewAllData")]
    ViewAllData,
    #[serde(rename = "canAudit")]
    Audit,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::CreateParcels,
        Permission::EditParcels,
        Permission::DeleteParcels,
        Permission::CreateEvents,
        Permission::EditEvents,
        Permission::DeleteEvents,
        Permission::CreateBatches,
        Permission::EditBatches,
        Permission::DeleteBatches,
        Permission::ViewAllData,
        Permission::Audit,
    ];

    /// Flag name as used by the UI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CreateParcels => "canCreateParcels",
            Permission::EditParcels => "canEditParcels",
            Permission::DeleteParcels => "canDeleteParcels",
            Permission::CreateEvents => "canCreateEvents",
            Permission::EditEvents => "canEditEvents",
            Permission::DeleteEvents => "canDeleteEvents",
            Permission::CreateBatches => "canCreateBatches",
            Permission::EditBatches => "canEditBatches",
            Permission::DeleteBatches => "canDeleteBatches",
            Permission::ViewAllData => "canViewAllData",
            Permission::Audit => "canAudit",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

/// Full permission record of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermissions {
    pub can_create_parcels: bool,
    pub can_edit_parcels: bool,
    pub can_delete_parcels: bool,
    pub can_create_events: bool,
    pub can_edit_events: bool,
    pub can_delete_events: bool,
    pub can_create_batches: bool,
    pub can_edit_batches: bool,
    pub can_delete_batches: bool,
    pub can_view_all_data: bool,
    pub can_audit: bool,
}

const PRODUCER: RolePermissions = RolePermissions {
    can_create_parcels: true,
    can_edit_parcels: true,
    can_delete_parcels: false,
    can_create_events: true,
    can_edit_events: true,
    can_delete_events: false,
    can_create_batches: true,
    can_edit_batches: true,
    can_delete_batches: false,
    can_view_all_data: false,
    can_audit: false,
};

const TECHNICIAN: RolePermissions = RolePermissions {
    can_create_parcels: false,
    can_edit_parcels: true,
    can_delete_parcels: false,
    can_create_events: true,
    can_edit_events: true,
    can_delete_events: false,
    can_create_batches: false,
    can_edit_batches: true,
    can_delete_batches: false,
    can_view_all_data: true,
    can_audit: true,
};

const DISTRIBUTOR: RolePermissions = RolePermissions {
    can_create_parcels: false,
    can_edit_parcels: false,
    can_delete_parcels: false,
    can_create_events: false,
    can_edit_events: false,
    can_delete_events: false,
    can_create_batches: true,
    can_edit_batches: true,
    can_delete_batches: false,
    can_view_all_data: true,
    can_audit: false,
};

const CONSUMER: RolePermissions = RolePermissions {
    can_create_parcels: false,
    can_edit_parcels: false,
    can_delete_parcels: false,
    can_create_events: false,
    can_edit_events: false,
    can_delete_events: false,
    can_create_batches: false,
    can_edit_batches: false,
    can_delete_batches: false,
    can_view_all_data: true,
    can_audit: false,
};

impl RolePermissions {
    pub const fn for_role(role: Role) -> &'static RolePermissions {
        match role {
            Role::Producer => &PRODUCER,
            Role::Technician => &TECHNICIAN,
            Role::Distributor => &DISTRIBUTOR,
            Role::Consumer => &CONSUMER,
        }
    }

    pub fn get(&self, permission: Permission) -> bool {
        match permission {
            Permission::CreateParcels => self.can_create_parcels,
            Permission::EditParcels => self.can_edit_parcels,
            Permission::DeleteParcels => self.can_delete_parcels,
            Permission::CreateEvents => self.can_create_events,
            Permission::EditEvents => self.can_edit_events,
            Permission::DeleteEvents => self.can_delete_events,
            Permission::CreateBatches => self.can_create_batches,
            Permission::EditBatches => self.can_edit_batches,
            Permission::DeleteBatches => self.can_delete_batches,
            Permission::ViewAllData => self.can_view_all_data,
            Permission::Audit => self.can_audit,
        }
    }
}

pub fn has_permission(role: Role, permission: Permission) -> bool {
    RolePermissions::for_role(role).get(permission)
}
