use serde::{Deserialize, Serialize};
use std::fmt;

/// Role tag stored on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    /// Reads a stored role tag. Only exact tags count, anything else is a patient.
    pub fn from_tag(tag: &str) -> Role {
        match tag {
            "doctor" => Role::Doctor,
            "admin" => Role::Admin,
            _ => Role::Patient,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }

    /// Client path a freshly signed in user of this role lands on.
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin/dashboard",
            Role::Doctor => "/doctor/dashboard",
            Role::Patient => "/patient/dashboard",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Patient
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "canViewDashboard")]
    ViewDashboard,
    #[serde(rename = "canManageAppointments")]
    ManageAppointments,
    #[serde(rename = "canViewMedicalRecords")]
    ViewMedicalRecords,
    #[serde(rename = "canManageUsers")]
    ManageUsers,
    #[serde(rename = "canManageContent")]
    ManageContent,
    #[serde(rename = "canViewReports")]
    ViewReports,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub can_view_dashboard: bool,
    pub can_manage_appointments: bool,
    pub can_view_medical_records: bool,
    pub can_manage_users: bool,
    pub can_manage_content: bool,
    pub can_view_reports: bool,
}

impl PermissionSet {
    /// What an unauthenticated caller holds.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::ViewDashboard => self.can_view_dashboard,
            Permission::ManageAppointments => self.can_manage_appointments,
            Permission::ViewMedicalRecords => self.can_view_medical_records,
            Permission::ManageUsers => self.can_manage_users,
            Permission::ManageContent => self.can_manage_content,
            Permission::ViewReports => self.can_view_reports,
        }
    }

    pub fn allows_all(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.allows(*p))
    }
}

/// Fixed role to capability table. No per-user overrides exist.
pub fn derive_permissions(role: Role) -> PermissionSet {
    match role {
        Role::Admin => PermissionSet {
            can_view_dashboard: true,
            can_manage_appointments: true,
            can_view_medical_records: true,
            can_manage_users: true,
            can_manage_content: true,
            can_view_reports: true,
        },
        Role::Doctor => PermissionSet {
            can_view_dashboard: true,
            can_manage_appointments: true,
            can_view_medical_records: true,
            can_manage_users: false,
            can_manage_content: false,
            can_view_reports: true,
        },
        Role::Patient => PermissionSet {
            can_view_dashboard: true,
            can_manage_appointments: true,
            can_view_medical_records: false,
            can_manage_users: false,
            can_manage_content: false,
            can_view_reports: false,
        },
    }
}

/// Convenience for raw tags read straight off a row or token claim.
pub fn derive_permissions_for_tag(tag: Option<&str>) -> PermissionSet {
    derive_permissions(tag.map(Role::from_tag).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Permission; 6] = [
        Permission::ViewDashboard,
        Permission::ManageAppointments,
        Permission::ViewMedicalRecords,
        Permission::ManageUsers,
        Permission::ManageContent,
        Permission::ViewReports,
    ];

    fn granted(role: Role) -> Vec<Permission> {
        let set = derive_permissions(role);
        ALL.iter().copied().filter(|p| set.allows(*p)).collect()
    }

    #[test]
    fn patient_table_row() {
        assert_eq!(
            granted(Role::Patient),
            vec![Permission::ViewDashboard, Permission::ManageAppointments]
        );
    }

    #[test]
    fn doctor_table_row() {
        assert_eq!(
            granted(Role::Doctor),
            vec![
                Permission::ViewDashboard,
                Permission::ManageAppointments,
                Permission::ViewMedicalRecords,
                Permission::ViewReports,
            ]
        );
    }

    #[test]
    fn admin_holds_everything() {
        assert_eq!(granted(Role::Admin), ALL.to_vec());
    }

    #[test]
    fn unknown_tags_fall_back_to_patient() {
        let patient = derive_permissions(Role::Patient);
        for tag in ["", "nurse", "ADMINISTRATOR", "root", "ADMIN", " admin ", "Doctor", "doctor\n"] {
            assert_eq!(derive_permissions_for_tag(Some(tag)), patient, "tag {:?}", tag);
        }
        assert_eq!(derive_permissions_for_tag(None), patient);
    }

    #[test]
    fn exact_tags_are_recognised() {
        assert_eq!(Role::from_tag("doctor"), Role::Doctor);
        assert_eq!(Role::from_tag("admin"), Role::Admin);
        assert_eq!(Role::from_tag("Admin"), Role::Patient);
    }

    #[test]
    fn unauthenticated_set_is_empty() {
        let none = PermissionSet::none();
        assert!(ALL.iter().all(|p| !none.allows(*p)));
    }

    #[test]
    fn serializes_with_client_names() {
        let body = serde_json::to_value(derive_permissions(Role::Doctor)).unwrap();
        assert_eq!(body["canViewMedicalRecords"], true);
        assert_eq!(body["canManageUsers"], false);
        let permission: Permission = serde_json::from_str("\"canViewReports\"").unwrap();
        assert_eq!(permission, Permission::ViewReports);
    }
}
