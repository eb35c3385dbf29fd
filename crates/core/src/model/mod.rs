//! Domain model: the closed entity-kind set, facts, annotations, actions
//! and run records. Entity kinds are a tagged enum with per-kind key shapes
//! rather than a type hierarchy; new kinds are additions here and nowhere
//! else.

pub mod action;
pub mod annotation;
pub mod fact;
pub mod run;

pub use action::{Action, ChangeType};
pub use annotation::{Annotation, AnnotationDelta, AnnotationFields, AnnotationState};
pub use fact::{Attributes, CompositeKey, Fact, Observation, RiskLevel, Status};
pub use run::{AuditRun, RemediationItem, RemediationRun, RunStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of entity kinds the auditor observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    SaAccount,
    Login,
    ServerRoleMember,
    Config,
    Service,
    Database,
    DbUser,
    DbRoleMember,
    OrphanedUser,
    Permission,
    LinkedServer,
    Trigger,
    Backup,
    Protocol,
    EncryptionKey,
    AuditSetting,
    Instance,
}

impl EntityKind {
    pub const ALL: [EntityKind; 17] = [
        EntityKind::SaAccount,
        EntityKind::Login,
        EntityKind::ServerRoleMember,
        EntityKind::Config,
        EntityKind::Service,
        EntityKind::Database,
        EntityKind::DbUser,
        EntityKind::DbRoleMember,
        EntityKind::OrphanedUser,
        EntityKind::Permission,
        EntityKind::LinkedServer,
        EntityKind::Trigger,
        EntityKind::Backup,
        EntityKind::Protocol,
        EntityKind::EncryptionKey,
        EntityKind::AuditSetting,
        EntityKind::Instance,
    ];

    /// Canonical storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::SaAccount => "sa_account",
            EntityKind::Login => "login",
            EntityKind::ServerRoleMember => "server_role_member",
            EntityKind::Config => "config",
            EntityKind::Service => "service",
            EntityKind::Database => "database",
            EntityKind::DbUser => "db_user",
            EntityKind::DbRoleMember => "db_role_member",
            EntityKind::OrphanedUser => "orphaned_user",
            EntityKind::Permission => "permission",
            EntityKind::LinkedServer => "linked_server",
            EntityKind::Trigger => "trigger",
            EntityKind::Backup => "backup",
            EntityKind::Protocol => "protocol",
            EntityKind::EncryptionKey => "encryption_key",
            EntityKind::AuditSetting => "audit_setting",
            EntityKind::Instance => "instance",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        EntityKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Report sheet name for this kind
    pub fn sheet_name(&self) -> &'static str {
        match self {
            EntityKind::SaAccount => "SA Account",
            EntityKind::Login => "Logins",
            EntityKind::ServerRoleMember => "Server Roles",
            EntityKind::Config => "Configuration",
            EntityKind::Service => "Services",
            EntityKind::Database => "Databases",
            EntityKind::DbUser => "Database Users",
            EntityKind::DbRoleMember => "Database Roles",
            EntityKind::OrphanedUser => "Orphaned Users",
            EntityKind::Permission => "Permissions",
            EntityKind::LinkedServer => "Linked Servers",
            EntityKind::Trigger => "Triggers",
            EntityKind::Backup => "Backups",
            EntityKind::Protocol => "Protocols",
            EntityKind::EncryptionKey => "Encryption",
            EntityKind::AuditSetting => "Audit Settings",
            EntityKind::Instance => "Instances",
        }
    }

    pub fn from_sheet_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL.iter().copied().find(|k| k.sheet_name() == name)
    }

    /// The ordered field names of this kind's composite key. Every key
    /// starts with (server, instance); the tuple shape is fixed per kind.
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::SaAccount | EntityKind::Login => &["server", "instance", "login_name"],
            EntityKind::ServerRoleMember => &["server", "instance", "role", "member"],
            EntityKind::Config => &["server", "instance", "setting"],
            EntityKind::Service => &["server", "instance", "service_name"],
            EntityKind::Database => &["server", "instance", "database"],
            EntityKind::DbUser | EntityKind::OrphanedUser => {
                &["server", "instance", "database", "user_name"]
            }
            EntityKind::DbRoleMember => &["server", "instance", "database", "role", "member"],
            EntityKind::Permission => &[
                "server",
                "instance",
                "scope",
                "database",
                "grantee",
                "permission",
                "state",
                "entity",
            ],
            EntityKind::LinkedServer => &["server", "instance", "linked_server"],
            EntityKind::Trigger => &["server", "instance", "scope", "trigger_name"],
            EntityKind::Backup => &["server", "instance", "database"],
            EntityKind::Protocol => &["server", "instance", "protocol"],
            EntityKind::EncryptionKey => {
                &["server", "instance", "database", "key_name", "key_type"]
            }
            EntityKind::AuditSetting => &["server", "instance", "setting"],
            EntityKind::Instance => &["server", "instance"],
        }
    }

    /// Purely informational kinds carry `INFO` status, never PASS/WARN/FAIL.
    pub fn is_informational(&self) -> bool {
        matches!(self, EntityKind::Instance | EntityKind::EncryptionKey)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
            assert_eq!(EntityKind::from_sheet_name(kind.sheet_name()), Some(kind));
        }
        assert_eq!(EntityKind::parse("no_such_kind"), None);
    }

    #[test]
    fn test_key_shapes_start_with_server_instance() {
        for kind in EntityKind::ALL {
            let fields = kind.key_fields();
            assert_eq!(fields[0], "server");
            assert_eq!(fields[1], "instance");
        }
    }
}
