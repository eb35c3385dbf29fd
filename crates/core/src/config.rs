//! # Configuration
//!
//! Hierarchical configuration for the auditor, loaded in order of
//! precedence:
//!
//! 1. **Environment variables** (`AUTODBAUDIT_*`, highest precedence)
//! 2. **An explicit configuration file** passed on the command line
//! 3. **`config/default.toml`** (lowest precedence)
//!
//! Sensitive values never live here: target credentials are resolved at the
//! CLI edge from the credential reference (`AUTODBAUDIT_PASSWORD_<REF>` or
//! an interactive prompt). The core never reads or stores plaintext
//! passwords.
//!
//! ## Example
//!
//! ```toml
//! [audit]
//! organization = "Contoso"
//! output_dir = "./out"
//! workers = 4
//!
//! [[targets]]
//! server = "PROD1"
//! port = 1433
//! auth = "sql"
//! username = "auditor"
//! credential_ref = "prod1"
//! tags = ["production"]
//! ```

use crate::error::{Error, Result};
use crate::identity::ResurfacePolicy;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Main configuration structure containing all auditor settings.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Settings {
    /// Run-level settings: organization, output layout, worker bound,
    /// timeouts, approval lists
    #[validate(nested)]
    pub audit: AuditSettings,
    /// Row-identity behavior
    #[serde(default)]
    pub identity: IdentitySettings,
    /// Remediation generator defaults
    #[serde(default)]
    #[validate(nested)]
    pub remediation: RemediationSettings,
    /// The fleet to audit
    #[validate(length(min = 1, message = "at least one target is required"), nested)]
    pub targets: Vec<TargetSettings>,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AuditSettings {
    /// Organization name recorded on every run
    #[validate(length(min = 1, message = "organization must not be empty"))]
    pub organization: String,

    /// Directory receiving `report.xlsx`, `runs/` and `remediation/`
    pub output_dir: PathBuf,

    /// History database path; defaults to `<output_dir>/history.db`
    #[serde(default)]
    pub history_path: Option<PathBuf>,

    /// Bound on concurrent target collections
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 64))]
    pub workers: usize,

    /// Per-target connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-query timeout
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Per-phase timeout for the sync pipeline
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,

    /// Logins allowed to hold sysadmin without a finding
    #[serde(default)]
    pub approved_sysadmins: Vec<String>,

    /// Database owners that do not trigger DB-001
    #[serde(default = "default_approved_db_owners")]
    pub approved_db_owners: Vec<String>,
}

impl AuditSettings {
    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("history.db"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("report.xlsx")
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentitySettings {
    /// Whether a row that disappears and later resurfaces keeps its old id
    #[serde(default)]
    pub resurface_policy: ResurfacePolicy,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct RemediationSettings {
    /// Aggressiveness used when the CLI flag is absent
    #[serde(default = "default_aggressiveness")]
    #[validate(range(min = 1, max = 3))]
    pub default_level: u8,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            default_level: default_aggressiveness(),
        }
    }
}

/// Authentication mode for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Windows,
    Sql,
}

/// One SQL Server instance to audit
#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct TargetSettings {
    #[validate(length(min = 1, message = "server must not be empty"))]
    pub server: String,

    /// Named instance; `None` means the default instance
    #[serde(default)]
    pub instance: Option<String>,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    pub auth: AuthKind,

    /// SQL auth login name; required when `auth = "sql"`
    #[serde(default)]
    pub username: Option<String>,

    /// Opaque reference resolved by the credential collaborator
    #[serde(default)]
    pub credential_ref: Option<String>,

    /// Per-target override of the global connect timeout
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl TargetSettings {
    /// `SERVER\INSTANCE` display form used in keys and logs
    pub fn display_name(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}\\{}", self.server, instance),
            None => self.server.clone(),
        }
    }

    /// Instance part of every composite key; the default instance is
    /// recorded under its conventional name.
    pub fn instance_name(&self) -> &str {
        self.instance.as_deref().unwrap_or("MSSQLSERVER")
    }
}

fn default_workers() -> usize {
    4
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_query_timeout() -> u64 {
    60
}

fn default_phase_timeout() -> u64 {
    900
}

fn default_aggressiveness() -> u8 {
    1
}

fn default_port() -> u16 {
    1433
}

fn default_approved_db_owners() -> Vec<String> {
    vec!["sa".to_string()]
}

impl Settings {
    /// Load configuration, layering the default file, an optional explicit
    /// file and `AUTODBAUDIT_*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Settings> {
        let mut builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }

        builder = builder.add_source(Environment::with_prefix("AUTODBAUDIT").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// Validate invariants the derive cannot express
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::configuration(e.to_string()))?;
        for target in &self.targets {
            if target.auth == AuthKind::Sql && target.username.is_none() {
                return Err(Error::configuration(format!(
                    "target {}: sql auth requires a username",
                    target.display_name()
                )));
            }
        }
        Ok(())
    }

    /// Stable FNV-1a-64 hash of the target list, recorded on each run so
    /// configuration drift between runs is visible.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.targets).unwrap_or_default();
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        format!("{:016x}", hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_settings() -> Settings {
        toml::from_str(
            r#"
            [audit]
            organization = "Contoso"
            output_dir = "./out"

            [[targets]]
            server = "PROD1"
            auth = "sql"
            username = "auditor"
            "#,
        )
        .expect("minimal settings parse")
    }

    #[test]
    fn test_defaults_applied() {
        let s = minimal_settings();
        assert_eq!(s.audit.workers, 4);
        assert_eq!(s.audit.connect_timeout_secs, 15);
        assert_eq!(s.audit.query_timeout_secs, 60);
        assert_eq!(s.targets[0].port, 1433);
        assert_eq!(s.remediation.default_level, 1);
        assert_eq!(s.identity.resurface_policy, ResurfacePolicy::NewUuid);
        assert_eq!(
            s.audit.history_path(),
            PathBuf::from("./out").join("history.db")
        );
    }

    #[test]
    fn test_sql_auth_requires_username() {
        let s: Settings = toml::from_str(
            r#"
            [audit]
            organization = "Contoso"
            output_dir = "./out"

            [[targets]]
            server = "PROD1"
            auth = "sql"
            "#,
        )
        .unwrap();
        assert!(s.check().is_err());
    }

    #[test]
    fn test_display_and_instance_names() {
        let mut s = minimal_settings();
        assert_eq!(s.targets[0].display_name(), "PROD1");
        assert_eq!(s.targets[0].instance_name(), "MSSQLSERVER");
        s.targets[0].instance = Some("REPORTING".to_string());
        assert_eq!(s.targets[0].display_name(), "PROD1\\REPORTING");
        assert_eq!(s.targets[0].instance_name(), "REPORTING");
    }

    #[test]
    fn test_config_hash_tracks_target_changes() {
        let a = minimal_settings();
        let mut b = minimal_settings();
        assert_eq!(a.config_hash(), b.config_hash());
        b.targets[0].port = 14330;
        assert_ne!(a.config_hash(), b.config_hash());
    }
}
