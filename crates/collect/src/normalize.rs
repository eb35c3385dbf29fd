//! The fact normalizer: maps raw driver rows into uniform observations by
//! building the canonical composite key for the entity kind, extracting
//! kind-specific attributes, evaluating rule predicates and tagging the
//! result.
//!
//! Several rules can observe the same entity (the password rules all see
//! one login; both backup rules see one database), and (kind, key) is
//! unique within a run. Rows are therefore merged per entity first; each
//! entity is then evaluated by exactly the rules whose queries produced it,
//! and the fact carries the worst evaluation.
//!
//! Keys come from stable SQL-visible names, NFC-normalized with case
//! preserved; null and empty string stay distinct.

use crate::driver::RawRow;
use audit_core::text::{canonical_value, nfc};
use audit_core::{
    Attributes, AuditSettings, CompositeKey, EntityKind, Observation, Rule, Status, TargetSettings,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// The SQL column names forming each kind's key after (server, instance)
fn key_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::SaAccount | EntityKind::Login => &["login_name"],
        EntityKind::ServerRoleMember => &["role_name", "member_name"],
        EntityKind::Config => &["setting"],
        EntityKind::Service => &["service_name"],
        EntityKind::Database => &["database"],
        EntityKind::DbUser | EntityKind::OrphanedUser => &["database", "user_name"],
        EntityKind::DbRoleMember => &["database", "role_name", "member_name"],
        EntityKind::Permission => {
            &["scope", "database", "grantee", "permission", "state", "entity"]
        }
        EntityKind::LinkedServer => &["linked_server"],
        EntityKind::Trigger => &["scope", "trigger_name"],
        EntityKind::Backup => &["database"],
        EntityKind::Protocol => &["protocol"],
        EntityKind::EncryptionKey => &["database", "key_name", "key_type"],
        EntityKind::AuditSetting => &["setting"],
        EntityKind::Instance => &[],
    }
}

/// Columns copied into the attribute map, per kind: (strings, bools, ints)
fn attribute_columns(
    kind: EntityKind,
) -> (
    &'static [&'static str],
    &'static [&'static str],
    &'static [&'static str],
) {
    match kind {
        EntityKind::SaAccount => (&["login_name"], &["is_disabled"], &[]),
        EntityKind::Login => (
            &["login_name", "login_type", "created_at"],
            &[
                "is_disabled",
                "password_policy_on",
                "password_expiration_on",
                "is_sysadmin",
            ],
            &[],
        ),
        EntityKind::ServerRoleMember => (&["role_name", "member_name", "member_type"], &[], &[]),
        EntityKind::Config => (&["setting"], &[], &["configured_value", "run_value"]),
        EntityKind::Service => (
            &["service_name", "account", "startup_type", "status"],
            &[],
            &[],
        ),
        EntityKind::Database => (
            &["database", "owner", "recovery_model", "state"],
            &["is_trustworthy_on", "is_auto_close_on"],
            &[],
        ),
        EntityKind::DbUser => (
            &["database", "user_name", "user_type"],
            &["has_matching_login"],
            &[],
        ),
        EntityKind::DbRoleMember => (&["database", "role_name", "member_name"], &[], &[]),
        EntityKind::OrphanedUser => (&["database", "user_name"], &[], &[]),
        EntityKind::Permission => (
            &["scope", "database", "grantee", "permission", "state", "entity"],
            &[],
            &[],
        ),
        EntityKind::LinkedServer => (
            &["linked_server", "product", "provider", "data_source", "remote_login"],
            &["uses_self_mapping"],
            &[],
        ),
        EntityKind::Trigger => (&["scope", "trigger_name", "trigger_type"], &["is_disabled"], &[]),
        EntityKind::Backup => (
            &["database", "recovery_model"],
            &["same_volume_as_data"],
            &["days_since_full"],
        ),
        EntityKind::Protocol => (&["protocol"], &["enabled"], &[]),
        EntityKind::EncryptionKey => (
            &["database", "key_name", "key_type", "algorithm"],
            &[],
            &[],
        ),
        EntityKind::AuditSetting => (&["setting", "value"], &[], &[]),
        EntityKind::Instance => (
            &[
                "machine_name",
                "instance_name",
                "product_version",
                "product_level",
                "edition",
                "collation",
                "host_platform",
            ],
            &["is_clustered", "windows_auth_only"],
            &[],
        ),
    }
}

fn get_str(row: &RawRow, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(nfc(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn get_bool(row: &RawRow, column: &str) -> Option<bool> {
    match row.get(column)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.as_str() {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn get_i64(row: &RawRow, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn severity_rank(status: Status) -> u8 {
    match status {
        Status::Info => 0,
        Status::Pass => 1,
        Status::Warn => 2,
        Status::Fail => 3,
    }
}

/// Maps raw rows to observations. Holds the approval lists the predicates
/// consult through computed attributes.
pub struct FactNormalizer {
    approved_sysadmins: HashSet<String>,
    approved_db_owners: HashSet<String>,
}

impl FactNormalizer {
    pub fn new(settings: &AuditSettings) -> Self {
        Self {
            approved_sysadmins: settings
                .approved_sysadmins
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            approved_db_owners: settings
                .approved_db_owners
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Normalize one kind's rows for one target. `rule_rows` holds, per
    /// rule that executed successfully, the raw rows its query returned.
    /// Rows whose key columns are absent are skipped and counted.
    pub fn normalize_kind<'a>(
        &self,
        target: &TargetSettings,
        kind: EntityKind,
        rule_rows: &[(&'a Rule, Vec<RawRow>)],
    ) -> (Vec<Observation>, usize) {
        let mut skipped = 0;
        let mut entities: BTreeMap<CompositeKey, (Attributes, Vec<&'a Rule>)> = BTreeMap::new();

        for (rule, rows) in rule_rows {
            debug_assert_eq!(rule.entity_kind, kind);
            for row in rows {
                let Some((key, attrs)) = self.extract(target, kind, row) else {
                    skipped += 1;
                    warn!(
                        rule = rule.id,
                        target = %target.display_name(),
                        "skipped row with missing key columns"
                    );
                    continue;
                };
                let entry = entities.entry(key).or_default();
                entry.0.extend(attrs);
                if !entry.1.iter().any(|r| r.id == rule.id) {
                    entry.1.push(rule);
                }
            }
        }

        let collected_at = Utc::now();
        let mut observations = Vec::with_capacity(entities.len());
        for (key, (mut attributes, rules)) in entities {
            self.computed_attributes(kind, &mut attributes);

            // the fact carries the worst evaluation among the rules whose
            // queries produced this entity
            let mut worst = rules[0];
            let mut worst_status = worst.evaluate(&attributes);
            for rule in rules.iter().skip(1) {
                let status = rule.evaluate(&attributes);
                if severity_rank(status) > severity_rank(worst_status) {
                    worst = rule;
                    worst_status = status;
                }
            }

            observations.push(Observation {
                entity_kind: kind,
                composite_key: key,
                attributes,
                status: worst_status,
                rule_id: worst.id.to_string(),
                risk_level: worst.risk_level,
                collected_at,
            });
        }

        (observations, skipped)
    }

    fn extract(
        &self,
        target: &TargetSettings,
        kind: EntityKind,
        row: &RawRow,
    ) -> Option<(CompositeKey, Attributes)> {
        let mut parts = Vec::with_capacity(2 + key_columns(kind).len());
        parts.push(canonical_value(&target.server));
        parts.push(canonical_value(target.instance_name()));
        for column in key_columns(kind) {
            parts.push(canonical_value(&get_str(row, column)?));
        }
        let key = CompositeKey::new(parts);

        let mut attributes = Attributes::new();
        let (strings, bools, ints) = attribute_columns(kind);
        for column in strings {
            if let Some(v) = get_str(row, column) {
                attributes.insert(column.to_string(), Value::from(v));
            }
        }
        for column in bools {
            if let Some(v) = get_bool(row, column) {
                attributes.insert(column.to_string(), Value::from(v));
            }
        }
        for column in ints {
            if let Some(v) = get_i64(row, column) {
                attributes.insert(column.to_string(), Value::from(v));
            }
        }

        Some((key, attributes))
    }

    fn computed_attributes(&self, kind: EntityKind, attributes: &mut Attributes) {
        let lower = |attrs: &Attributes, name: &str| -> Option<String> {
            attrs.get(name).and_then(|v| v.as_str()).map(str::to_lowercase)
        };

        match kind {
            EntityKind::Login => {
                if let Some(name) = lower(attributes, "login_name") {
                    attributes.insert(
                        "approved".to_string(),
                        Value::from(self.approved_sysadmins.contains(&name)),
                    );
                }
            }
            EntityKind::ServerRoleMember => {
                if let Some(member) = lower(attributes, "member_name") {
                    attributes.insert(
                        "approved".to_string(),
                        Value::from(self.approved_sysadmins.contains(&member)),
                    );
                }
            }
            EntityKind::Database => {
                if let Some(owner) = lower(attributes, "owner") {
                    attributes.insert(
                        "owner_approved".to_string(),
                        Value::from(self.approved_db_owners.contains(&owner)),
                    );
                }
            }
            EntityKind::Permission => {
                if let Some(grantee) = lower(attributes, "grantee") {
                    attributes.insert(
                        "grantee_approved".to_string(),
                        Value::from(grantee == "sa" || self.approved_sysadmins.contains(&grantee)),
                    );
                }
                if let Some(permission) = lower(attributes, "permission") {
                    let whitelisted =
                        permission == "connect" || permission == "view any database";
                    attributes.insert("whitelisted".to_string(), Value::from(whitelisted));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::rules::catalog;
    use serde_json::json;

    fn settings() -> AuditSettings {
        AuditSettings {
            organization: "Contoso".into(),
            output_dir: "./out".into(),
            history_path: None,
            workers: 4,
            connect_timeout_secs: 15,
            query_timeout_secs: 60,
            phase_timeout_secs: 900,
            approved_sysadmins: vec!["CONTOSO\\dba_team".into()],
            approved_db_owners: vec!["sa".into()],
        }
    }

    fn target() -> TargetSettings {
        TargetSettings {
            server: "PROD1".into(),
            instance: None,
            port: 1433,
            auth: audit_core::AuthKind::Sql,
            username: Some("auditor".into()),
            credential_ref: None,
            connect_timeout_secs: None,
            tags: vec![],
        }
    }

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn login_row(name: &str, policy_on: bool, expiration_on: bool) -> RawRow {
        row(&[
            ("login_name", json!(name)),
            ("login_type", json!("sql")),
            ("is_disabled", json!(0)),
            ("password_policy_on", json!(if policy_on { 1 } else { 0 })),
            ("password_expiration_on", json!(if expiration_on { 1 } else { 0 })),
            ("is_sysadmin", json!(0)),
        ])
    }

    #[test]
    fn test_one_fact_per_login_with_worst_rule() {
        let normalizer = FactNormalizer::new(&settings());
        let cat = catalog();
        let log1 = cat.get("LOG-001").unwrap();
        let log2 = cat.get("LOG-002").unwrap();
        let log3 = cat.get("LOG-003").unwrap();

        // all three login rules share one query, so each sees the same rows
        let rows = vec![login_row("rogue_admin", false, false)];
        let rule_rows = vec![
            (log1, rows.clone()),
            (log2, rows.clone()),
            (log3, rows.clone()),
        ];

        let (observations, skipped) =
            normalizer.normalize_kind(&target(), EntityKind::Login, &rule_rows);
        assert_eq!(skipped, 0);
        assert_eq!(observations.len(), 1, "one fact per entity, not per rule");

        let obs = &observations[0];
        assert_eq!(
            obs.composite_key.parts(),
            &["PROD1".to_string(), "MSSQLSERVER".to_string(), "rogue_admin".to_string()]
        );
        // LOG-001 (FAIL) outranks LOG-002 (WARN)
        assert_eq!(obs.status, Status::Fail);
        assert_eq!(obs.rule_id, "LOG-001");
        assert_eq!(obs.attributes["password_policy_on"], json!(false));
    }

    #[test]
    fn test_compliant_login_reports_pass() {
        let normalizer = FactNormalizer::new(&settings());
        let cat = catalog();
        let rows = vec![login_row("app_svc", true, true)];
        let rule_rows = vec![
            (cat.get("LOG-001").unwrap(), rows.clone()),
            (cat.get("LOG-002").unwrap(), rows.clone()),
        ];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Login, &rule_rows);
        assert_eq!(observations[0].status, Status::Pass);
    }

    #[test]
    fn test_backup_rules_merge_attributes_for_one_database() {
        let normalizer = FactNormalizer::new(&settings());
        let cat = catalog();
        let age_rows = vec![row(&[
            ("database", json!("Payroll")),
            ("days_since_full", json!(30)),
            ("recovery_model", json!("FULL")),
        ])];
        let volume_rows = vec![row(&[
            ("database", json!("Payroll")),
            ("same_volume_as_data", json!(1)),
        ])];
        let rule_rows = vec![
            (cat.get("BK-001").unwrap(), age_rows),
            (cat.get("BK-002").unwrap(), volume_rows),
        ];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Backup, &rule_rows);
        assert_eq!(observations.len(), 1);
        let obs = &observations[0];
        // both rules' attributes merged onto the single entity
        assert_eq!(obs.attributes["days_since_full"], json!(30));
        assert_eq!(obs.attributes["same_volume_as_data"], json!(true));
        // BK-001 FAIL outranks BK-002 WARN
        assert_eq!(obs.status, Status::Fail);
        assert_eq!(obs.rule_id, "BK-001");
    }

    #[test]
    fn test_config_entities_evaluated_only_by_their_rule() {
        let normalizer = FactNormalizer::new(&settings());
        let cat = catalog();
        let xp_rows = vec![row(&[
            ("setting", json!("xp_cmdshell")),
            ("configured_value", json!(1)),
            ("run_value", json!(1)),
        ])];
        let dac_rows = vec![row(&[
            ("setting", json!("remote admin connections")),
            ("configured_value", json!(0)),
            ("run_value", json!(0)),
        ])];
        let rule_rows = vec![
            (cat.get("CFG-001").unwrap(), xp_rows),
            (cat.get("CFG-004").unwrap(), dac_rows),
        ];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Config, &rule_rows);
        assert_eq!(observations.len(), 2);

        let xp = observations
            .iter()
            .find(|o| o.composite_key.parts()[2] == "xp_cmdshell")
            .unwrap();
        assert_eq!(xp.status, Status::Fail);
        assert_eq!(xp.rule_id, "CFG-001");

        let dac = observations
            .iter()
            .find(|o| o.composite_key.parts()[2] == "remote admin connections")
            .unwrap();
        assert_eq!(dac.status, Status::Pass);
        assert_eq!(dac.rule_id, "CFG-004");
    }

    #[test]
    fn test_approved_sysadmin_passes() {
        let normalizer = FactNormalizer::new(&settings());
        let cat = catalog();
        let rows = vec![row(&[
            ("login_name", json!("CONTOSO\\dba_team")),
            ("login_type", json!("windows")),
            ("is_disabled", json!(0)),
            ("is_sysadmin", json!(1)),
        ])];
        let rule_rows = vec![(cat.get("LOG-003").unwrap(), rows)];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Login, &rule_rows);
        assert_eq!(observations[0].status, Status::Pass);
    }

    #[test]
    fn test_missing_key_column_skips_row() {
        let normalizer = FactNormalizer::new(&settings());
        let rule = catalog().get("LOG-001").unwrap();
        let rule_rows = vec![(rule, vec![row(&[("login_type", json!("sql"))])])];

        let (observations, skipped) =
            normalizer.normalize_kind(&target(), EntityKind::Login, &rule_rows);
        assert!(observations.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_permission_key_shape_and_whitelist() {
        let normalizer = FactNormalizer::new(&settings());
        let rule = catalog().get("PERM-002").unwrap();
        let rows = vec![row(&[
            ("scope", json!("server")),
            ("database", json!("")),
            ("grantee", json!("public")),
            ("permission", json!("CONNECT")),
            ("state", json!("GRANT")),
            ("entity", json!("TSQL Default TCP")),
        ])];
        let rule_rows = vec![(rule, rows)];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Permission, &rule_rows);
        let obs = &observations[0];
        assert_eq!(obs.composite_key.parts().len(), 8);
        // empty database stays an empty key part, not a dropped one
        assert_eq!(obs.composite_key.parts()[3], "");
        assert_eq!(obs.status, Status::Pass);
    }

    #[test]
    fn test_backup_without_history_fails() {
        let normalizer = FactNormalizer::new(&settings());
        let rule = catalog().get("BK-001").unwrap();
        // days_since_full is NULL -> column omitted by the driver
        let rule_rows = vec![(
            rule,
            vec![row(&[
                ("database", json!("Payroll")),
                ("recovery_model", json!("FULL")),
            ])],
        )];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Backup, &rule_rows);
        assert_eq!(observations[0].status, Status::Fail);
        assert!(!observations[0].attributes.contains_key("days_since_full"));
    }

    #[test]
    fn test_instance_rows_are_informational() {
        let normalizer = FactNormalizer::new(&settings());
        let rule = catalog().get("INST-001").unwrap();
        let rule_rows = vec![(
            rule,
            vec![row(&[
                ("machine_name", json!("PROD1")),
                ("instance_name", json!("MSSQLSERVER")),
                ("product_version", json!("15.0.2000.5")),
            ])],
        )];

        let (observations, _) =
            normalizer.normalize_kind(&target(), EntityKind::Instance, &rule_rows);
        let obs = &observations[0];
        assert_eq!(obs.status, Status::Info);
        assert_eq!(obs.composite_key.parts(), &["PROD1", "MSSQLSERVER"]);
    }
}
