use super::{Rule, RuleCatalog};
use crate::model::{Attributes, EntityKind, RiskLevel, Status};
use once_cell::sync::Lazy;

fn bool_attr(attrs: &Attributes, name: &str) -> Option<bool> {
    attrs.get(name).and_then(|v| v.as_bool())
}

fn int_attr(attrs: &Attributes, name: &str) -> Option<i64> {
    attrs.get(name).and_then(|v| v.as_i64())
}

fn str_attr<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a str> {
    attrs.get(name).and_then(|v| v.as_str())
}

/// FAIL when the flag is true, WARN when it cannot be read
fn fail_when(flag: Option<bool>) -> Status {
    match flag {
        Some(true) => Status::Fail,
        Some(false) => Status::Pass,
        None => Status::Warn,
    }
}

fn warn_when(flag: Option<bool>) -> Status {
    match flag {
        Some(true) => Status::Warn,
        Some(false) => Status::Pass,
        None => Status::Warn,
    }
}

fn sa_enabled(attrs: &Attributes) -> Status {
    fail_when(bool_attr(attrs, "is_disabled").map(|d| !d))
}

fn sa_not_renamed(attrs: &Attributes) -> Status {
    fail_when(str_attr(attrs, "login_name").map(|n| n.eq_ignore_ascii_case("sa")))
}

fn sql_login_flag_off(attrs: &Attributes, flag: &str) -> Option<bool> {
    match str_attr(attrs, "login_type") {
        Some("sql") => bool_attr(attrs, flag).map(|on| !on),
        Some(_) => Some(false),
        None => None,
    }
}

fn password_policy_off(attrs: &Attributes) -> Status {
    fail_when(sql_login_flag_off(attrs, "password_policy_on"))
}

fn password_expiration_off(attrs: &Attributes) -> Status {
    warn_when(sql_login_flag_off(attrs, "password_expiration_on"))
}

fn unapproved_sysadmin(attrs: &Attributes) -> Status {
    match bool_attr(attrs, "is_sysadmin") {
        Some(true) => fail_when(bool_attr(attrs, "approved").map(|a| !a)),
        Some(false) => Status::Pass,
        None => Status::Warn,
    }
}

fn privileged_role_membership(attrs: &Attributes) -> Status {
    match str_attr(attrs, "role_name") {
        Some(role) => {
            let privileged = role.eq_ignore_ascii_case("sysadmin")
                || role.eq_ignore_ascii_case("securityadmin");
            if privileged && bool_attr(attrs, "approved") != Some(true) {
                Status::Fail
            } else {
                Status::Pass
            }
        }
        None => Status::Warn,
    }
}

fn config_option_enabled(attrs: &Attributes) -> Status {
    fail_when(int_attr(attrs, "run_value").map(|v| v != 0))
}

fn config_option_enabled_soft(attrs: &Attributes) -> Status {
    warn_when(int_attr(attrs, "run_value").map(|v| v != 0))
}

fn service_runs_as_localsystem(attrs: &Attributes) -> Status {
    fail_when(str_attr(attrs, "account").map(|a| {
        a.eq_ignore_ascii_case("LocalSystem") || a.eq_ignore_ascii_case("NT AUTHORITY\\SYSTEM")
    }))
}

fn unapproved_db_owner(attrs: &Attributes) -> Status {
    fail_when(bool_attr(attrs, "owner_approved").map(|a| !a))
}

fn trustworthy_on(attrs: &Attributes) -> Status {
    match str_attr(attrs, "database") {
        Some(db) if db.eq_ignore_ascii_case("msdb") => Status::Pass,
        _ => fail_when(bool_attr(attrs, "is_trustworthy_on")),
    }
}

fn auto_close_on(attrs: &Attributes) -> Status {
    warn_when(bool_attr(attrs, "is_auto_close_on"))
}

fn user_without_login(attrs: &Attributes) -> Status {
    warn_when(bool_attr(attrs, "has_matching_login").map(|h| !h))
}

fn orphaned_user_present(_attrs: &Attributes) -> Status {
    // the row's existence is the finding
    Status::Fail
}

fn control_server_grant(attrs: &Attributes) -> Status {
    match str_attr(attrs, "permission") {
        Some(p) if p.eq_ignore_ascii_case("CONTROL SERVER") => {
            fail_when(bool_attr(attrs, "grantee_approved").map(|a| !a))
        }
        Some(_) => Status::Pass,
        None => Status::Warn,
    }
}

fn public_grant_beyond_whitelist(attrs: &Attributes) -> Status {
    match str_attr(attrs, "grantee") {
        Some(g) if g.eq_ignore_ascii_case("public") => {
            fail_when(bool_attr(attrs, "whitelisted").map(|w| !w))
        }
        Some(_) => Status::Pass,
        None => Status::Warn,
    }
}

fn linked_server_self_mapping(attrs: &Attributes) -> Status {
    fail_when(bool_attr(attrs, "uses_self_mapping"))
}

fn server_trigger_present(_attrs: &Attributes) -> Status {
    // server-level DDL triggers always get operator review
    Status::Warn
}

fn stale_full_backup(attrs: &Attributes) -> Status {
    match str_attr(attrs, "database") {
        Some(db) if db.eq_ignore_ascii_case("tempdb") => Status::Pass,
        _ => match int_attr(attrs, "days_since_full") {
            Some(days) => {
                if days > 7 {
                    Status::Fail
                } else {
                    Status::Pass
                }
            }
            // never backed up
            None => Status::Fail,
        },
    }
}

fn backup_on_data_volume(attrs: &Attributes) -> Status {
    warn_when(bool_attr(attrs, "same_volume_as_data"))
}

fn superfluous_protocol_enabled(attrs: &Attributes) -> Status {
    match (str_attr(attrs, "protocol"), bool_attr(attrs, "enabled")) {
        (Some(p), Some(true)) => {
            let expected =
                p.eq_ignore_ascii_case("TCP/IP") || p.eq_ignore_ascii_case("Shared Memory");
            if expected {
                Status::Pass
            } else {
                Status::Warn
            }
        }
        (Some(_), Some(false)) => Status::Pass,
        _ => Status::Warn,
    }
}

fn inventory_only(_attrs: &Attributes) -> Status {
    Status::Info
}

fn audit_setting_insufficient(attrs: &Attributes) -> Status {
    match str_attr(attrs, "value") {
        // anything below failed-only auditing is a finding
        Some(v) => {
            if v.eq_ignore_ascii_case("none")
                || v.eq_ignore_ascii_case("absent")
                || v.eq_ignore_ascii_case("success_only")
            {
                Status::Fail
            } else {
                Status::Pass
            }
        }
        None => Status::Warn,
    }
}

fn db_owner_membership(_attrs: &Attributes) -> Status {
    // the query only returns non-dbo members of db_owner; each is reviewed
    Status::Warn
}

static CATALOG: Lazy<RuleCatalog> = Lazy::new(|| {
    use EntityKind::*;
    use RiskLevel::*;

    RuleCatalog::new(vec![
        Rule {
            id: "SA-001",
            title: "sa account enabled",
            entity_kind: SaAccount,
            subject: None,
            risk_level: High,
            predicate: sa_enabled,
            fix_id: Some("disable_sa"),
        },
        Rule {
            id: "SA-002",
            title: "sa account not renamed",
            entity_kind: SaAccount,
            subject: None,
            risk_level: Medium,
            predicate: sa_not_renamed,
            fix_id: Some("rename_sa"),
        },
        Rule {
            id: "LOG-001",
            title: "SQL login without password policy",
            entity_kind: Login,
            subject: None,
            risk_level: High,
            predicate: password_policy_off,
            fix_id: Some("enable_password_policy"),
        },
        Rule {
            id: "LOG-002",
            title: "SQL login without password expiration",
            entity_kind: Login,
            subject: None,
            risk_level: Medium,
            predicate: password_expiration_off,
            fix_id: Some("enable_password_expiration"),
        },
        Rule {
            id: "LOG-003",
            title: "unapproved sysadmin login",
            entity_kind: Login,
            subject: None,
            risk_level: High,
            predicate: unapproved_sysadmin,
            fix_id: None,
        },
        Rule {
            id: "ROLE-001",
            title: "privileged server role membership",
            entity_kind: ServerRoleMember,
            subject: None,
            risk_level: High,
            predicate: privileged_role_membership,
            fix_id: Some("revoke_role_member"),
        },
        Rule {
            id: "CFG-001",
            title: "xp_cmdshell enabled",
            entity_kind: Config,
            subject: Some("xp_cmdshell"),
            risk_level: High,
            predicate: config_option_enabled,
            fix_id: Some("disable_config_option"),
        },
        Rule {
            id: "CFG-002",
            title: "Ole Automation Procedures enabled",
            entity_kind: Config,
            subject: Some("Ole Automation Procedures"),
            risk_level: Medium,
            predicate: config_option_enabled,
            fix_id: Some("disable_config_option"),
        },
        Rule {
            id: "CFG-003",
            title: "Database Mail XPs enabled",
            entity_kind: Config,
            subject: Some("Database Mail XPs"),
            risk_level: Medium,
            predicate: config_option_enabled,
            fix_id: Some("disable_config_option"),
        },
        Rule {
            id: "CFG-004",
            title: "remote admin connections enabled",
            entity_kind: Config,
            subject: Some("remote admin connections"),
            risk_level: Low,
            predicate: config_option_enabled_soft,
            fix_id: Some("disable_config_option"),
        },
        Rule {
            id: "CFG-005",
            title: "CLR integration enabled",
            entity_kind: Config,
            subject: Some("clr enabled"),
            risk_level: Medium,
            predicate: config_option_enabled,
            fix_id: Some("disable_config_option"),
        },
        Rule {
            id: "SVC-001",
            title: "service running as LocalSystem",
            entity_kind: Service,
            subject: None,
            risk_level: Medium,
            predicate: service_runs_as_localsystem,
            fix_id: None,
        },
        Rule {
            id: "DB-001",
            title: "database owner not approved",
            entity_kind: Database,
            subject: None,
            risk_level: Medium,
            predicate: unapproved_db_owner,
            fix_id: Some("set_db_owner"),
        },
        Rule {
            id: "DB-002",
            title: "TRUSTWORTHY enabled",
            entity_kind: Database,
            subject: None,
            risk_level: High,
            predicate: trustworthy_on,
            fix_id: Some("disable_trustworthy"),
        },
        Rule {
            id: "DB-003",
            title: "AUTO_CLOSE enabled",
            entity_kind: Database,
            subject: None,
            risk_level: Low,
            predicate: auto_close_on,
            fix_id: Some("disable_auto_close"),
        },
        Rule {
            id: "DBROLE-001",
            title: "non-dbo member of db_owner",
            entity_kind: DbRoleMember,
            subject: None,
            risk_level: Medium,
            predicate: db_owner_membership,
            fix_id: None,
        },
        Rule {
            id: "USR-001",
            title: "database user without matching login",
            entity_kind: DbUser,
            subject: None,
            risk_level: Medium,
            predicate: user_without_login,
            fix_id: None,
        },
        Rule {
            id: "ORPH-001",
            title: "orphaned database user",
            entity_kind: OrphanedUser,
            subject: None,
            risk_level: Medium,
            predicate: orphaned_user_present,
            fix_id: Some("drop_orphaned_user"),
        },
        Rule {
            id: "PERM-001",
            title: "CONTROL SERVER granted",
            entity_kind: Permission,
            subject: None,
            risk_level: High,
            predicate: control_server_grant,
            fix_id: Some("revoke_permission"),
        },
        Rule {
            id: "PERM-002",
            title: "grant to public beyond whitelist",
            entity_kind: Permission,
            subject: None,
            risk_level: Medium,
            predicate: public_grant_beyond_whitelist,
            fix_id: Some("revoke_permission"),
        },
        Rule {
            id: "LNK-001",
            title: "linked server with open self-mapping",
            entity_kind: LinkedServer,
            subject: None,
            risk_level: Medium,
            predicate: linked_server_self_mapping,
            fix_id: None,
        },
        Rule {
            id: "TRG-001",
            title: "server-level DDL trigger",
            entity_kind: Trigger,
            subject: None,
            risk_level: Medium,
            predicate: server_trigger_present,
            fix_id: None,
        },
        Rule {
            id: "BK-001",
            title: "no recent full backup",
            entity_kind: Backup,
            subject: None,
            risk_level: High,
            predicate: stale_full_backup,
            fix_id: None,
        },
        Rule {
            id: "BK-002",
            title: "backups on data volume",
            entity_kind: Backup,
            subject: None,
            risk_level: Medium,
            predicate: backup_on_data_volume,
            fix_id: None,
        },
        Rule {
            id: "PROTO-001",
            title: "superfluous protocol enabled",
            entity_kind: Protocol,
            subject: None,
            risk_level: Medium,
            predicate: superfluous_protocol_enabled,
            fix_id: Some("disable_protocol"),
        },
        Rule {
            id: "ENC-001",
            title: "encryption key inventory",
            entity_kind: EncryptionKey,
            subject: None,
            risk_level: Low,
            predicate: inventory_only,
            fix_id: None,
        },
        Rule {
            id: "AUD-001",
            title: "login auditing insufficient",
            entity_kind: AuditSetting,
            subject: None,
            risk_level: Medium,
            predicate: audit_setting_insufficient,
            fix_id: Some("set_login_auditing"),
        },
        Rule {
            id: "INST-001",
            title: "instance inventory",
            entity_kind: Instance,
            subject: None,
            risk_level: Low,
            predicate: inventory_only,
            fix_id: None,
        },
    ])
});

/// The process-wide rule catalog. Immutable policy; pass it explicitly.
pub fn catalog() -> &'static RuleCatalog {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_catalog_ids_unique_and_resolvable() {
        let cat = catalog();
        let mut seen = std::collections::HashSet::new();
        for rule in cat.all() {
            assert!(seen.insert(rule.id), "duplicate rule id {}", rule.id);
            assert!(cat.get(rule.id).is_some());
        }
        assert!(cat.len() >= 25);
    }

    #[test]
    fn test_every_kind_has_at_least_one_rule() {
        let cat = catalog();
        for kind in EntityKind::ALL {
            assert!(
                cat.rules_for(kind).next().is_some(),
                "no rule for kind {kind}"
            );
        }
    }

    #[test]
    fn test_sa_rules() {
        let cat = catalog();
        let sa001 = cat.get("SA-001").unwrap();
        assert_eq!(
            sa001.evaluate(&attrs(&[("is_disabled", json!(false))])),
            Status::Fail
        );
        assert_eq!(
            sa001.evaluate(&attrs(&[("is_disabled", json!(true))])),
            Status::Pass
        );

        let sa002 = cat.get("SA-002").unwrap();
        assert_eq!(
            sa002.evaluate(&attrs(&[("login_name", json!("sa"))])),
            Status::Fail
        );
        assert_eq!(
            sa002.evaluate(&attrs(&[("login_name", json!("sentinel_admin"))])),
            Status::Pass
        );
    }

    #[test]
    fn test_password_rules_ignore_windows_logins() {
        let cat = catalog();
        let log001 = cat.get("LOG-001").unwrap();
        assert_eq!(
            log001.evaluate(&attrs(&[
                ("login_type", json!("windows")),
                ("password_policy_on", json!(false)),
            ])),
            Status::Pass
        );
        assert_eq!(
            log001.evaluate(&attrs(&[
                ("login_type", json!("sql")),
                ("password_policy_on", json!(false)),
            ])),
            Status::Fail
        );
    }

    #[test]
    fn test_missing_inputs_classify_warn() {
        let cat = catalog();
        assert_eq!(cat.get("SA-001").unwrap().evaluate(&attrs(&[])), Status::Warn);
        assert_eq!(
            cat.get("BK-002").unwrap().evaluate(&attrs(&[])),
            Status::Warn
        );
        assert_eq!(
            cat.get("CFG-001")
                .unwrap()
                .evaluate(&attrs(&[("data_missing", json!(true))])),
            Status::Warn
        );
    }

    #[test]
    fn test_trustworthy_exempts_msdb() {
        let db002 = catalog().get("DB-002").unwrap();
        assert_eq!(
            db002.evaluate(&attrs(&[
                ("database", json!("msdb")),
                ("is_trustworthy_on", json!(true)),
            ])),
            Status::Pass
        );
        assert_eq!(
            db002.evaluate(&attrs(&[
                ("database", json!("Payroll")),
                ("is_trustworthy_on", json!(true)),
            ])),
            Status::Fail
        );
    }

    #[test]
    fn test_backup_staleness() {
        let bk001 = catalog().get("BK-001").unwrap();
        assert_eq!(
            bk001.evaluate(&attrs(&[
                ("database", json!("Payroll")),
                ("days_since_full", json!(2)),
            ])),
            Status::Pass
        );
        assert_eq!(
            bk001.evaluate(&attrs(&[
                ("database", json!("Payroll")),
                ("days_since_full", json!(30)),
            ])),
            Status::Fail
        );
        // never backed up
        assert_eq!(
            bk001.evaluate(&attrs(&[("database", json!("Payroll"))])),
            Status::Fail
        );
        // tempdb is exempt
        assert_eq!(
            bk001.evaluate(&attrs(&[("database", json!("tempdb"))])),
            Status::Pass
        );
    }

    #[test]
    fn test_config_rules_apply_only_to_their_setting() {
        let cat = catalog();
        let xp = attrs(&[("setting", json!("xp_cmdshell")), ("run_value", json!(1))]);
        assert!(cat.get("CFG-001").unwrap().applies_to(&xp));
        assert!(!cat.get("CFG-002").unwrap().applies_to(&xp));
        assert!(!cat.get("CFG-004").unwrap().applies_to(&xp));
        // rules without a subject apply everywhere
        assert!(cat.get("SA-001").unwrap().applies_to(&xp));
    }

    #[test]
    fn test_informational_kinds_always_info() {
        let cat = catalog();
        assert_eq!(cat.get("INST-001").unwrap().evaluate(&attrs(&[])), Status::Info);
        assert_eq!(cat.get("ENC-001").unwrap().evaluate(&attrs(&[])), Status::Info);
    }
}
