//! Fix templates, one per remediable rule category. Every destructive
//! statement carries an `IF EXISTS` / `IF NOT EXISTS` guard so scripts can
//! be re-run safely, and every template knows its inverse for the rollback
//! comment.

use audit_core::Fact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Tsql,
    Os,
}

#[derive(Debug, Clone)]
pub struct FixScript {
    pub kind: ScriptKind,
    /// Guarded, idempotent statement
    pub statement: String,
    /// Inverse statement, emitted as a comment
    pub rollback: Option<String>,
    pub requires_restart: bool,
    /// Principal the fix disables, renames or strips rights from; used by
    /// the connecting-identity safeguard
    pub target_principal: Option<String>,
}

fn bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn attr_str<'a>(fact: &'a Fact, name: &str) -> Option<&'a str> {
    fact.attributes.get(name).and_then(|v| v.as_str())
}

/// Build the fix for one (fix id, fact) pair. `None` means the category is
/// manual-only.
pub fn build(fix_id: &str, fact: &Fact) -> Option<FixScript> {
    let parts = fact.composite_key.parts();
    match fix_id {
        "disable_sa" => {
            let name = attr_str(fact, "login_name").unwrap_or("sa").to_string();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.server_principals WHERE sid = 0x01 AND is_disabled = 0)\n    ALTER LOGIN {} DISABLE;",
                    bracket(&name)
                ),
                rollback: Some(format!("ALTER LOGIN {} ENABLE;", bracket(&name))),
                requires_restart: false,
                target_principal: Some(name),
            })
        }
        "rename_sa" => {
            let name = attr_str(fact, "login_name").unwrap_or("sa").to_string();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.server_principals WHERE sid = 0x01 AND name = {})\n    ALTER LOGIN {} WITH NAME = [sqladmin_renamed];",
                    quote(&name),
                    bracket(&name)
                ),
                rollback: Some(format!(
                    "ALTER LOGIN [sqladmin_renamed] WITH NAME = {};",
                    bracket(&name)
                )),
                requires_restart: false,
                target_principal: Some(name),
            })
        }
        "enable_password_policy" | "enable_password_expiration" => {
            let login = parts.get(2)?.clone();
            let (option, flag) = if fix_id == "enable_password_policy" {
                ("CHECK_POLICY", "is_policy_checked")
            } else {
                ("CHECK_EXPIRATION", "is_expiration_checked")
            };
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.sql_logins WHERE name = {} AND {flag} = 0)\n    ALTER LOGIN {} WITH {option} = ON;",
                    quote(&login),
                    bracket(&login)
                ),
                rollback: Some(format!(
                    "ALTER LOGIN {} WITH {option} = OFF;",
                    bracket(&login)
                )),
                requires_restart: false,
                target_principal: Some(login),
            })
        }
        "revoke_role_member" => {
            let role = parts.get(2)?.clone();
            let member = parts.get(3)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.server_role_members srm\n            JOIN sys.server_principals r ON r.principal_id = srm.role_principal_id\n            JOIN sys.server_principals m ON m.principal_id = srm.member_principal_id\n            WHERE r.name = {} AND m.name = {})\n    EXEC sp_dropsrvrolemember {}, {};",
                    quote(&role),
                    quote(&member),
                    quote(&member),
                    quote(&role)
                ),
                rollback: Some(format!(
                    "EXEC sp_addsrvrolemember {}, {};",
                    quote(&member),
                    quote(&role)
                )),
                requires_restart: false,
                target_principal: Some(member),
            })
        }
        "disable_config_option" => {
            let setting = parts.get(2)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.configurations WHERE name = {} AND CAST(value_in_use AS INT) <> 0)\nBEGIN\n    EXEC sp_configure 'show advanced options', 1;\n    RECONFIGURE;\n    EXEC sp_configure {}, 0;\n    RECONFIGURE;\nEND",
                    quote(&setting),
                    quote(&setting)
                ),
                rollback: Some(format!(
                    "EXEC sp_configure {}, 1; RECONFIGURE;",
                    quote(&setting)
                )),
                requires_restart: false,
                target_principal: None,
            })
        }
        "set_db_owner" => {
            let database = parts.get(2)?.clone();
            let owner = attr_str(fact, "owner").unwrap_or("").to_string();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.databases WHERE name = {} AND SUSER_SNAME(owner_sid) <> 'sa')\n    ALTER AUTHORIZATION ON DATABASE::{} TO [sa];",
                    quote(&database),
                    bracket(&database)
                ),
                rollback: Some(format!(
                    "ALTER AUTHORIZATION ON DATABASE::{} TO {};",
                    bracket(&database),
                    bracket(&owner)
                )),
                requires_restart: false,
                target_principal: None,
            })
        }
        "disable_trustworthy" => {
            let database = parts.get(2)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.databases WHERE name = {} AND is_trustworthy_on = 1)\n    ALTER DATABASE {} SET TRUSTWORTHY OFF;",
                    quote(&database),
                    bracket(&database)
                ),
                rollback: Some(format!(
                    "ALTER DATABASE {} SET TRUSTWORTHY ON;",
                    bracket(&database)
                )),
                requires_restart: false,
                target_principal: None,
            })
        }
        "disable_auto_close" => {
            let database = parts.get(2)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.databases WHERE name = {} AND is_auto_close_on = 1)\n    ALTER DATABASE {} SET AUTO_CLOSE OFF;",
                    quote(&database),
                    bracket(&database)
                ),
                rollback: Some(format!(
                    "ALTER DATABASE {} SET AUTO_CLOSE ON;",
                    bracket(&database)
                )),
                requires_restart: false,
                target_principal: None,
            })
        }
        "drop_orphaned_user" => {
            let database = parts.get(2)?.clone();
            let user = parts.get(3)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "USE {};\nIF EXISTS (SELECT 1 FROM sys.database_principals dp\n            LEFT JOIN sys.server_principals sp ON dp.sid = sp.sid\n            WHERE dp.name = {} AND sp.sid IS NULL)\n    DROP USER {};",
                    bracket(&database),
                    quote(&user),
                    bracket(&user)
                ),
                rollback: Some(format!(
                    "-- recreate from a permissions snapshot: CREATE USER {} ...;",
                    bracket(&user)
                )),
                requires_restart: false,
                target_principal: Some(user),
            })
        }
        "revoke_permission" => {
            let grantee = parts.get(4)?.clone();
            let permission = parts.get(5)?.clone();
            Some(FixScript {
                kind: ScriptKind::Tsql,
                statement: format!(
                    "IF EXISTS (SELECT 1 FROM sys.server_permissions pe\n            JOIN sys.server_principals pr ON pr.principal_id = pe.grantee_principal_id\n            WHERE pr.name = {} AND pe.permission_name = {})\n    REVOKE {} FROM {};",
                    quote(&grantee),
                    quote(&permission),
                    permission,
                    bracket(&grantee)
                ),
                rollback: Some(format!("GRANT {} TO {};", permission, bracket(&grantee))),
                requires_restart: false,
                target_principal: Some(grantee),
            })
        }
        "disable_protocol" => {
            let protocol = parts.get(2)?.clone();
            let registry_leaf = match protocol.as_str() {
                "Named Pipes" => "Np",
                "VIA" => "Via",
                _ => return None,
            };
            Some(FixScript {
                kind: ScriptKind::Os,
                statement: format!(
                    "Set-ItemProperty -Path 'HKLM:\\SOFTWARE\\Microsoft\\MSSQLServer\\MSSQLServer\\SuperSocketNetLib\\{registry_leaf}' -Name Enabled -Value 0"
                ),
                rollback: Some(format!(
                    "Set-ItemProperty -Path 'HKLM:\\SOFTWARE\\Microsoft\\MSSQLServer\\MSSQLServer\\SuperSocketNetLib\\{registry_leaf}' -Name Enabled -Value 1"
                )),
                requires_restart: true,
                target_principal: None,
            })
        }
        "set_login_auditing" => Some(FixScript {
            kind: ScriptKind::Tsql,
            statement: "EXEC master.dbo.xp_instance_regwrite N'HKEY_LOCAL_MACHINE',\n     N'SOFTWARE\\Microsoft\\MSSQLServer\\MSSQLServer', N'AuditLevel', REG_DWORD, 2;".to_string(),
            rollback: Some(
                "EXEC master.dbo.xp_instance_regwrite N'HKEY_LOCAL_MACHINE',\n     N'SOFTWARE\\Microsoft\\MSSQLServer\\MSSQLServer', N'AuditLevel', REG_DWORD, 0;".to_string(),
            ),
            requires_restart: true,
            target_principal: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::{CompositeKey, EntityKind, RiskLevel, RowUuid, Status};
    use chrono::Utc;

    fn fact(kind: EntityKind, parts: &[&str], attrs: &[(&str, &str)]) -> Fact {
        Fact {
            run_id: 1,
            row_uuid: RowUuid::parse("00000001").unwrap(),
            entity_kind: kind,
            composite_key: CompositeKey::new(parts.iter().map(|s| s.to_string()).collect()),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
                .collect(),
            status: Status::Fail,
            rule_id: "X".into(),
            risk_level: RiskLevel::High,
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_disable_sa_is_guarded_and_reversible() {
        let f = fact(
            EntityKind::SaAccount,
            &["PROD1", "MSSQLSERVER", "sa"],
            &[("login_name", "sa")],
        );
        let fix = build("disable_sa", &f).unwrap();
        assert!(fix.statement.starts_with("IF EXISTS"));
        assert!(fix.statement.contains("ALTER LOGIN [sa] DISABLE"));
        assert_eq!(fix.rollback.as_deref(), Some("ALTER LOGIN [sa] ENABLE;"));
        assert_eq!(fix.target_principal.as_deref(), Some("sa"));
    }

    #[test]
    fn test_config_fix_uses_setting_from_key() {
        let f = fact(
            EntityKind::Config,
            &["PROD1", "MSSQLSERVER", "xp_cmdshell"],
            &[],
        );
        let fix = build("disable_config_option", &f).unwrap();
        assert!(fix.statement.contains("sp_configure 'xp_cmdshell', 0"));
        assert!(fix.statement.contains("IF EXISTS"));
        assert_eq!(fix.kind, ScriptKind::Tsql);
    }

    #[test]
    fn test_protocol_fix_is_os_level_with_restart() {
        let f = fact(
            EntityKind::Protocol,
            &["PROD1", "MSSQLSERVER", "Named Pipes"],
            &[],
        );
        let fix = build("disable_protocol", &f).unwrap();
        assert_eq!(fix.kind, ScriptKind::Os);
        assert!(fix.requires_restart);
        assert!(fix.statement.contains("SuperSocketNetLib\\Np"));
    }

    #[test]
    fn test_bracket_escaping() {
        let f = fact(
            EntityKind::Database,
            &["PROD1", "MSSQLSERVER", "odd]name"],
            &[("owner", "CONTOSO\\owner")],
        );
        let fix = build("disable_trustworthy", &f).unwrap();
        assert!(fix.statement.contains("[odd]]name]"));
    }

    #[test]
    fn test_unknown_fix_is_manual() {
        let f = fact(EntityKind::Login, &["PROD1", "MSSQLSERVER", "x"], &[]);
        assert!(build("no_such_fix", &f).is_none());
    }
}
