//! Query variants for SQL Server 2012 and later. Services and protocols
//! come from the server DMVs; orphaned users exclude contained users via
//! `authentication_type_desc`.

use super::common;

const SERVICES: &str = r#"
SELECT s.servicename AS service_name,
       ISNULL(s.service_account, '') AS account,
       ISNULL(s.startup_type_desc, '') AS startup_type,
       ISNULL(s.status_desc, '') AS status
FROM sys.dm_server_services s
"#;

const PROTOCOLS: &str = r#"
SELECT CASE
           WHEN r.registry_key LIKE '%\Tcp' THEN 'TCP/IP'
           WHEN r.registry_key LIKE '%\Np' THEN 'Named Pipes'
           WHEN r.registry_key LIKE '%\Sm' THEN 'Shared Memory'
           WHEN r.registry_key LIKE '%\Via' THEN 'VIA'
           ELSE r.registry_key
       END AS protocol,
       CAST(r.value_data AS INT) AS enabled
FROM sys.dm_server_registry r
WHERE r.value_name = 'Enabled'
  AND r.registry_key LIKE '%SuperSocketNetLib%'
"#;

const ORPHANED_USERS: &str = r#"
DECLARE @orphans TABLE (
    [database] SYSNAME,
    user_name SYSNAME
);
INSERT INTO @orphans
EXEC sp_MSforeachdb N'USE [?];
SELECT DB_NAME(), dp.name
FROM sys.database_principals dp
LEFT JOIN sys.server_principals sp ON dp.sid = sp.sid
WHERE dp.type = ''S''
  AND dp.principal_id > 4
  AND sp.sid IS NULL
  AND dp.sid IS NOT NULL
  AND dp.authentication_type_desc = ''INSTANCE''';
SELECT [database], user_name FROM @orphans
"#;

pub fn query(rule_id: &str) -> Option<&'static str> {
    match rule_id {
        "SVC-001" => Some(SERVICES),
        "PROTO-001" => Some(PROTOCOLS),
        "ORPH-001" => Some(ORPHANED_USERS),
        "SA-001" | "SA-002" => Some(common::SA_ACCOUNT),
        "LOG-001" | "LOG-002" | "LOG-003" => Some(common::LOGINS),
        "ROLE-001" => Some(common::SERVER_ROLE_MEMBERS),
        "CFG-001" => Some(common::CFG_XP_CMDSHELL),
        "CFG-002" => Some(common::CFG_OLE_AUTOMATION),
        "CFG-003" => Some(common::CFG_DATABASE_MAIL),
        "CFG-004" => Some(common::CFG_REMOTE_ADMIN),
        "CFG-005" => Some(common::CFG_CLR),
        "DB-001" | "DB-002" | "DB-003" => Some(common::DATABASES),
        "DBROLE-001" => Some(common::DB_ROLE_MEMBERS),
        "USR-001" => Some(common::DB_USERS),
        "PERM-001" => Some(common::SERVER_PERMISSIONS),
        "PERM-002" => Some(common::PUBLIC_PERMISSIONS),
        "LNK-001" => Some(common::LINKED_SERVERS),
        "TRG-001" => Some(common::SERVER_TRIGGERS),
        "BK-001" => Some(common::BACKUP_AGE),
        "BK-002" => Some(common::BACKUP_VOLUME),
        "ENC-001" => Some(common::ENCRYPTION_KEYS),
        "AUD-001" => Some(common::AUDIT_SETTINGS),
        "INST-001" => Some(common::INSTANCE_INFO),
        _ => None,
    }
}
