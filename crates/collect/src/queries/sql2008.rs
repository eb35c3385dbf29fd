//! SQL Server 2008 / 2008 R2 query variants. Service and protocol state
//! predate the server DMVs, so this family reads the instance registry via
//! `xp_instance_regread`; orphaned users are matched on SID alone.

use super::common;

const SERVICES: &str = r#"
DECLARE @engine NVARCHAR(256), @agent NVARCHAR(256);
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SYSTEM\CurrentControlSet\Services\MSSQLSERVER',
     N'ObjectName',
     @engine OUTPUT;
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SYSTEM\CurrentControlSet\Services\SQLSERVERAGENT',
     N'ObjectName',
     @agent OUTPUT;
SELECT N'SQL Server (Database Engine)' AS service_name,
       ISNULL(@engine, '') AS account,
       N'' AS startup_type,
       N'' AS status
UNION ALL
SELECT N'SQL Server Agent',
       ISNULL(@agent, ''),
       N'',
       N''
"#;

const PROTOCOLS: &str = r#"
DECLARE @tcp INT, @np INT, @sm INT;
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SOFTWARE\Microsoft\MSSQLServer\MSSQLServer\SuperSocketNetLib\Tcp',
     N'Enabled',
     @tcp OUTPUT;
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SOFTWARE\Microsoft\MSSQLServer\MSSQLServer\SuperSocketNetLib\Np',
     N'Enabled',
     @np OUTPUT;
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SOFTWARE\Microsoft\MSSQLServer\MSSQLServer\SuperSocketNetLib\Sm',
     N'Enabled',
     @sm OUTPUT;
SELECT 'TCP/IP' AS protocol, CAST(ISNULL(@tcp, 0) AS INT) AS enabled
UNION ALL SELECT 'Named Pipes', CAST(ISNULL(@np, 0) AS INT)
UNION ALL SELECT 'Shared Memory', CAST(ISNULL(@sm, 0) AS INT)
"#;

const ORPHANED_USERS: &str = r#"
DECLARE @orphans TABLE (
    [database] SYSNAME,
    user_name SYSNAME,
    user_sid VARBINARY(85)
);
INSERT INTO @orphans
EXEC sp_MSforeachdb N'USE [?];
SELECT DB_NAME(), dp.name, dp.sid
FROM sys.database_principals dp
LEFT JOIN sys.server_principals sp ON dp.sid = sp.sid
WHERE dp.type = ''S''
  AND dp.principal_id > 4
  AND sp.sid IS NULL
  AND dp.sid IS NOT NULL';
SELECT [database], user_name FROM @orphans
"#;

pub fn query(rule_id: &str) -> Option<&'static str> {
    match rule_id {
        "SA-001" | "SA-002" => Some(common::SA_ACCOUNT),
        "LOG-001" | "LOG-002" | "LOG-003" => Some(common::LOGINS),
        "ROLE-001" => Some(common::SERVER_ROLE_MEMBERS),
        "CFG-001" => Some(common::CFG_XP_CMDSHELL),
        "CFG-002" => Some(common::CFG_OLE_AUTOMATION),
        "CFG-003" => Some(common::CFG_DATABASE_MAIL),
        "CFG-004" => Some(common::CFG_REMOTE_ADMIN),
        "CFG-005" => Some(common::CFG_CLR),
        "SVC-001" => Some(SERVICES),
        "DB-001" | "DB-002" | "DB-003" => Some(common::DATABASES),
        "DBROLE-001" => Some(common::DB_ROLE_MEMBERS),
        "USR-001" => Some(common::DB_USERS),
        "ORPH-001" => Some(ORPHANED_USERS),
        "PERM-001" => Some(common::SERVER_PERMISSIONS),
        "PERM-002" => Some(common::PUBLIC_PERMISSIONS),
        "LNK-001" => Some(common::LINKED_SERVERS),
        "TRG-001" => Some(common::SERVER_TRIGGERS),
        "BK-001" => Some(common::BACKUP_AGE),
        "BK-002" => Some(common::BACKUP_VOLUME),
        "PROTO-001" => Some(PROTOCOLS),
        "ENC-001" => Some(common::ENCRYPTION_KEYS),
        "AUD-001" => Some(common::AUDIT_SETTINGS),
        "INST-001" => Some(common::INSTANCE_INFO),
        _ => None,
    }
}
