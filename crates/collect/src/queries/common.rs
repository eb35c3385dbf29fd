//! Query texts valid on every supported version (2008 R2 through 2022).
//! Values that surface as `sql_variant` or other non-portable types are
//! cast at the query level.

pub(super) const SA_ACCOUNT: &str = r#"
SELECT sp.name AS login_name,
       CAST(sp.is_disabled AS INT) AS is_disabled
FROM sys.server_principals sp
WHERE sp.sid = 0x01
"#;

pub(super) const LOGINS: &str = r#"
SELECT sp.name AS login_name,
       CASE WHEN sp.type = 'S' THEN 'sql' ELSE 'windows' END AS login_type,
       CAST(sp.is_disabled AS INT) AS is_disabled,
       CAST(ISNULL(sl.is_policy_checked, 0) AS INT) AS password_policy_on,
       CAST(ISNULL(sl.is_expiration_checked, 0) AS INT) AS password_expiration_on,
       CAST(ISNULL(IS_SRVROLEMEMBER('sysadmin', sp.name), 0) AS INT) AS is_sysadmin,
       CONVERT(VARCHAR(23), sp.create_date, 126) AS created_at
FROM sys.server_principals sp
LEFT JOIN sys.sql_logins sl ON sl.principal_id = sp.principal_id
WHERE sp.type IN ('S', 'U', 'G')
  AND sp.name NOT LIKE '##%'
  AND sp.sid <> 0x01
"#;

pub(super) const SERVER_ROLE_MEMBERS: &str = r#"
SELECT r.name AS role_name,
       m.name AS member_name,
       CASE WHEN m.type = 'S' THEN 'sql' ELSE 'windows' END AS member_type
FROM sys.server_role_members srm
JOIN sys.server_principals r ON r.principal_id = srm.role_principal_id
JOIN sys.server_principals m ON m.principal_id = srm.member_principal_id
WHERE m.name NOT LIKE '##%'
"#;

pub(super) const CFG_XP_CMDSHELL: &str = r#"
SELECT name AS setting,
       CAST(CAST(value AS INT) AS INT) AS configured_value,
       CAST(CAST(value_in_use AS INT) AS INT) AS run_value
FROM sys.configurations
WHERE name = 'xp_cmdshell'
"#;

pub(super) const CFG_OLE_AUTOMATION: &str = r#"
SELECT name AS setting,
       CAST(CAST(value AS INT) AS INT) AS configured_value,
       CAST(CAST(value_in_use AS INT) AS INT) AS run_value
FROM sys.configurations
WHERE name = 'Ole Automation Procedures'
"#;

pub(super) const CFG_DATABASE_MAIL: &str = r#"
SELECT name AS setting,
       CAST(CAST(value AS INT) AS INT) AS configured_value,
       CAST(CAST(value_in_use AS INT) AS INT) AS run_value
FROM sys.configurations
WHERE name = 'Database Mail XPs'
"#;

pub(super) const CFG_REMOTE_ADMIN: &str = r#"
SELECT name AS setting,
       CAST(CAST(value AS INT) AS INT) AS configured_value,
       CAST(CAST(value_in_use AS INT) AS INT) AS run_value
FROM sys.configurations
WHERE name = 'remote admin connections'
"#;

pub(super) const CFG_CLR: &str = r#"
SELECT name AS setting,
       CAST(CAST(value AS INT) AS INT) AS configured_value,
       CAST(CAST(value_in_use AS INT) AS INT) AS run_value
FROM sys.configurations
WHERE name = 'clr enabled'
"#;

pub(super) const DATABASES: &str = r#"
SELECT d.name AS [database],
       ISNULL(SUSER_SNAME(d.owner_sid), '') AS owner,
       CAST(d.is_trustworthy_on AS INT) AS is_trustworthy_on,
       CAST(d.is_auto_close_on AS INT) AS is_auto_close_on,
       d.recovery_model_desc AS recovery_model,
       d.state_desc AS state
FROM sys.databases d
"#;

pub(super) const DB_USERS: &str = r#"
DECLARE @users TABLE (
    [database] SYSNAME,
    user_name SYSNAME,
    has_matching_login INT,
    user_type NVARCHAR(60)
);
INSERT INTO @users
EXEC sp_MSforeachdb N'USE [?];
SELECT DB_NAME(),
       dp.name,
       CASE WHEN sp.name IS NULL THEN 0 ELSE 1 END,
       dp.type_desc
FROM sys.database_principals dp
LEFT JOIN sys.server_principals sp ON dp.sid = sp.sid
WHERE dp.type IN (''S'', ''U'', ''G'')
  AND dp.principal_id > 4
  AND dp.name NOT LIKE ''##%''';
SELECT [database], user_name, has_matching_login, user_type FROM @users
"#;

pub(super) const DB_ROLE_MEMBERS: &str = r#"
DECLARE @members TABLE (
    [database] SYSNAME,
    role_name SYSNAME,
    member_name SYSNAME
);
INSERT INTO @members
EXEC sp_MSforeachdb N'USE [?];
SELECT DB_NAME(), r.name, m.name
FROM sys.database_role_members drm
JOIN sys.database_principals r ON r.principal_id = drm.role_principal_id
JOIN sys.database_principals m ON m.principal_id = drm.member_principal_id
WHERE r.name = N''db_owner'' AND m.name <> N''dbo''';
SELECT [database], role_name, member_name FROM @members
"#;

pub(super) const SERVER_PERMISSIONS: &str = r#"
SELECT 'server' AS scope,
       '' AS [database],
       pr.name AS grantee,
       pe.permission_name AS [permission],
       pe.state_desc AS [state],
       '' AS entity
FROM sys.server_permissions pe
JOIN sys.server_principals pr ON pr.principal_id = pe.grantee_principal_id
WHERE pe.permission_name IN ('CONTROL SERVER', 'ALTER ANY LOGIN', 'ALTER SERVER STATE',
                             'VIEW SERVER STATE', 'ALTER ANY DATABASE')
  AND pe.state_desc IN ('GRANT', 'GRANT_WITH_GRANT_OPTION')
  AND pr.name NOT LIKE '##%'
"#;

pub(super) const PUBLIC_PERMISSIONS: &str = r#"
SELECT 'server' AS scope,
       '' AS [database],
       pr.name AS grantee,
       pe.permission_name AS [permission],
       pe.state_desc AS [state],
       ISNULL(ep.name, '') AS entity
FROM sys.server_permissions pe
JOIN sys.server_principals pr ON pr.principal_id = pe.grantee_principal_id
LEFT JOIN sys.endpoints ep ON pe.class = 105 AND pe.major_id = ep.endpoint_id
WHERE pr.name = 'public'
  AND pe.state_desc IN ('GRANT', 'GRANT_WITH_GRANT_OPTION')
"#;

pub(super) const LINKED_SERVERS: &str = r#"
SELECT s.name AS linked_server,
       ISNULL(s.product, '') AS product,
       ISNULL(s.provider, '') AS provider,
       ISNULL(s.data_source, '') AS data_source,
       CAST(ISNULL(ll.uses_self_credential, 0) AS INT) AS uses_self_mapping,
       ISNULL(ll.remote_name, '') AS remote_login
FROM sys.servers s
LEFT JOIN sys.linked_logins ll
       ON ll.server_id = s.server_id AND ll.local_principal_id = 0
WHERE s.is_linked = 1
"#;

pub(super) const SERVER_TRIGGERS: &str = r#"
SELECT 'server' AS scope,
       t.name AS trigger_name,
       t.type_desc AS trigger_type,
       CAST(t.is_disabled AS INT) AS is_disabled
FROM sys.server_triggers t
"#;

pub(super) const BACKUP_AGE: &str = r#"
SELECT d.name AS [database],
       DATEDIFF(DAY, MAX(b.backup_finish_date), GETDATE()) AS days_since_full,
       d.recovery_model_desc AS recovery_model
FROM sys.databases d
LEFT JOIN msdb.dbo.backupset b
       ON b.database_name = d.name AND b.type = 'D'
WHERE d.name <> 'tempdb' AND d.state_desc = 'ONLINE'
GROUP BY d.name, d.recovery_model_desc
"#;

pub(super) const BACKUP_VOLUME: &str = r#"
SELECT d.name AS [database],
       CAST(CASE WHEN EXISTS (
           SELECT 1
           FROM msdb.dbo.backupset bs
           JOIN msdb.dbo.backupmediafamily mf ON mf.media_set_id = bs.media_set_id
           JOIN master.sys.master_files f ON f.database_id = d.database_id
           WHERE bs.database_name = d.name
             AND mf.device_type = 2
             AND LEFT(mf.physical_device_name, 1) = LEFT(f.physical_name, 1)
       ) THEN 1 ELSE 0 END AS INT) AS same_volume_as_data
FROM sys.databases d
WHERE d.name <> 'tempdb' AND d.state_desc = 'ONLINE'
"#;

pub(super) const ENCRYPTION_KEYS: &str = r#"
DECLARE @keys TABLE (
    [database] SYSNAME,
    key_name SYSNAME,
    key_type NVARCHAR(40),
    algorithm NVARCHAR(60)
);
INSERT INTO @keys
EXEC sp_MSforeachdb N'USE [?];
SELECT DB_NAME(), name, N''symmetric_key'', algorithm_desc FROM sys.symmetric_keys
UNION ALL
SELECT DB_NAME(), name, N''certificate'', N'''' FROM sys.certificates WHERE pvt_key_encryption_type IS NOT NULL
UNION ALL
SELECT DB_NAME(), name, N''asymmetric_key'', algorithm_desc FROM sys.asymmetric_keys';
SELECT [database], key_name, key_type, algorithm FROM @keys
"#;

pub(super) const AUDIT_SETTINGS: &str = r#"
DECLARE @mode INT;
EXEC master.dbo.xp_instance_regread
     N'HKEY_LOCAL_MACHINE',
     N'SOFTWARE\Microsoft\MSSQLServer\MSSQLServer',
     N'AuditLevel',
     @mode OUTPUT;
SELECT 'login_auditing' AS setting,
       CASE ISNULL(@mode, 0)
            WHEN 0 THEN 'none'
            WHEN 1 THEN 'success_only'
            WHEN 2 THEN 'failed_only'
            ELSE 'all'
       END AS value
UNION ALL
SELECT 'server_audit' AS setting,
       CASE WHEN EXISTS (SELECT 1 FROM sys.server_audits WHERE is_state_enabled = 1)
            THEN 'present' ELSE 'absent'
       END AS value
"#;

pub(super) const INSTANCE_INFO: &str = r#"
SELECT CAST(SERVERPROPERTY('MachineName') AS NVARCHAR(128)) AS machine_name,
       CAST(ISNULL(SERVERPROPERTY('InstanceName'), 'MSSQLSERVER') AS NVARCHAR(128)) AS instance_name,
       CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128)) AS product_version,
       CAST(SERVERPROPERTY('ProductLevel') AS NVARCHAR(128)) AS product_level,
       CAST(SERVERPROPERTY('Edition') AS NVARCHAR(128)) AS edition,
       CAST(ISNULL(SERVERPROPERTY('IsClustered'), 0) AS INT) AS is_clustered,
       CAST(ISNULL(SERVERPROPERTY('IsIntegratedSecurityOnly'), 0) AS INT) AS windows_auth_only,
       CAST(ISNULL(SERVERPROPERTY('Collation'), '') AS NVARCHAR(128)) AS collation,
       CASE WHEN CAST(@@VERSION AS NVARCHAR(512)) LIKE '%Linux%'
            THEN 'Linux' ELSE 'Windows'
       END AS host_platform
"#;
