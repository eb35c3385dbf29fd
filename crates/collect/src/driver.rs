//! The target driver: connects to one SQL Server instance, detects its
//! version and executes rule queries, yielding rows as portable values.
//! The trait seam keeps everything above it testable without a live
//! server.

use async_trait::async_trait;
use audit_core::{AuthKind, Error, ErrorCode, Result, TargetSettings};
use serde_json::Value;
use std::collections::HashMap;
use tiberius::{AuthMethod, Client, ColumnData, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

/// One raw result row: column name -> portable value. Nulls are omitted so
/// downstream code can distinguish null from empty string.
pub type RawRow = HashMap<String, Value>;

/// Transient credential resolved by the CLI edge; never persisted.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait TargetDriver: Send + Sync {
    async fn connect(
        &self,
        target: &TargetSettings,
        credential: Option<&Credential>,
    ) -> Result<Box<dyn TargetSession>>;
}

#[async_trait]
pub trait TargetSession: Send {
    /// Detected major version (10 = 2008/2008 R2, 15 = 2019, 16 = 2022)
    async fn version_major(&mut self) -> Result<u32>;

    async fn run_query(&mut self, sql: &str) -> Result<Vec<RawRow>>;
}

/// TDS driver over tiberius. Named instances connect through their
/// explicitly configured port; browser resolution is out of scope.
pub struct TdsDriver;

#[async_trait]
impl TargetDriver for TdsDriver {
    async fn connect(
        &self,
        target: &TargetSettings,
        credential: Option<&Credential>,
    ) -> Result<Box<dyn TargetSession>> {
        let mut config = Config::new();
        config.host(&target.server);
        config.port(target.port);
        config.database("master");
        config.trust_cert();

        match target.auth {
            AuthKind::Sql => {
                let credential = credential.ok_or_else(|| {
                    Error::configuration(format!(
                        "target {}: sql auth requires a resolved credential",
                        target.display_name()
                    ))
                })?;
                config.authentication(AuthMethod::sql_server(
                    &credential.username,
                    &credential.password,
                ));
            }
            AuthKind::Windows => {
                #[cfg(feature = "winauth")]
                {
                    let credential = credential.ok_or_else(|| {
                        Error::configuration(format!(
                            "target {}: windows auth requires a resolved credential",
                            target.display_name()
                        ))
                    })?;
                    config.authentication(AuthMethod::windows(
                        &credential.username,
                        &credential.password,
                    ));
                }
                #[cfg(not(feature = "winauth"))]
                {
                    return Err(Error::configuration(format!(
                        "target {}: windows auth requires the winauth build feature",
                        target.display_name()
                    )));
                }
            }
        }

        let tcp = TcpStream::connect((target.server.as_str(), target.port))
            .await
            .map_err(|e| {
                Error::target_unreachable(format!(
                    "tcp connect to {}:{} failed: {e}",
                    target.server, target.port
                ))
                .for_target(target.display_name())
            })?;
        tcp.set_nodelay(true).map_err(Error::from)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| {
                Error::target_unreachable(format!("tds handshake failed: {e}"))
                    .for_target(target.display_name())
            })?;

        debug!(target = %target.display_name(), "connected");
        Ok(Box::new(TdsSession {
            client,
            target: target.display_name(),
        }))
    }
}

struct TdsSession {
    client: Client<Compat<TcpStream>>,
    target: String,
}

#[async_trait]
impl TargetSession for TdsSession {
    async fn version_major(&mut self) -> Result<u32> {
        let rows = self
            .run_query(
                "SELECT CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128)) AS product_version",
            )
            .await?;
        let version = rows
            .first()
            .and_then(|r| r.get("product_version"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::VersionDetectionFailed,
                    "SERVERPROPERTY('ProductVersion') returned nothing",
                )
            })?;
        parse_version_major(version)
    }

    async fn run_query(&mut self, sql: &str) -> Result<Vec<RawRow>> {
        let stream = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| Error::query_failed(e.to_string()).for_target(self.target.clone()))?;

        let result_sets = stream
            .into_results()
            .await
            .map_err(|e| Error::query_failed(e.to_string()).for_target(self.target.clone()))?;

        // multi-statement batches surface interim row sets; the final
        // SELECT carries the rows we want
        let rows = result_sets.into_iter().last().unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let columns: Vec<String> =
                row.columns().iter().map(|c| c.name().to_string()).collect();
            let mut raw = RawRow::with_capacity(columns.len());
            for (name, cell) in columns.into_iter().zip(row.into_iter()) {
                if let Some(value) = cell_to_value(cell) {
                    raw.insert(name, value);
                }
            }
            out.push(raw);
        }
        Ok(out)
    }
}

fn parse_version_major(product_version: &str) -> Result<u32> {
    product_version
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .ok_or_else(|| {
            Error::new(
                ErrorCode::VersionDetectionFailed,
                format!("unparseable product version {product_version:?}"),
            )
        })
}

/// Convert one TDS cell into a portable value; nulls become `None` and
/// exotic types are dropped with a log line rather than guessed at.
fn cell_to_value(cell: ColumnData<'static>) -> Option<Value> {
    match cell {
        ColumnData::U8(v) => v.map(|x| Value::from(x as i64)),
        ColumnData::I16(v) => v.map(|x| Value::from(x as i64)),
        ColumnData::I32(v) => v.map(|x| Value::from(x as i64)),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(|x| Value::from(x as f64)),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::String(v) => v.map(|s| Value::from(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Value::from(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| Value::from(n.to_string())),
        other => {
            warn!(?other, "dropping unsupported column value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_major() {
        assert_eq!(parse_version_major("10.50.4000.0").unwrap(), 10);
        assert_eq!(parse_version_major("15.0.2000.5").unwrap(), 15);
        assert_eq!(parse_version_major("16.0.1000.6").unwrap(), 16);
        assert!(parse_version_major("garbage").is_err());
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let c = Credential {
            username: "auditor".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{c:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("auditor"));
    }
}
