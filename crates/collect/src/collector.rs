//! Bounded-parallel collection across the fleet. Each target gets its own
//! connection, its own rule queries and its own fact buffer; a semaphore
//! bounds concurrency and a cancellation token stops the sweep at the next
//! suspension point. Collection errors are isolated per target and per
//! rule: a single failing rule never aborts a fleet-wide audit.

use crate::driver::{Credential, RawRow, TargetDriver};
use crate::normalize::FactNormalizer;
use crate::provider::provider_for;
use audit_core::rules::catalog;
use audit_core::text::canonical_value;
use audit_core::{EntityKind, Error, ErrorCode, Observation, Result, Rule, Settings, TargetSettings};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A recovered collection error, surfaced as a Warning action.
#[derive(Debug, Clone)]
pub struct CollectWarning {
    pub target: String,
    pub server: String,
    pub instance: String,
    pub rule_id: Option<String>,
    pub message: String,
}

/// Everything one collection sweep produced.
#[derive(Debug, Default, Clone)]
pub struct CollectionOutcome {
    pub observations: Vec<Observation>,
    pub warnings: Vec<CollectWarning>,
    /// (server, instance) pairs that were reached this run
    pub scanned: HashSet<(String, String)>,
    /// (server, instance) pairs that were configured but unreachable
    pub unreachable: HashSet<(String, String)>,
}

impl CollectionOutcome {
    /// Whether the instance owning a composite key was reached this run.
    /// Every key starts with (server, instance).
    pub fn was_scanned(&self, server: &str, instance: &str) -> bool {
        self.scanned
            .contains(&(server.to_string(), instance.to_string()))
    }
}

/// Abstraction the sync orchestrator consumes; tests substitute canned
/// outcomes for the live collector.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn collect_facts(&self, cancel: &CancellationToken) -> Result<CollectionOutcome>;
}

struct CollectorInner {
    driver: Arc<dyn TargetDriver>,
    settings: Arc<Settings>,
    credentials: HashMap<String, Credential>,
    normalizer: FactNormalizer,
}

/// The live collector over a target driver.
pub struct Collector {
    inner: Arc<CollectorInner>,
}

impl Collector {
    pub fn new(
        driver: Arc<dyn TargetDriver>,
        settings: Arc<Settings>,
        credentials: HashMap<String, Credential>,
    ) -> Self {
        let normalizer = FactNormalizer::new(&settings.audit);
        Self {
            inner: Arc::new(CollectorInner {
                driver,
                settings,
                credentials,
                normalizer,
            }),
        }
    }
}

#[async_trait]
impl FactSource for Collector {
    async fn collect_facts(&self, cancel: &CancellationToken) -> Result<CollectionOutcome> {
        let workers = self.inner.settings.audit.workers;
        let semaphore = Arc::new(Semaphore::new(workers));
        info!(
            targets = self.inner.settings.targets.len(),
            workers, "starting collection sweep"
        );

        let mut handles = Vec::with_capacity(self.inner.settings.targets.len());
        for target in self.inner.settings.targets.clone() {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::internal(e.to_string()))?;
                collect_target(&inner, &target, &cancel).await
            }));
        }

        let mut outcome = CollectionOutcome::default();
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| Error::internal(format!("collection task panicked: {e}")))?;
            let target_result = result?;
            outcome.observations.extend(target_result.observations);
            outcome.warnings.extend(target_result.warnings);
            if target_result.scanned {
                outcome.scanned.insert(target_result.identity);
            } else {
                outcome.unreachable.insert(target_result.identity);
            }
        }

        info!(
            facts = outcome.observations.len(),
            warnings = outcome.warnings.len(),
            unreachable = outcome.unreachable.len(),
            "collection sweep finished"
        );
        Ok(outcome)
    }
}

struct TargetResult {
    identity: (String, String),
    scanned: bool,
    observations: Vec<Observation>,
    warnings: Vec<CollectWarning>,
}

fn unreachable_result(
    target: &TargetSettings,
    identity: (String, String),
    message: String,
) -> TargetResult {
    TargetResult {
        warnings: vec![CollectWarning {
            target: target.display_name(),
            server: identity.0.clone(),
            instance: identity.1.clone(),
            rule_id: None,
            message,
        }],
        identity,
        scanned: false,
        observations: Vec::new(),
    }
}

async fn collect_target(
    inner: &CollectorInner,
    target: &TargetSettings,
    cancel: &CancellationToken,
) -> Result<TargetResult> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled("collection cancelled before target"));
    }

    let identity = (
        canonical_value(&target.server),
        canonical_value(target.instance_name()),
    );
    let target_display = target.display_name();

    let credential = target
        .credential_ref
        .as_deref()
        .and_then(|r| inner.credentials.get(r));

    let connect_secs = target
        .connect_timeout_secs
        .unwrap_or(inner.settings.audit.connect_timeout_secs);
    let connect = timeout(
        Duration::from_secs(connect_secs),
        inner.driver.connect(target, credential),
    )
    .await;

    let mut session = match connect {
        Err(_) => {
            warn!(target = %target_display, "connect timed out after {connect_secs}s");
            return Ok(unreachable_result(
                target,
                identity,
                format!("target unreachable: connect timed out after {connect_secs}s"),
            ));
        }
        Ok(Err(e)) => {
            warn!(target = %target_display, error = %e, "connect failed");
            return Ok(unreachable_result(
                target,
                identity,
                format!("target unreachable: {}", e.message),
            ));
        }
        Ok(Ok(session)) => session,
    };

    let query_secs = inner.settings.audit.query_timeout_secs;
    let version = match timeout(Duration::from_secs(query_secs), session.version_major()).await {
        Err(_) => {
            return Ok(unreachable_result(
                target,
                identity,
                "version detection timed out".to_string(),
            ))
        }
        Ok(Err(e)) => {
            return Ok(unreachable_result(
                target,
                identity,
                format!("version detection failed: {}", e.message),
            ))
        }
        Ok(Ok(v)) => v,
    };

    let provider = match provider_for(version) {
        Ok(p) => p,
        Err(e) => {
            return Ok(unreachable_result(
                target,
                identity,
                format!("no query family: {}", e.message),
            ))
        }
    };
    debug!(target = %target_display, version, family = provider.family(), "collecting");

    let mut observations = Vec::new();
    let mut warnings = Vec::new();
    // identical query texts shared by several rules run once per target
    let mut row_cache: HashMap<&'static str, Vec<RawRow>> = HashMap::new();

    for kind in EntityKind::ALL {
        let mut rule_rows: Vec<(&Rule, Vec<RawRow>)> = Vec::new();

        for rule in catalog().rules_for(kind) {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("collection cancelled mid-target"));
            }
            let Some(sql) = provider.query(rule.id) else {
                continue;
            };

            if let Some(rows) = row_cache.get(sql) {
                rule_rows.push((rule, rows.clone()));
                continue;
            }

            match timeout(Duration::from_secs(query_secs), session.run_query(sql)).await {
                Err(_) => {
                    warn!(target = %target_display, rule = rule.id, "query timed out after {query_secs}s");
                    warnings.push(CollectWarning {
                        target: target_display.clone(),
                        server: identity.0.clone(),
                        instance: identity.1.clone(),
                        rule_id: Some(rule.id.to_string()),
                        message: format!("query timed out after {query_secs}s"),
                    });
                }
                Ok(Err(e)) => {
                    warn!(target = %target_display, rule = rule.id, error = %e, "query failed");
                    warnings.push(CollectWarning {
                        target: target_display.clone(),
                        server: identity.0.clone(),
                        instance: identity.1.clone(),
                        rule_id: Some(rule.id.to_string()),
                        message: format!("query failed: {}", e.message),
                    });
                }
                Ok(Ok(rows)) => {
                    row_cache.insert(sql, rows.clone());
                    rule_rows.push((rule, rows));
                }
            }
        }

        if rule_rows.is_empty() {
            continue;
        }
        let (mut kind_observations, skipped) =
            inner.normalizer.normalize_kind(target, kind, &rule_rows);
        if skipped > 0 {
            warnings.push(CollectWarning {
                target: target_display.clone(),
                server: identity.0.clone(),
                instance: identity.1.clone(),
                rule_id: None,
                message: format!("{skipped} {kind} rows skipped: missing key columns"),
            });
        }
        observations.append(&mut kind_observations);
    }

    Ok(TargetResult {
        identity,
        scanned: true,
        observations,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TargetSession;
    use crate::queries;
    use audit_core::AuthKind;
    use serde_json::json;

    struct MockDriver {
        reachable: HashMap<String, HashMap<String, Vec<RawRow>>>,
    }

    struct MockSession {
        rows_by_sql: HashMap<String, Vec<RawRow>>,
    }

    #[async_trait]
    impl TargetDriver for MockDriver {
        async fn connect(
            &self,
            target: &TargetSettings,
            _credential: Option<&Credential>,
        ) -> Result<Box<dyn TargetSession>> {
            match self.reachable.get(&target.server) {
                Some(rows) => Ok(Box::new(MockSession {
                    rows_by_sql: rows.clone(),
                })),
                None => Err(Error::target_unreachable("connection refused")),
            }
        }
    }

    #[async_trait]
    impl TargetSession for MockSession {
        async fn version_major(&mut self) -> Result<u32> {
            Ok(15)
        }

        async fn run_query(&mut self, sql: &str) -> Result<Vec<RawRow>> {
            Ok(self.rows_by_sql.get(sql).cloned().unwrap_or_default())
        }
    }

    fn settings(servers: &[&str]) -> Arc<Settings> {
        let targets = servers
            .iter()
            .map(|s| TargetSettings {
                server: s.to_string(),
                instance: None,
                port: 1433,
                auth: AuthKind::Sql,
                username: Some("auditor".into()),
                credential_ref: None,
                connect_timeout_secs: None,
                tags: vec![],
            })
            .collect();
        Arc::new(Settings {
            audit: audit_core::AuditSettings {
                organization: "Contoso".into(),
                output_dir: "./out".into(),
                history_path: None,
                workers: 2,
                connect_timeout_secs: 1,
                query_timeout_secs: 5,
                phase_timeout_secs: 60,
                approved_sysadmins: vec![],
                approved_db_owners: vec!["sa".into()],
            },
            identity: Default::default(),
            remediation: Default::default(),
            targets,
        })
    }

    fn sa_rows() -> HashMap<String, Vec<RawRow>> {
        let sa_sql = queries::sql2019::query("SA-001").unwrap().to_string();
        let mut rows = HashMap::new();
        rows.insert(
            sa_sql,
            vec![[
                ("login_name".to_string(), json!("sa")),
                ("is_disabled".to_string(), json!(0)),
            ]
            .into_iter()
            .collect()],
        );
        rows
    }

    #[tokio::test]
    async fn test_unreachable_target_is_isolated() {
        let mut reachable = HashMap::new();
        reachable.insert("PROD1".to_string(), sa_rows());
        let driver = Arc::new(MockDriver { reachable });
        let collector = Collector::new(driver, settings(&["PROD1", "PROD2"]), HashMap::new());

        let outcome = collector
            .collect_facts(&CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.was_scanned("PROD1", "MSSQLSERVER"));
        assert!(!outcome.was_scanned("PROD2", "MSSQLSERVER"));
        assert!(outcome
            .unreachable
            .contains(&("PROD2".to_string(), "MSSQLSERVER".to_string())));
        // exactly one unreachable warning, attributed to PROD2
        let unreachable: Vec<_> = outcome
            .warnings
            .iter()
            .filter(|w| w.message.contains("unreachable"))
            .collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].server, "PROD2");

        // PROD1's sa fact arrived and classified FAIL
        let sa = outcome
            .observations
            .iter()
            .find(|o| o.entity_kind == EntityKind::SaAccount)
            .unwrap();
        assert_eq!(sa.status, audit_core::Status::Fail);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_sweep() {
        let mut reachable = HashMap::new();
        reachable.insert("PROD1".to_string(), sa_rows());
        let driver = Arc::new(MockDriver { reachable });
        let collector = Collector::new(driver, settings(&["PROD1"]), HashMap::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collector.collect_facts(&cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }
}
