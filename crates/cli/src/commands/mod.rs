pub mod audit;
pub mod finalize;
pub mod remediate;
pub mod status;
pub mod sync;

use audit_collect::{Collector, Credential, FactSource, TdsDriver};
use audit_core::{AuthKind, Error, Result, Settings};
use audit_history::HistoryStore;
use audit_sync::SyncOrchestrator;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppContext {
    pub settings: Arc<Settings>,
    pub store: Arc<HistoryStore>,
}

impl AppContext {
    pub async fn load(
        config: Option<&Path>,
        organization: Option<String>,
        output_dir: Option<std::path::PathBuf>,
    ) -> Result<AppContext> {
        let mut settings = Settings::load(config)?;
        if let Some(organization) = organization {
            settings.audit.organization = organization;
        }
        if let Some(output_dir) = output_dir {
            settings.audit.output_dir = output_dir;
        }
        settings.check()?;

        std::fs::create_dir_all(&settings.audit.output_dir)?;
        let store = Arc::new(HistoryStore::open(&settings.audit.history_path()).await?);
        Ok(AppContext {
            settings: Arc::new(settings),
            store,
        })
    }

    /// Build the orchestrator over the live TDS collector. Credentials are
    /// resolved here, at the CLI edge; the core only ever sees them in
    /// memory.
    pub fn orchestrator(&self, collect: bool) -> Result<SyncOrchestrator> {
        let credentials = if collect {
            resolve_credentials(&self.settings)?
        } else {
            HashMap::new()
        };
        let source: Arc<dyn FactSource> = Arc::new(Collector::new(
            Arc::new(TdsDriver),
            Arc::clone(&self.settings),
            credentials,
        ));
        Ok(SyncOrchestrator::new(
            Arc::clone(&self.store),
            source,
            Arc::clone(&self.settings),
        ))
    }
}

/// `AUTODBAUDIT_PASSWORD_<REF>` wins; otherwise prompt interactively.
fn resolve_credentials(settings: &Settings) -> Result<HashMap<String, Credential>> {
    let mut credentials = HashMap::new();
    for target in &settings.targets {
        if target.auth != AuthKind::Sql {
            continue;
        }
        let Some(reference) = &target.credential_ref else {
            continue;
        };
        if credentials.contains_key(reference) {
            continue;
        }
        let username = target.username.clone().ok_or_else(|| {
            Error::configuration(format!(
                "target {}: sql auth requires a username",
                target.display_name()
            ))
        })?;

        let env_key = format!(
            "AUTODBAUDIT_PASSWORD_{}",
            reference.to_uppercase().replace('-', "_")
        );
        let password = match std::env::var(&env_key) {
            Ok(password) => password,
            Err(_) => dialoguer::Password::new()
                .with_prompt(format!("Password for {username}@{reference}"))
                .interact()
                .map_err(|e| Error::configuration(format!("credential prompt failed: {e}")))?,
        };

        credentials.insert(reference.clone(), Credential { username, password });
    }
    Ok(credentials)
}

/// Cancellation on ctrl-c; collection stops at its next suspension point.
pub fn cancellation_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
