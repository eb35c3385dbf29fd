//! The sync orchestrator: a strict nine-phase pipeline. Each phase reads
//! only from phases before it, and classification always consumes the
//! post-persistence annotations, never the stale baseline ones. The audit
//! mode is the same pipeline minus the report phases (1-3).

use crate::annotations::merge_annotations;
use crate::diff::{DiffEngine, Transition};
use crate::report::reader::{self, ActionEdit, ReportContent};
use crate::report::writer::{self, ReportContext};
use crate::state::{classify, Classification, TransitionInput};
use audit_collect::{CollectWarning, CollectionOutcome, FactSource};
use audit_core::{
    Action, Annotation, ChangeType, CompositeKey, EntityKind, Error, ErrorCode, Fact,
    IdentityService, Result, RowUuid, RunStatus, Settings, StatsService, StatsSnapshot,
};
use audit_history::HistoryStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
pub struct SyncOutcome {
    pub run_id: i64,
    pub baseline_run: Option<i64>,
    pub actions_recorded: u64,
    pub stats: StatsSnapshot,
    pub warnings: usize,
    pub unreachable: usize,
    pub report_path: PathBuf,
}

pub struct SyncOrchestrator {
    store: Arc<HistoryStore>,
    source: Arc<dyn FactSource>,
    settings: Arc<Settings>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<HistoryStore>,
        source: Arc<dyn FactSource>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    /// AUDIT mode: collect, diff against the latest completed run, record,
    /// report. No operator edits are read.
    pub async fn audit(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let baseline = self.store.latest_completed_run().await?.map(|r| r.id);
        let prior_annotations = self.store.load_annotations().await?;
        self.run_pipeline(baseline, prior_annotations, Vec::new(), cancel)
            .await
    }

    /// SYNC mode: the full nine phases against an operator-edited report.
    pub async fn sync(&self, report_path: &Path, cancel: &CancellationToken) -> Result<SyncOutcome> {
        // phase 1: preflight
        reader::ensure_writable(report_path)?;
        let baseline_run = self.store.latest_completed_run().await?.ok_or_else(|| {
            Error::invalid_input("no completed audit run to sync against; run audit first")
        })?;
        if baseline_run.finalized {
            return Err(Error::new(
                ErrorCode::RunFinalized,
                format!("run {} is finalized; definalize before syncing", baseline_run.id),
            ));
        }

        // phase 2: read annotations from the edited report
        let content = reader::read_report(report_path)?;
        for warning in &content.warnings {
            warn!(warning = %warning, "report row recovered");
        }

        // the pre-sync annotation state, snapshotted before persistence so
        // the classifier can tell "had" from "has"
        let prior_annotations = self.store.load_annotations().await?;

        // phase 3: persist annotation deltas and action edits
        let repaired = self.persist_annotations(&content).await?;

        self.run_pipeline(
            Some(baseline_run.id),
            prior_annotations,
            repaired,
            cancel,
        )
        .await
    }

    async fn persist_annotations(&self, content: &ReportContent) -> Result<Vec<Action>> {
        let known = self.store.key_index(None).await?;
        let mut identity = IdentityService::new(
            self.settings.identity.resurface_policy,
            self.store.all_row_uuids().await?,
        );
        let merge = merge_annotations(&content.rows, &known, &mut identity)?;
        for warning in &merge.warnings {
            warn!(warning = %warning, "annotation id repaired");
        }

        let mut repair_actions = Vec::new();
        for delta in &merge.deltas {
            self.store
                .upsert_annotation(
                    &delta.row_uuid,
                    delta.entity_kind,
                    &delta.composite_key,
                    &delta.fields,
                    None,
                )
                .await?;
            if delta.repaired {
                // sync_run_id is attached when the run exists, in phase 7
                repair_actions.push(Action::new(
                    0,
                    delta.entity_kind,
                    Some(delta.row_uuid.clone()),
                    delta.composite_key.clone(),
                    ChangeType::Warning,
                    "row id repaired from composite key",
                ));
            }
        }

        self.apply_action_edits(&content.action_edits).await?;
        Ok(repair_actions)
    }

    /// Operator edits on the actions sheet round-trip onto the persisted
    /// rows; they never create new actions.
    async fn apply_action_edits(&self, edits: &[ActionEdit]) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }
        let existing: HashMap<i64, Action> = self
            .store
            .load_all_actions()
            .await?
            .into_iter()
            .filter_map(|a| a.id.map(|id| (id, a)))
            .collect();

        for edit in edits {
            let Some(stored) = existing.get(&edit.action_id) else {
                warn!(action_id = edit.action_id, "edit for unknown action ignored");
                continue;
            };
            if stored.user_date_override != edit.user_date_override
                || stored.user_notes != edit.user_notes
            {
                self.store
                    .update_action_user_fields(
                        edit.action_id,
                        edit.user_date_override,
                        edit.user_notes.clone(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Phases 4-9, shared by audit and sync.
    async fn run_pipeline(
        &self,
        baseline: Option<i64>,
        prior_annotations: HashMap<RowUuid, Annotation>,
        mut pending_warnings: Vec<Action>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let organization = &self.settings.audit.organization;
        let config_hash = self.settings.config_hash();

        // phase 4: collect under a new run id
        let run_id = self
            .store
            .begin_run(organization, &config_hash, baseline)
            .await?;
        let phase_timeout = Duration::from_secs(self.settings.audit.phase_timeout_secs);
        let collected = match timeout(phase_timeout, self.source.collect_facts(cancel)).await {
            Err(_) => Err(Error::timeout(format!(
                "collect phase exceeded {}s",
                phase_timeout.as_secs()
            ))),
            Ok(result) => result,
        };
        let collection = match collected {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store.complete_run(run_id, RunStatus::Failed).await?;
                return Err(e);
            }
        };

        let facts = match self.persist_facts(run_id, baseline, &collection).await {
            Ok(facts) => facts,
            Err(e) => {
                self.store.complete_run(run_id, RunStatus::Failed).await?;
                return Err(e);
            }
        };

        // phase 5: diff baseline and current
        let baseline_facts = match baseline {
            Some(id) => self.store.load_facts(id).await?,
            None => Vec::new(),
        };
        let current_annotations = self.store.load_annotations().await?;
        let transitions =
            DiffEngine::diff(baseline_facts, facts.clone(), &current_annotations);

        // phase 6: classify every transition with the CURRENT annotations
        let classified: Vec<(Transition, Classification)> = transitions
            .into_iter()
            .map(|t| {
                let c = self.classify_transition(&t, &prior_annotations, &collection);
                (t, c)
            })
            .collect();

        // phase 7: record actions, one transaction, dedup at the store
        let mut actions = Vec::new();
        for pending in &mut pending_warnings {
            pending.sync_run_id = run_id;
        }
        actions.append(&mut pending_warnings);
        actions.extend(collection.warnings.iter().map(|w| warning_action(run_id, w)));
        for (transition, classification) in &classified {
            if classification.is_loggable_action {
                actions.push(transition_action(run_id, transition, classification.change_type));
            }
            if let Some(extra) = classification.extra_action {
                actions.push(transition_action(run_id, transition, extra));
            }
        }
        let actions_recorded = self.store.record_actions(&actions).await?;

        // phase 8: forward effects on annotations
        self.apply_forward_effects(&classified).await?;

        // phase 9: project and write the report
        self.store.complete_run(run_id, RunStatus::Completed).await?;
        let final_annotations = self.store.load_annotations().await?;
        let run_actions = self.store.load_actions(run_id).await?;
        let stats = StatsService::project(&facts, &final_annotations, &run_actions);

        let report_path = self.settings.audit.report_path();
        let all_actions = self.store.load_all_actions().await?;
        writer::write_report(
            &report_path,
            &ReportContext {
                organization,
                run_id,
                generated_at: Utc::now(),
                facts: &facts,
                annotations: &final_annotations,
                actions: &all_actions,
                stats: &stats,
            },
        )?;
        self.snapshot_report(run_id, &report_path)?;

        info!(
            run_id,
            actions = actions_recorded,
            active = stats.active_issues,
            exceptions = stats.documented_exceptions,
            "run complete"
        );
        Ok(SyncOutcome {
            run_id,
            baseline_run: baseline,
            actions_recorded,
            stats,
            warnings: collection.warnings.len(),
            unreachable: collection.unreachable.len(),
            report_path,
        })
    }

    /// Phase 4.5: bridge composite keys to row ids and persist the facts.
    async fn persist_facts(
        &self,
        run_id: i64,
        baseline: Option<i64>,
        collection: &CollectionOutcome,
    ) -> Result<Vec<Fact>> {
        let index = self.store.key_index(baseline).await?;
        let mut identity = IdentityService::new(
            self.settings.identity.resurface_policy,
            self.store.all_row_uuids().await?,
        );

        let mut facts = Vec::with_capacity(collection.observations.len());
        for obs in collection.observations.iter().cloned() {
            let uuid = identity.resolve(obs.entity_kind, &obs.composite_key, &index)?;
            facts.push(Fact::from_observation(run_id, uuid, obs));
        }

        self.store.record_facts(run_id, &facts).await?;
        self.store.reconcile_annotation_states(run_id).await?;
        Ok(facts)
    }

    fn classify_transition(
        &self,
        transition: &Transition,
        prior_annotations: &HashMap<RowUuid, Annotation>,
        collection: &CollectionOutcome,
    ) -> Classification {
        let baseline_status = transition.baseline.as_ref().map(|f| f.status);
        let current_status = transition.current.as_ref().map(|f| f.status);

        let annotation = transition.annotation.as_ref();
        let has_exception = match current_status {
            Some(status) => annotation
                .map(|a| a.is_exception_for(status))
                .unwrap_or(false),
            None => false,
        };
        // a review date alone is not a note
        let has_note = annotation
            .map(|a| {
                a.fields.justification.is_some()
                    || a.fields.purpose.is_some()
                    || a.fields.review_status.is_some()
            })
            .unwrap_or(false);

        // prior state is keyed by the id the entity carried in the baseline
        let prior_uuid = transition
            .baseline
            .as_ref()
            .map(|f| &f.row_uuid)
            .unwrap_or(&transition.row_uuid);
        let prior = prior_annotations.get(prior_uuid);
        let had_exception = match baseline_status {
            Some(status) => prior.map(|a| a.is_exception_for(status)).unwrap_or(false),
            None => false,
        };
        let annotation_text_changed = match (prior, annotation) {
            (Some(p), Some(c)) => {
                p.fields.justification != c.fields.justification
                    || p.fields.review_status != c.fields.review_status
            }
            (None, Some(c)) => !c.fields.is_empty(),
            (Some(_), None) | (None, None) => false,
        };

        let parts = transition.composite_key.parts();
        let instance_was_scanned = match (parts.first(), parts.get(1)) {
            (Some(server), Some(instance)) => collection.was_scanned(server, instance),
            _ => true,
        };

        classify(TransitionInput {
            baseline_status,
            current_status,
            has_exception,
            had_exception,
            annotation_text_changed,
            has_note,
            instance_was_scanned,
        })
    }

    /// Phase 8: FIXED-with-exception clears review status (keeping the
    /// justification); REGRESSION-with-note promotes to an exception.
    async fn apply_forward_effects(
        &self,
        classified: &[(Transition, Classification)],
    ) -> Result<()> {
        for (transition, classification) in classified {
            if !classification.clear_review_status && !classification.promote_to_exception {
                continue;
            }
            let Some(annotation) = transition.annotation.as_ref() else {
                continue;
            };
            let mut fields = annotation.fields.clone();
            if classification.clear_review_status {
                fields.review_status = None;
            }
            if classification.promote_to_exception {
                fields.review_status = Some("Exception".to_string());
            }
            if fields != annotation.fields {
                self.store
                    .upsert_annotation(
                        &annotation.row_uuid,
                        annotation.entity_kind,
                        &annotation.composite_key,
                        &fields,
                        transition.current.as_ref().map(|f| f.run_id),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn snapshot_report(&self, run_id: i64, report_path: &Path) -> Result<()> {
        let snapshot_dir = self.settings.audit.output_dir.join("runs").join(run_id.to_string());
        std::fs::create_dir_all(&snapshot_dir)?;
        let file_name = report_path
            .file_name()
            .ok_or_else(|| Error::internal("report path has no file name"))?;
        std::fs::copy(report_path, snapshot_dir.join(file_name))?;
        Ok(())
    }

    /// Freeze the latest completed run. Refuses while active issues remain
    /// unless forced.
    pub async fn finalize(&self, run_id: Option<i64>, force: bool) -> Result<i64> {
        let run = match run_id {
            Some(id) => self.store.get_run(id).await?,
            None => self
                .store
                .latest_completed_run()
                .await?
                .ok_or_else(|| Error::invalid_input("no completed run to finalize"))?,
        };

        if !force {
            let facts = self.store.load_facts(run.id).await?;
            let annotations = self.store.load_annotations().await?;
            let stats = StatsService::project(&facts, &annotations, &[]);
            if stats.active_issues > 0 {
                return Err(Error::invalid_input(format!(
                    "run {} has {} active issues; resolve or document them, or pass --force",
                    run.id, stats.active_issues
                )));
            }
        }

        self.store.set_finalized(run.id, true).await?;
        Ok(run.id)
    }

    pub async fn definalize(&self, run_id: Option<i64>) -> Result<i64> {
        let run = match run_id {
            Some(id) => self.store.get_run(id).await?,
            None => self
                .store
                .latest_completed_run()
                .await?
                .ok_or_else(|| Error::invalid_input("no completed run to definalize"))?,
        };
        self.store.set_finalized(run.id, false).await?;
        Ok(run.id)
    }

    /// The status projection: latest run plus the stats service output.
    pub async fn status(&self) -> Result<Option<(audit_core::AuditRun, StatsSnapshot)>> {
        let Some(run) = self.store.latest_completed_run().await? else {
            return Ok(None);
        };
        let facts = self.store.load_facts(run.id).await?;
        let annotations = self.store.load_annotations().await?;
        let actions = self.store.load_actions(run.id).await?;
        let stats = StatsService::project(&facts, &annotations, &actions);
        Ok(Some((run, stats)))
    }
}

fn warning_action(run_id: i64, warning: &CollectWarning) -> Action {
    let description = match &warning.rule_id {
        Some(rule) => format!("[{}] {}", rule, warning.message),
        None => warning.message.clone(),
    };
    // the rule joins the dedup key so two failing rules on one target stay
    // two warnings
    let mut key_parts = vec![warning.server.clone(), warning.instance.clone()];
    if let Some(rule) = &warning.rule_id {
        key_parts.push(rule.clone());
    }
    Action::new(
        run_id,
        EntityKind::Instance,
        None,
        CompositeKey::new(key_parts),
        ChangeType::Warning,
        description,
    )
}

fn transition_action(run_id: i64, transition: &Transition, change_type: ChangeType) -> Action {
    let fact = transition.current.as_ref().or(transition.baseline.as_ref());
    let mut description = match change_type {
        ChangeType::NewIssue => "new finding",
        ChangeType::Fixed => "finding resolved",
        ChangeType::Regression => "compliant item regressed",
        ChangeType::ExceptionAdded => "exception documented",
        ChangeType::ExceptionRemoved => "exception withdrawn",
        ChangeType::ExceptionUpdated => "exception text updated",
        ChangeType::Gone => "entity no longer observed",
        _ => "state change",
    }
    .to_string();
    if let Some(fact) = fact {
        if let Some(status) = transition.current.as_ref().map(|f| f.status) {
            description = format!("{description} ({} now {})", fact.rule_id, status);
        } else {
            description = format!("{description} ({})", fact.rule_id);
        }
    }

    let mut action = Action::new(
        run_id,
        transition.entity_kind,
        Some(transition.row_uuid.clone()),
        transition.composite_key.clone(),
        change_type,
        description,
    );
    if let Some(fact) = fact {
        action = action.with_risk(fact.risk_level);
    }
    action
}
