//! The remediation generator: exception-aware, aggressiveness-tiered
//! script synthesis. Scripts are grouped per target and script kind, every
//! fix is guarded and carries its rollback as a comment, and nothing that
//! would lock out the auditing login is ever emitted active.

use crate::platform::{target_platform, HostPlatform};
use crate::templates::{self, FixScript, ScriptKind};
use audit_core::rules::catalog;
use audit_core::{
    Annotation, Error, Fact, RemediationItem, Result, RiskLevel, RowUuid,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct GeneratedScripts {
    pub files: Vec<ScriptFile>,
    pub items: Vec<RemediationItem>,
    pub skipped_exceptions: u32,
}

pub struct RemediationGenerator {
    level: u8,
    /// lowercased login names used to run the audit; never targeted
    connecting_logins: HashSet<String>,
}

struct TargetScripts {
    tsql: String,
    os: String,
    needs_restart: bool,
}

impl RemediationGenerator {
    pub fn new(level: u8, connecting_logins: impl IntoIterator<Item = String>) -> Result<Self> {
        if !(1..=3).contains(&level) {
            return Err(Error::invalid_input(format!(
                "aggressiveness level must be 1-3, got {level}"
            )));
        }
        Ok(Self {
            level,
            connecting_logins: connecting_logins
                .into_iter()
                .map(|l| l.to_lowercase())
                .collect(),
        })
    }

    fn level_description(&self) -> &'static str {
        match self.level {
            1 => "level 1 (review-only: every fix commented)",
            2 => "level 2 (low-risk fixes active, the rest commented)",
            3 => "level 3 (all fixes active except safeguards)",
            _ => unreachable!(),
        }
    }

    fn activates(&self, risk: RiskLevel) -> bool {
        match self.level {
            1 => false,
            2 => risk == RiskLevel::Low,
            _ => true,
        }
    }

    /// Generate scripts for one completed run's facts.
    pub fn generate(
        &self,
        remediation_run_id: i64,
        facts: &[Fact],
        annotations: &HashMap<RowUuid, Annotation>,
        generated_at: DateTime<Utc>,
    ) -> GeneratedScripts {
        let mut out = GeneratedScripts::default();
        let mut per_target: BTreeMap<(String, String), TargetScripts> = BTreeMap::new();

        let mut sorted: Vec<&Fact> = facts.iter().collect();
        sorted.sort_by(|a, b| {
            (a.entity_kind, &a.composite_key).cmp(&(b.entity_kind, &b.composite_key))
        });

        for fact in sorted {
            if !fact.status.is_discrepant() {
                continue;
            }
            let parts = fact.composite_key.parts();
            let (Some(server), Some(instance)) = (parts.first(), parts.get(1)) else {
                continue;
            };
            let platform = target_platform(facts, server, instance);

            for rule in catalog().rules_for(fact.entity_kind) {
                if !rule.applies_to(&fact.attributes) {
                    continue;
                }
                if !rule.evaluate(&fact.attributes).is_discrepant() {
                    continue;
                }
                let Some(fix_id) = rule.fix_id else { continue };
                let Some(fix) = templates::build(fix_id, fact) else {
                    continue;
                };

                let target = per_target
                    .entry((server.clone(), instance.clone()))
                    .or_insert_with(|| TargetScripts {
                        tsql: String::new(),
                        os: String::new(),
                        needs_restart: false,
                    });

                let annotation = annotations.get(&fact.row_uuid);
                let excepted = annotation
                    .map(|a| a.is_exception_for(fact.status))
                    .unwrap_or(false);

                let comment = comment_prefix(fix.kind);
                let buffer = match fix.kind {
                    ScriptKind::Tsql => &mut target.tsql,
                    ScriptKind::Os => &mut target.os,
                };

                buffer.push_str(&format!(
                    "\n{comment} ----------------------------------------------------------------\n{comment} [{}] {}\n{comment} entity: {}\n",
                    rule.id,
                    rule.title,
                    fact.composite_key.canonical()
                ));

                if excepted {
                    out.skipped_exceptions += 1;
                    let justification = annotation
                        .and_then(|a| a.fields.justification.clone())
                        .unwrap_or_default();
                    buffer.push_str(&format!(
                        "{comment} [SKIPPED: exception] {}\n",
                        justification
                    ));
                    push_commented(buffer, comment, &fix.statement);
                    continue;
                }

                let safeguarded = fix
                    .target_principal
                    .as_deref()
                    .map(|p| self.connecting_logins.contains(&p.to_lowercase()))
                    .unwrap_or(false);

                let manual_fallback =
                    fix.kind == ScriptKind::Os && platform == HostPlatform::Linux;

                let activated = if safeguarded || manual_fallback {
                    false
                } else {
                    self.activates(rule.risk_level)
                };

                if safeguarded {
                    buffer.push_str(&format!(
                        "{comment} [SAFEGUARD: connecting identity] this statement would affect\n{comment} the login used to run the audit and is never activated\n"
                    ));
                }
                if manual_fallback {
                    buffer.push_str(&format!(
                        "{comment} [MANUAL ACTION REQUIRED] non-Windows host: apply the\n{comment} equivalent change with mssql-conf\n"
                    ));
                }

                if activated {
                    buffer.push_str(&fix.statement);
                    buffer.push('\n');
                } else {
                    push_commented(buffer, comment, &fix.statement);
                }

                if let Some(rollback) = &fix.rollback {
                    buffer.push_str(&format!("{comment} rollback:\n"));
                    push_commented(buffer, comment, rollback);
                }
                if fix.requires_restart {
                    target.needs_restart = true;
                    buffer.push_str(&format!(
                        "{comment} [RESTART REQUIRED] see the restart stanza at the end of this file\n"
                    ));
                }

                out.items.push(RemediationItem {
                    id: None,
                    remediation_run_id,
                    rule_id: rule.id.to_string(),
                    entity_kind: fact.entity_kind,
                    row_uuid: Some(fact.row_uuid.clone()),
                    composite_key: fact.composite_key.clone(),
                    pre_change_value: serde_json::Value::Object(
                        fact.attributes.clone().into_iter().collect(),
                    ),
                    statement: fix.statement.clone(),
                    rollback_statement: fix.rollback.clone(),
                    activated,
                });
            }
        }

        for ((server, instance), scripts) in per_target {
            let base = file_base(&server, &instance);
            if !scripts.tsql.is_empty() {
                let mut content = header(ScriptKind::Tsql, &server, &instance, self, generated_at);
                content.push_str(&scripts.tsql);
                if scripts.needs_restart {
                    content.push_str(&restart_stanza(ScriptKind::Tsql, &server, &instance));
                }
                out.files.push(ScriptFile {
                    name: format!("{base}.sql"),
                    content,
                });
            }
            if !scripts.os.is_empty() {
                let mut content = header(ScriptKind::Os, &server, &instance, self, generated_at);
                content.push_str(&scripts.os);
                if scripts.needs_restart {
                    content.push_str(&restart_stanza(ScriptKind::Os, &server, &instance));
                }
                out.files.push(ScriptFile {
                    name: format!("{base}.ps1"),
                    content,
                });
            }
        }

        info!(
            files = out.files.len(),
            items = out.items.len(),
            skipped = out.skipped_exceptions,
            "generated remediation scripts"
        );
        out
    }
}

fn comment_prefix(kind: ScriptKind) -> &'static str {
    match kind {
        ScriptKind::Tsql => "--",
        ScriptKind::Os => "#",
    }
}

fn push_commented(buffer: &mut String, comment: &str, statement: &str) {
    for line in statement.lines() {
        buffer.push_str(comment);
        buffer.push(' ');
        buffer.push_str(line);
        buffer.push('\n');
    }
}

fn file_base(server: &str, instance: &str) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect::<String>()
    };
    format!("{}_{}", sanitize(server), sanitize(instance))
}

fn header(
    kind: ScriptKind,
    server: &str,
    instance: &str,
    generator: &RemediationGenerator,
    generated_at: DateTime<Utc>,
) -> String {
    let comment = comment_prefix(kind);
    format!(
        "{comment} Security remediation script\n{comment} target: {server}\\{instance}\n{comment} aggressiveness: {}\n{comment} generated: {}\n{comment}\n{comment} Review every statement before executing. Commented fixes must be\n{comment} uncommented deliberately; rollback statements are provided inline.\n",
        generator.level_description(),
        generated_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

/// The restart sequence is never emitted as executable statements.
fn restart_stanza(kind: ScriptKind, server: &str, instance: &str) -> String {
    let comment = comment_prefix(kind);
    let service = if instance == "MSSQLSERVER" {
        "MSSQLSERVER".to_string()
    } else {
        format!("MSSQL${instance}")
    };
    format!(
        "\n{comment} [RESTART REQUIRED] one or more changes above need a service restart:\n{comment}   1. net stop \"{service}\" /y        (graceful stop, allow up to 60s)\n{comment}   2. wait for active sessions to drain\n{comment}   3. net start \"{service}\"          (retry up to 3 times)\n{comment}   4. sqlcmd -S {server}\\{instance} -Q \"SELECT @@VERSION\"   (verify)\n",
    )
}
