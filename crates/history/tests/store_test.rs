use audit_core::model::annotation::AnnotationFields;
use audit_core::{
    Action, AnnotationState, ChangeType, CompositeKey, EntityKind, ErrorCode, Fact, RiskLevel,
    RowUuid, RunStatus, Status,
};
use audit_history::HistoryStore;
use chrono::Utc;
use std::path::PathBuf;

fn temp_db(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("history.db")
}

fn login_key(name: &str) -> CompositeKey {
    CompositeKey::new(vec!["PROD1".into(), "MSSQLSERVER".into(), name.into()])
}

fn login_fact(run_id: i64, uuid: &str, name: &str, status: Status) -> Fact {
    Fact {
        run_id,
        row_uuid: RowUuid::parse(uuid).unwrap(),
        entity_kind: EntityKind::Login,
        composite_key: login_key(name),
        attributes: [("login_type".to_string(), serde_json::json!("sql"))]
            .into_iter()
            .collect(),
        status,
        rule_id: "LOG-001".into(),
        risk_level: RiskLevel::High,
        collected_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_run_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();

    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();
    let run = store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.organization, "Contoso");
    assert!(run.ended_at.is_none());

    store.complete_run(run_id, RunStatus::Completed).await.unwrap();
    let run = store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.ended_at.is_some());

    let latest = store.latest_completed_run().await.unwrap().unwrap();
    assert_eq!(latest.id, run_id);
}

#[tokio::test]
async fn test_stale_running_run_marked_failed_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db(&dir);

    {
        let store = HistoryStore::open(&path).await.unwrap();
        store.begin_run("Contoso", "abc123", None).await.unwrap();
        // simulated crash: the run never completes
    }

    let store = HistoryStore::open(&path).await.unwrap();
    let run = store.get_run(1).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.ended_at.is_some());
}

#[tokio::test]
async fn test_record_facts_rejects_duplicate_entity_within_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();

    let a = login_fact(run_id, "00000001", "rogue_admin", Status::Fail);
    let b = login_fact(run_id, "00000002", "rogue_admin", Status::Fail);

    store.record_facts(run_id, &[a]).await.unwrap();
    let err = store.record_facts(run_id, &[b]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::HistoryConstraintViolation);

    // the failed batch rolled back entirely
    assert_eq!(store.load_facts(run_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_row_uuid_cannot_name_two_entities() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();

    let a = login_fact(run_id, "00000001", "rogue_admin", Status::Fail);
    let b = login_fact(run_id, "00000001", "other_login", Status::Pass);

    let err = store.record_facts(run_id, &[a, b]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UuidCollision);
}

#[tokio::test]
async fn test_same_entity_keeps_uuid_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();

    let run1 = store.begin_run("Contoso", "abc123", None).await.unwrap();
    store
        .record_facts(run1, &[login_fact(run1, "00000001", "rogue_admin", Status::Fail)])
        .await
        .unwrap();
    store.complete_run(run1, RunStatus::Completed).await.unwrap();

    let run2 = store.begin_run("Contoso", "abc123", Some(run1)).await.unwrap();
    store
        .record_facts(run2, &[login_fact(run2, "00000001", "rogue_admin", Status::Pass)])
        .await
        .unwrap();

    let uuids = store.all_row_uuids().await.unwrap();
    assert_eq!(uuids.len(), 1);

    let index = store.key_index(Some(run1)).await.unwrap();
    let uuid = index
        .baseline_uuid(EntityKind::Login, &login_key("rogue_admin"))
        .unwrap();
    assert_eq!(uuid.as_str(), "00000001");
}

#[tokio::test]
async fn test_annotation_upsert_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let uuid = RowUuid::parse("0badf00d").unwrap();
    let key = login_key("rogue_admin");

    let fields = AnnotationFields {
        justification: Some("approved by CISO 2025-12-01".into()),
        review_status: Some("Exception".into()),
        ..Default::default()
    };

    let changed = store
        .upsert_annotation(&uuid, EntityKind::Login, &key, &fields, None)
        .await
        .unwrap();
    assert!(changed);

    // identical fields are a no-op and write no history
    let changed = store
        .upsert_annotation(&uuid, EntityKind::Login, &key, &fields, None)
        .await
        .unwrap();
    assert!(!changed);

    let cleared = AnnotationFields::default();
    let changed = store
        .upsert_annotation(&uuid, EntityKind::Login, &key, &cleared, None)
        .await
        .unwrap();
    assert!(changed);

    let annotations = store.load_annotations().await.unwrap();
    let stored = annotations.get(&uuid).unwrap();
    assert!(stored.fields.justification.is_none());
    assert!(stored.fields.review_status.is_none());
}

#[tokio::test]
async fn test_annotations_outlive_facts_as_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();

    let run1 = store.begin_run("Contoso", "abc123", None).await.unwrap();
    store
        .record_facts(run1, &[login_fact(run1, "00000001", "rogue_admin", Status::Fail)])
        .await
        .unwrap();

    let uuid = RowUuid::parse("00000001").unwrap();
    let fields = AnnotationFields {
        purpose: Some("legacy app account".into()),
        ..Default::default()
    };
    store
        .upsert_annotation(&uuid, EntityKind::Login, &login_key("rogue_admin"), &fields, None)
        .await
        .unwrap();

    // next run no longer sees the login
    let run2 = store.begin_run("Contoso", "abc123", Some(run1)).await.unwrap();
    store.reconcile_annotation_states(run2).await.unwrap();

    let annotations = store.load_annotations().await.unwrap();
    let stored = annotations.get(&uuid).unwrap();
    assert_eq!(stored.state, AnnotationState::Orphaned);
    assert_eq!(stored.fields.purpose.as_deref(), Some("legacy app account"));
}

#[tokio::test]
async fn test_action_dedup_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();
    store
        .record_facts(run_id, &[login_fact(run_id, "00000001", "rogue_admin", Status::Fail)])
        .await
        .unwrap();

    let action = Action::new(
        run_id,
        EntityKind::Login,
        Some(RowUuid::parse("00000001").unwrap()),
        login_key("rogue_admin"),
        ChangeType::NewIssue,
        "new failing login",
    );

    assert!(store.record_action(&action).await.unwrap());
    assert!(!store.record_action(&action).await.unwrap());

    let actions = store.load_actions(run_id).await.unwrap();
    assert_eq!(actions.len(), 1);

    // a different change type for the same row is a separate action
    let fixed = Action::new(
        run_id,
        EntityKind::Login,
        Some(RowUuid::parse("00000001").unwrap()),
        login_key("rogue_admin"),
        ChangeType::ExceptionAdded,
        "exception documented",
    );
    assert!(store.record_action(&fixed).await.unwrap());
    assert_eq!(store.load_actions(run_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_warning_actions_without_uuid_dedup_on_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();

    let warning = Action::new(
        run_id,
        EntityKind::Instance,
        None,
        CompositeKey::new(vec!["PROD2".into(), "MSSQLSERVER".into()]),
        ChangeType::Warning,
        "target unreachable",
    );

    assert!(store.record_action(&warning).await.unwrap());
    assert!(!store.record_action(&warning).await.unwrap());

    let other = Action::new(
        run_id,
        EntityKind::Instance,
        None,
        CompositeKey::new(vec!["PROD3".into(), "MSSQLSERVER".into()]),
        ChangeType::Warning,
        "target unreachable",
    );
    assert!(store.record_action(&other).await.unwrap());
}

#[tokio::test]
async fn test_action_user_fields_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();
    store
        .record_facts(run_id, &[login_fact(run_id, "00000001", "rogue_admin", Status::Fail)])
        .await
        .unwrap();

    let action = Action::new(
        run_id,
        EntityKind::Login,
        Some(RowUuid::parse("00000001").unwrap()),
        login_key("rogue_admin"),
        ChangeType::NewIssue,
        "new failing login",
    );
    store.record_action(&action).await.unwrap();

    let stored = &store.load_actions(run_id).await.unwrap()[0];
    let id = stored.id.unwrap();
    let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
    store
        .update_action_user_fields(id, Some(date), Some("handled by DBA team".into()))
        .await
        .unwrap();

    let reloaded = &store.load_actions(run_id).await.unwrap()[0];
    assert_eq!(reloaded.user_date_override, Some(date));
    assert_eq!(reloaded.user_notes.as_deref(), Some("handled by DBA team"));
    // no new rows were created
    assert_eq!(store.load_actions(run_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_finalize_requires_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(&temp_db(&dir)).await.unwrap();
    let run_id = store.begin_run("Contoso", "abc123", None).await.unwrap();

    assert!(store.set_finalized(run_id, true).await.is_err());

    store.complete_run(run_id, RunStatus::Completed).await.unwrap();
    store.set_finalized(run_id, true).await.unwrap();
    assert!(store.get_run(run_id).await.unwrap().finalized);

    store.set_finalized(run_id, false).await.unwrap();
    assert!(!store.get_run(run_id).await.unwrap().finalized);
}
