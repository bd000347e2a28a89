use build_readiness_lib::ai::client::OpenAiClient;
use build_readiness_lib::ai::rate_limit::{ManualClock, RateLimiter, RATE_LIMIT_WINDOW};
use build_readiness_lib::analysis::enrichment::identify_hot_items;
use build_readiness_lib::commands::draft::{draft_approval, draft_with_generator};
use build_readiness_lib::commands::ingest::ingest_release;
use build_readiness_lib::commands::release::get_release;
use build_readiness_lib::commands::settings::{
    get_settings, load_effective_settings_with_key, save_settings, EffectiveSettings,
};
use build_readiness_lib::error::ReadinessError;
use build_readiness_lib::models::draft::DraftOptions;
use build_readiness_lib::models::work_item::ReleaseCounts;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn workspace(api_key: Option<&str>) -> (TempDir, EffectiveSettings) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let settings = load_effective_settings_with_key(temp_dir.path(), api_key.map(str::to_string))
        .expect("load settings");
    (temp_dir, settings)
}

fn record(release_id: &str, id: i64, wi_type: &str) -> Value {
    json!({
        "release_id": release_id,
        "id": id,
        "type": wi_type,
        "title": format!("Item {id}"),
        "state": "Active"
    })
}

#[tokio::test]
async fn ingest_then_read_reports_counts_and_hot_items() {
    let (_tmp, settings) = workspace(None);

    let receipt = ingest_release(
        &settings.database_path,
        json!([{
            "release_id": "R1",
            "id": 1,
            "type": "Bug",
            "title": "SearchElse slow",
            "state": "Active",
            "severity": "1-Critical",
            "missing": ""
        }]),
    )
    .await
    .expect("ingest");

    assert!(receipt.ok);
    assert_eq!(receipt.release_id, "R1");
    assert_eq!(receipt.inserted, 1);

    let view = get_release(&settings.database_path, "R1").await.expect("read");
    assert_eq!(
        view.counts,
        ReleaseCounts {
            total: 1,
            pbi_count: 0,
            bug_count: 1,
            full_score_count: 0,
            full_score_percent: 0,
        }
    );
    assert_eq!(view.rows[0].severity.as_deref(), Some("1-Critical"));
    assert_eq!(identify_hot_items(&view.rows, &DraftOptions::default().severity_keywords), vec![1]);
}

#[tokio::test]
async fn reingest_replaces_the_whole_snapshot() {
    let (_tmp, settings) = workspace(None);
    let db = &settings.database_path;

    ingest_release(db, json!([record("R1", 1, "Bug"), record("R1", 2, "PBI"), record("R1", 3, "Bug")]))
        .await
        .expect("first ingest");
    ingest_release(db, json!([record("R2", 9, "Bug")]))
        .await
        .expect("other release");
    let receipt = ingest_release(db, json!([record("R1", 2, "PBI"), record("R1", 4, "Task"), record("R1", 4, "Task")]))
        .await
        .expect("second ingest");
    assert_eq!(receipt.inserted, 2);

    let view = get_release(db, "R1").await.expect("read");
    let ids: Vec<i64> = view.rows.iter().map(|row| row.wi_id).collect();
    assert_eq!(view.counts.total, 2);
    assert!(ids.contains(&2) && ids.contains(&4));
    assert!(view.counts.pbi_count + view.counts.bug_count <= view.counts.total);

    let other = get_release(db, "R2").await.expect("read other");
    assert_eq!(other.counts.total, 1);
}

#[tokio::test]
async fn rejected_payloads_leave_stored_rows_untouched() {
    let (_tmp, settings) = workspace(None);
    let db = &settings.database_path;
    ingest_release(db, json!([record("R1", 1, "Bug")])).await.expect("seed");

    for bad in [
        json!([]),
        json!({"release_id": "R1"}),
        json!([record("R1", 5, "Bug"), record("R2", 6, "Bug")]),
        json!([{"release_id": "R1", "id": 0, "type": "Bug", "title": "t", "state": "s"}]),
    ] {
        let err = ingest_release(db, bad).await.expect_err("rejected");
        assert!(matches!(err, ReadinessError::InvalidPayload { .. }));
        assert!(err.is_client_error());
    }

    let view = get_release(db, "R1").await.expect("read");
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].wi_id, 1);
}

#[tokio::test]
async fn unknown_release_reads_as_empty() {
    let (_tmp, settings) = workspace(None);
    let view = get_release(&settings.database_path, "missing").await.expect("read");
    assert!(view.rows.is_empty());
    assert_eq!(view.counts, ReleaseCounts::default());
}

#[tokio::test]
async fn draft_faults_follow_input_then_configuration() {
    let (_tmp, settings) = workspace(None);

    let err = draft_approval(&settings, "R1", None).await.expect_err("no rows");
    assert_eq!(err.kind(), "empty_input");

    ingest_release(&settings.database_path, json!([record("R1", 1, "Bug")]))
        .await
        .expect("ingest");
    let err = draft_approval(&settings, "R1", None).await.expect_err("no key");
    assert!(matches!(err, ReadinessError::Configuration(_)));

    let err = draft_approval(&settings, "R1", Some(json!({"maxHighlights": 42})))
        .await
        .expect_err("bad options");
    assert!(matches!(err, ReadinessError::InvalidPayload { .. }));
}

#[tokio::test]
async fn draft_through_http_provider_returns_validated_output() {
    let mut server = mockito::Server::new_async().await;
    let content = r#"```json
{"purpose":"Speeds up search","highlights":["- Faster SearchElse — Bug 1"],"primaryRisk":"Index rebuild","blastRadius":"Affects: search","buildReadiness":"Recommend: PROCEED"}
```"#;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let (_tmp, settings) = workspace(Some("sk-test"));
    ingest_release(&settings.database_path, json!([record("R1", 1, "Bug")]))
        .await
        .expect("ingest");

    let client = OpenAiClient::new(settings.api_key.as_deref(), &settings.model, &server.url()).expect("client");
    let limiter = RateLimiter::new(RATE_LIMIT_WINDOW, Arc::new(ManualClock::new(0)));

    let draft = draft_with_generator(&settings, &client, &limiter, "R1", &DraftOptions::default())
        .await
        .expect("draft");
    assert_eq!(draft.purpose, "Speeds up search");
    assert_eq!(draft.highlights.len(), 1);

    let err = draft_with_generator(&settings, &client, &limiter, "R1", &DraftOptions::default())
        .await
        .expect_err("inside window");
    assert!(matches!(err.retry_after_secs(), Some(1..=5)));

    mock.assert_async().await;
}

#[tokio::test]
async fn settings_commands_round_trip_and_merge_partial_updates() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");

    let initial = get_settings(temp_dir.path()).await.expect("load settings");
    assert_eq!(initial["maxHighlights"], json!(6));
    assert!(initial.get("themeKeywords").is_some());

    let saved = save_settings(temp_dir.path(), json!({"maxHighlights": 3, "apiKey": "sk-leak"}))
        .await
        .expect("save settings");
    assert_eq!(saved["maxHighlights"], json!(3));
    assert!(saved.get("apiKey").is_none());
    assert_eq!(saved["model"], initial["model"]);

    let reloaded = get_settings(temp_dir.path()).await.expect("reload");
    assert_eq!(reloaded, saved);
}

#[tokio::test]
async fn back_to_back_drafts_share_the_data_dir_rate_window() {
    let mut server = mockito::Server::new_async().await;
    let content = r#"{"purpose":"Stabilises uploads","highlights":["- FTP retries — Bug 1"],"primaryRisk":"Missed deliveries","blastRadius":"Affects: scheduler","buildReadiness":"Recommend: PROCEED"}"#;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let (tmp, mut settings) = workspace(Some("sk-test"));
    settings.endpoint = server.url();
    ingest_release(&settings.database_path, json!([record("R1", 1, "Bug")]))
        .await
        .expect("ingest");

    draft_approval(&settings, "R1", None).await.expect("first draft");

    // A second run reloads everything from disk, as a new CLI process would.
    let mut reloaded = load_effective_settings_with_key(tmp.path(), Some("sk-test".to_string())).expect("reload");
    reloaded.endpoint = server.url();
    let err = draft_approval(&reloaded, "R1", None).await.expect_err("inside window");

    match err {
        ReadinessError::RateLimitExceeded { retry_after_secs } => assert!((1..=5).contains(&retry_after_secs)),
        other => panic!("expected rate limit, got {other:?}"),
    }
    mock.assert_async().await;
}
