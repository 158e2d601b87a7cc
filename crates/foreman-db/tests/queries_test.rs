//! Integration tests for the query modules against a real SQLite database.

use foreman_db::models::{AgentStatus, MessageType, ProjectPhase};
use foreman_db::queries::agents::{self, NewAgent};
use foreman_db::queries::checkpoints::{self, NewCheckpoint};
use foreman_db::queries::messages::{self, NewMessageRow};
use foreman_db::queries::projects;
use foreman_test_utils::create_test_db;

// ===========================================================================
// Project
// ===========================================================================

#[tokio::test]
async fn project_insert_and_get_roundtrip() {
    let (pool, _dir) = create_test_db().await;

    assert!(projects::get_project(&pool).await.unwrap().is_none());

    let project = projects::insert_project(&pool, "demo", "/tmp/demo", Some("build a thing"))
        .await
        .unwrap();
    assert_eq!(project.id, 1);
    assert_eq!(project.name, "demo");
    assert_eq!(project.phase, ProjectPhase::Initializing);
    assert!(project.completed_at.is_none());

    let fetched = projects::get_project(&pool).await.unwrap().unwrap();
    assert_eq!(fetched.name, project.name);
    assert_eq!(fetched.working_dir, "/tmp/demo");
    assert_eq!(fetched.brief.as_deref(), Some("build a thing"));
}

#[tokio::test]
async fn project_is_a_singleton() {
    let (pool, _dir) = create_test_db().await;

    projects::insert_project(&pool, "first", "/tmp/a", None)
        .await
        .unwrap();
    let second = projects::insert_project(&pool, "second", "/tmp/b", None).await;
    assert!(second.is_err(), "second insert must violate the singleton");
}

#[tokio::test]
async fn project_brief_can_be_replaced() {
    let (pool, _dir) = create_test_db().await;
    projects::insert_project(&pool, "demo", "/tmp/demo", None)
        .await
        .unwrap();

    let rows = projects::update_brief(&pool, "revised brief").await.unwrap();
    assert_eq!(rows, 1);
    let p = projects::get_project(&pool).await.unwrap().unwrap();
    assert_eq!(p.brief.as_deref(), Some("revised brief"));
}

#[tokio::test]
async fn project_terminal_phase_sets_completed_at() {
    let (pool, _dir) = create_test_db().await;
    projects::insert_project(&pool, "demo", "/tmp/demo", None)
        .await
        .unwrap();

    projects::update_phase(&pool, ProjectPhase::Building)
        .await
        .unwrap();
    let p = projects::get_project(&pool).await.unwrap().unwrap();
    assert_eq!(p.phase, ProjectPhase::Building);
    assert!(p.completed_at.is_none());

    projects::update_phase(&pool, ProjectPhase::Completed)
        .await
        .unwrap();
    let p = projects::get_project(&pool).await.unwrap().unwrap();
    assert_eq!(p.phase, ProjectPhase::Completed);
    assert!(p.completed_at.is_some());
}

// ===========================================================================
// Agents
// ===========================================================================

#[tokio::test]
async fn agent_insert_and_get_roundtrip() {
    let (pool, _dir) = create_test_db().await;

    let deps = vec!["architect".to_string()];
    let agent = agents::insert_agent(
        &pool,
        &NewAgent {
            role: "developer",
            worker_kind: "developer",
            dependencies: &deps,
        },
    )
    .await
    .unwrap()
    .expect("fresh insert returns a row");

    assert_eq!(agent.role, "developer");
    assert_eq!(agent.status, AgentStatus::Pending);
    assert_eq!(agent.retry_count, 0);
    assert_eq!(agent.dependencies.0, deps);
    assert!(agent.task_id.is_none());

    let fetched = agents::get_agent(&pool, "developer").await.unwrap().unwrap();
    assert_eq!(fetched.worker_kind, "developer");
}

#[tokio::test]
async fn agent_role_lookup_is_case_insensitive() {
    let (pool, _dir) = create_test_db().await;

    agents::insert_agent(
        &pool,
        &NewAgent {
            role: "Architect",
            worker_kind: "architect",
            dependencies: &[],
        },
    )
    .await
    .unwrap();

    let fetched = agents::get_agent(&pool, "architect").await.unwrap();
    assert!(fetched.is_some(), "NOCASE collation should match");
    let fetched = agents::get_agent(&pool, "ARCHITECT").await.unwrap();
    assert!(fetched.is_some());
}

#[tokio::test]
async fn agent_duplicate_role_insert_is_absorbed() {
    let (pool, _dir) = create_test_db().await;

    let new = NewAgent {
        role: "tester",
        worker_kind: "tester",
        dependencies: &[],
    };
    assert!(agents::insert_agent(&pool, &new).await.unwrap().is_some());
    // Same role again, even with different case: conflict, no new row.
    let dup = NewAgent {
        role: "Tester",
        worker_kind: "tester-v2",
        dependencies: &[],
    };
    assert!(agents::insert_agent(&pool, &dup).await.unwrap().is_none());

    let all = agents::list_agents(&pool).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].worker_kind, "tester");
}

#[tokio::test]
async fn agent_update_row_persists_all_fields() {
    let (pool, _dir) = create_test_db().await;

    let mut agent = agents::insert_agent(
        &pool,
        &NewAgent {
            role: "architect",
            worker_kind: "architect",
            dependencies: &[],
        },
    )
    .await
    .unwrap()
    .unwrap();

    agent.status = AgentStatus::Running;
    agent.task_id = Some("task-123".to_string());
    agent.spawned_at = Some(chrono::Utc::now());
    agent.timeout_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    agent.retry_count = 2;
    agent.last_message = Some("working on it".to_string());
    agent.recovery_context = Some("resume here".to_string());

    let rows = agents::update_agent_row(&pool, &agent).await.unwrap();
    assert_eq!(rows, 1);

    let fetched = agents::get_agent(&pool, "architect").await.unwrap().unwrap();
    assert_eq!(fetched.status, AgentStatus::Running);
    assert_eq!(fetched.task_id.as_deref(), Some("task-123"));
    assert_eq!(fetched.retry_count, 2);
    assert_eq!(fetched.last_message.as_deref(), Some("working on it"));
    assert_eq!(fetched.recovery_context.as_deref(), Some("resume here"));
    assert!(fetched.spawned_at.is_some());
    assert!(fetched.timeout_at.is_some());
}

#[tokio::test]
async fn agent_update_unknown_role_affects_no_rows() {
    let (pool, _dir) = create_test_db().await;

    let agent = agents::insert_agent(
        &pool,
        &NewAgent {
            role: "ghost",
            worker_kind: "ghost",
            dependencies: &[],
        },
    )
    .await
    .unwrap()
    .unwrap();

    let mut renamed = agent.clone();
    renamed.role = "nobody".to_string();
    let rows = agents::update_agent_row(&pool, &renamed).await.unwrap();
    assert_eq!(rows, 0);
}

// ===========================================================================
// Checkpoints
// ===========================================================================

#[tokio::test]
async fn checkpoint_latest_and_history_order() {
    let (pool, _dir) = create_test_db().await;

    for i in 1..=3 {
        checkpoints::insert_checkpoint(
            &pool,
            &NewCheckpoint {
                role: "dev",
                summary: &format!("step {i}"),
                completed_items: "[]",
                pending_items: "[]",
                active_files: None,
                notes: None,
                estimated_context_usage: None,
            },
        )
        .await
        .unwrap();
    }

    let latest = checkpoints::get_latest_for_role(&pool, "dev")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.summary, "step 3");

    let history = checkpoints::list_for_role(&pool, "dev", None).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].summary, "step 3");
    assert_eq!(history[2].summary, "step 1");

    let limited = checkpoints::list_for_role(&pool, "dev", Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn checkpoint_unknown_role_is_empty() {
    let (pool, _dir) = create_test_db().await;
    assert!(
        checkpoints::get_latest_for_role(&pool, "nobody")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        checkpoints::list_for_role(&pool, "nobody", None)
            .await
            .unwrap()
            .is_empty()
    );
}

// ===========================================================================
// Messages
// ===========================================================================

fn new_msg<'a>(id: &'a str, from: &'a str, to: &'a str, content: &'a str) -> NewMessageRow<'a> {
    NewMessageRow {
        id,
        from_role: from,
        to_role: to,
        msg_type: MessageType::Info,
        content,
        artifacts: None,
        metadata: None,
    }
}

#[tokio::test]
async fn message_insert_dedupes_on_id() {
    let (pool, _dir) = create_test_db().await;

    let first = messages::insert_message(&pool, &new_msg("m1", "a", "b", "hello"))
        .await
        .unwrap();
    assert!(first.is_some());

    let dup = messages::insert_message(&pool, &new_msg("m1", "a", "b", "hello again"))
        .await
        .unwrap();
    assert!(dup.is_none(), "duplicate id must be absorbed");

    let stored = messages::get_message(&pool, "m1").await.unwrap().unwrap();
    assert_eq!(stored.content, "hello");
}

#[tokio::test]
async fn message_role_filter_matches_to_from_and_broadcast() {
    let (pool, _dir) = create_test_db().await;

    messages::insert_message(&pool, &new_msg("m1", "s", "a", "direct"))
        .await
        .unwrap();
    messages::insert_message(&pool, &new_msg("m2", "s", "all", "broadcast"))
        .await
        .unwrap();
    messages::insert_message(&pool, &new_msg("m3", "a", "b", "from a"))
        .await
        .unwrap();
    messages::insert_message(&pool, &new_msg("m4", "b", "c", "unrelated"))
        .await
        .unwrap();

    let for_a = messages::get_for_role(&pool, "a", None).await.unwrap();
    let ids: Vec<&str> = for_a.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    let for_s = messages::get_for_role(&pool, "s", None).await.unwrap();
    let ids: Vec<&str> = for_s.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"], "sender sees its own messages");
}

#[tokio::test]
async fn message_since_filter_is_exclusive() {
    let (pool, _dir) = create_test_db().await;

    let first = messages::insert_message(&pool, &new_msg("m1", "s", "a", "one"))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    messages::insert_message(&pool, &new_msg("m2", "s", "a", "two"))
        .await
        .unwrap();

    let after = messages::get_for_role(&pool, "a", Some(first.created_at))
        .await
        .unwrap();
    let ids: Vec<&str> = after.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2"]);
}

#[tokio::test]
async fn message_get_all_limit_keeps_most_recent_in_order() {
    let (pool, _dir) = create_test_db().await;

    for i in 1..=5 {
        messages::insert_message(&pool, &new_msg(&format!("m{i}"), "s", "a", "x"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let all = messages::get_all(&pool, None).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[0].id, "m1");

    let recent = messages::get_all(&pool, Some(2)).await.unwrap();
    let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m4", "m5"]);
}

#[tokio::test]
async fn message_json_payloads_roundtrip() {
    let (pool, _dir) = create_test_db().await;

    let artifacts = serde_json::json!(["src/lib.rs", "src/main.rs"]);
    let metadata = serde_json::json!({"severity": "high"});
    messages::insert_message(
        &pool,
        &NewMessageRow {
            id: "m1",
            from_role: "dev",
            to_role: "supervisor",
            msg_type: MessageType::NeedsReview,
            content: "please review",
            artifacts: Some(&artifacts),
            metadata: Some(&metadata),
        },
    )
    .await
    .unwrap();

    let stored = messages::get_message(&pool, "m1").await.unwrap().unwrap();
    assert_eq!(stored.msg_type, MessageType::NeedsReview);
    assert_eq!(stored.artifacts, Some(artifacts));
    assert_eq!(stored.metadata, Some(metadata));
}
