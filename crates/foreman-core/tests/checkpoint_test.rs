//! Tests for the checkpoint service against a real store.

mod common;

use foreman_core::checkpoint::CheckpointInput;
use common::TestEngine;

fn input(summary: &str, completed: &[&str], pending: &[&str]) -> CheckpointInput {
    CheckpointInput {
        summary: summary.to_string(),
        completed_items: completed.iter().map(|s| s.to_string()).collect(),
        pending_items: pending.iter().map(|s| s.to_string()).collect(),
        active_files: None,
        notes: None,
        estimated_context_usage: None,
    }
}

#[tokio::test]
async fn save_normalizes_role_and_roundtrips() {
    let engine = TestEngine::new().await;

    let saved = engine
        .checkpoints
        .save("Developer", &input("first checkpoint", &["a"], &["b"]))
        .await
        .unwrap();
    assert_eq!(saved.role, "developer");
    assert_eq!(saved.summary, "first checkpoint");

    let latest = engine.checkpoints.latest("developer").await.unwrap().unwrap();
    assert_eq!(latest.id, saved.id);
    assert_eq!(latest.completed_items, r#"["a"]"#);
}

#[tokio::test]
async fn latest_picks_newest_of_many() {
    let engine = TestEngine::new().await;

    for i in 1..=3 {
        engine
            .checkpoints
            .save("dev", &input(&format!("checkpoint {i}"), &[], &[]))
            .await
            .unwrap();
    }

    let latest = engine.checkpoints.latest("dev").await.unwrap().unwrap();
    assert_eq!(latest.summary, "checkpoint 3");

    let history = engine.checkpoints.history("dev", Some(2)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].summary, "checkpoint 3");
    assert_eq!(history[1].summary, "checkpoint 2");
}

#[tokio::test]
async fn resumption_context_is_none_without_checkpoints() {
    let engine = TestEngine::new().await;
    assert!(
        engine
            .checkpoints
            .resumption_context("dev")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn resumption_context_carries_items_and_files() {
    let engine = TestEngine::new().await;

    engine
        .checkpoints
        .save(
            "dev",
            &CheckpointInput {
                summary: "halfway".to_string(),
                completed_items: vec!["step 1".to_string()],
                pending_items: vec!["step 2".to_string()],
                active_files: Some(vec!["src/lib.rs".to_string()]),
                notes: Some("mind the cache".to_string()),
                estimated_context_usage: Some(40_000),
            },
        )
        .await
        .unwrap();

    let md = engine
        .checkpoints
        .resumption_context("dev")
        .await
        .unwrap()
        .expect("context present");

    assert!(md.contains("halfway"));
    assert!(md.contains("- [x] step 1"));
    assert!(md.contains("- [ ] step 2"));
    assert!(md.contains("- `src/lib.rs`"));
    assert!(md.contains("mind the cache"));
    assert!(md.trim_end().ends_with("Continue from this checkpoint."));
}

#[tokio::test]
async fn checkpoints_are_isolated_per_role() {
    let engine = TestEngine::new().await;

    engine
        .checkpoints
        .save("dev", &input("dev work", &[], &[]))
        .await
        .unwrap();
    engine
        .checkpoints
        .save("qa", &input("qa work", &[], &[]))
        .await
        .unwrap();

    let latest = engine.checkpoints.latest("dev").await.unwrap().unwrap();
    assert_eq!(latest.summary, "dev work");
    assert_eq!(engine.checkpoints.history("qa", None).await.unwrap().len(), 1);
}
