//! Re-running documents, partial failure, and the tempId sidecar

mod common;

use archbatch::client::{ChunkStatus, FlattenedDocument, OrchestratorError, TempIdMap};
use common::{
    apply_direct, drain, element_count, has_element, orchestrator, relationship_count, start_api,
    test_config, write_doc,
};
use serde_json::{json, Value};

fn landscape() -> Vec<Value> {
    vec![
        json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "customer"}),
        json!({"op": "createElement", "type": "business-service", "name": "Ordering", "tempId": "ordering"}),
        json!({"op": "createElement", "type": "application-component", "name": "Shop", "tempId": "shop"}),
        json!({"op": "createRelationship", "type": "serving-relationship",
               "sourceId": "ordering", "targetId": "customer", "tempId": "serves"}),
        json!({"op": "createRelationship", "type": "serving-relationship",
               "sourceId": "shop", "targetId": "ordering", "tempId": "backs"}),
    ]
}

// === Scenario: skip-existing makes a re-run a no-op ===
#[tokio::test]
async fn rerun_with_skip_existing_creates_nothing() {
    let api = start_api();
    let first = orchestrator(&api, test_config())
        .run(FlattenedDocument::from_values(&landscape()).unwrap())
        .await
        .unwrap();
    assert_eq!(element_count(&api), 3);
    assert_eq!(relationship_count(&api), 2);

    let mut config = test_config();
    config.skip_existing = true;
    config.chunk_size = 2;
    let second = orchestrator(&api, config)
        .run(FlattenedDocument::from_values(&landscape()).unwrap())
        .await
        .unwrap();

    assert!(second.succeeded());
    assert_eq!(second.duplicates_skipped(), 5);
    assert_eq!(element_count(&api), 3);
    assert_eq!(relationship_count(&api), 2);
    for temp_id in ["customer", "ordering", "shop", "serves", "backs"] {
        assert_eq!(
            second.id_map.resolve(temp_id),
            first.id_map.resolve(temp_id),
            "{} should map to the original id",
            temp_id
        );
    }
}

#[tokio::test]
async fn rerun_without_skip_existing_fails_on_first_duplicate() {
    let api = start_api();
    orchestrator(&api, test_config())
        .run(FlattenedDocument::from_values(&landscape()).unwrap())
        .await
        .unwrap();

    let err = orchestrator(&api, test_config())
        .run(FlattenedDocument::from_values(&landscape()).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE");
    let detail = match &err {
        OrchestratorError::ChunkFailed { detail, .. } => detail.clone().unwrap(),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(detail.op_number, Some(0));
    assert!(detail.existing_id.is_some());
}

// === Scenario: continue-on-error skips only what depends on the failure ===
#[tokio::test]
async fn continue_on_error_poisons_dependents() {
    let api = start_api();
    apply_direct(
        &api,
        &[json!({"op": "createElement", "type": "business-actor", "name": "Customer"})],
    )
    .await;

    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "customer"}),
        json!({"op": "createElement", "type": "business-service", "name": "Ordering", "tempId": "ordering"}),
        json!({"op": "createRelationship", "type": "serving-relationship",
               "sourceId": "ordering", "targetId": "customer"}),
        json!({"op": "createElement", "type": "node", "name": "Host"}),
    ])
    .unwrap();
    let mut config = test_config();
    config.chunk_size = 1;
    config.continue_on_error = true;
    let report = orchestrator(&api, config).run(document).await.unwrap();

    let statuses: Vec<ChunkStatus> = report.chunks.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![
            ChunkStatus::Failed,
            ChunkStatus::Complete,
            ChunkStatus::Skipped,
            ChunkStatus::Complete
        ]
    );
    assert_eq!(report.skipped_chunks, vec![2]);
    assert!(!report.succeeded());
    assert!(report.warnings.iter().any(|w| w.contains("'customer'")));
    assert!(has_element(&api, "Ordering"));
    assert!(has_element(&api, "Host"));
    assert_eq!(relationship_count(&api), 0);
}

// === Scenario: without polling, dependents of unpolled chunks wait ===
#[tokio::test]
async fn no_poll_skips_chunks_needing_unpolled_ids() {
    let api = start_api();
    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "node", "name": "A", "tempId": "a"}),
        json!({"op": "createElement", "type": "node", "name": "B", "tempId": "b"}),
        json!({"op": "createRelationship", "type": "serving-relationship", "sourceId": "a", "targetId": "b"}),
        json!({"op": "createElement", "type": "node", "name": "C"}),
    ])
    .unwrap();
    let mut config = test_config();
    config.chunk_size = 2;
    config.poll = false;
    let report = orchestrator(&api, config).run(document).await.unwrap();

    assert_eq!(report.chunks[0].status, ChunkStatus::Submitted);
    assert_eq!(report.chunks[1].status, ChunkStatus::Skipped);
    assert_eq!(report.skipped_chunks, vec![1]);
    assert!(report.warnings.iter().any(|w| w.contains("unpolled")));

    drain(&api).await;
    assert_eq!(element_count(&api), 2);
    assert_eq!(relationship_count(&api), 0);
}

// === Scenario: a declared idFile must exist unless overridden ===
#[tokio::test]
async fn missing_id_file_blocks_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "followup.json",
        &json!({"version": "1.0", "idFiles": ["ids/previous.json"], "changes": [
            {"op": "createElement", "type": "node", "name": "Host"}
        ]}),
    );

    let api = start_api();
    let err = orchestrator(&api, test_config())
        .run_file(&path)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INCOMPLETE_ID_FILES");
    assert!(err.to_string().contains("previous.json"));
    assert_eq!(api.list_operations(None, 10).total, 0);

    let mut config = test_config();
    config.allow_incomplete_id_files = true;
    let report = orchestrator(&api, config).run_file(&path).await.unwrap();
    assert!(report.succeeded());
    assert!(report.warnings.iter().any(|w| w.contains("previous.json")));
    assert!(has_element(&api, "Host"));
}

// === Scenario: the saved tempId map feeds a follow-up document ===
#[tokio::test]
async fn saved_ids_resolve_in_a_later_run() {
    let dir = tempfile::tempdir().unwrap();
    let ids_path = dir.path().join("ids").join("base.json");
    let base = write_doc(
        dir.path(),
        "base.json",
        &json!({"version": "1.0", "changes": [
            {"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "customer"},
            {"op": "createElement", "type": "business-service", "name": "Ordering", "tempId": "ordering"}
        ]}),
    );
    let followup = write_doc(
        dir.path(),
        "followup.json",
        &json!({"version": "1.0", "idFiles": ["ids/base.json"], "changes": [
            {"op": "createRelationship", "type": "serving-relationship",
             "sourceId": "ordering", "targetId": "customer", "tempId": "serves"}
        ]}),
    );

    let api = start_api();
    let mut config = test_config();
    config.save_ids = Some(ids_path.clone());
    orchestrator(&api, config).run_file(&base).await.unwrap();

    let saved = TempIdMap::load(&ids_path).unwrap();
    assert_eq!(saved.len(), 2);

    let report = orchestrator(&api, test_config())
        .run_file(&followup)
        .await
        .unwrap();
    let serves = report.id_map.get("serves").unwrap();
    let (source, target) = api.relationship_endpoints(serves).unwrap();
    assert_eq!(Some(source.as_str()), saved.get("ordering"));
    assert_eq!(Some(target.as_str()), saved.get("customer"));
}
