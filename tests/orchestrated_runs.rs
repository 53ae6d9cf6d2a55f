//! End-to-end runs through the orchestrator: chunking, atomicity,
//! reference checks, duplicates and cascade deletes.

mod common;

use archbatch::client::{ChunkStatus, FlattenedDocument, Origin, OrchestratorError};
use common::{
    apply_direct, element_count, has_element, orchestrator, relationship_count, start_api,
    test_config, write_doc,
};
use serde_json::json;

// === Scenario: 25 changes at chunk size 8 become 4 operations ===
#[tokio::test]
async fn large_document_is_split_into_bounded_chunks() {
    let api = start_api();
    let changes: Vec<_> = (0..25)
        .map(|i| json!({"op": "createElement", "type": "node", "name": format!("Server {}", i), "tempId": format!("n{}", i)}))
        .collect();
    let document = FlattenedDocument::from_values(&changes).unwrap();

    let mut config = test_config();
    config.chunk_size = 8;
    let report = orchestrator(&api, config).run(document).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.operations(), 4);
    let sizes: Vec<usize> = report.chunks.iter().map(|c| c.submitted).collect();
    assert_eq!(sizes, vec![8, 8, 8, 1]);
    assert_eq!(api.list_operations(None, 100).total, 4);
    assert_eq!(element_count(&api), 25);
    assert_eq!(report.id_map.len(), 25);
}

// === Scenario: tempIds declared in one chunk resolve in the next ===
#[tokio::test]
async fn temp_ids_carry_across_chunks() {
    let api = start_api();
    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "customer"}),
        json!({"op": "createElement", "type": "business-role", "name": "Buyer", "tempId": "buyer"}),
        json!({"op": "createRelationship", "type": "assignment-relationship",
               "sourceId": "customer", "targetId": "buyer", "tempId": "assign"}),
    ])
    .unwrap();

    let mut config = test_config();
    config.chunk_size = 1;
    let report = orchestrator(&api, config).run(document).await.unwrap();

    assert_eq!(report.chunks.len(), 3);
    let assign = report.id_map.get("assign").unwrap();
    let (source, target) = api.relationship_endpoints(assign).unwrap();
    assert_eq!(Some(source.as_str()), report.id_map.get("customer"));
    assert_eq!(Some(target.as_str()), report.id_map.get("buyer"));
}

// === Scenario: a failing change rolls back its whole chunk ===
#[tokio::test]
async fn failed_chunk_commits_nothing() {
    let api = start_api();
    apply_direct(
        &api,
        &[json!({"op": "createElement", "type": "business-actor", "name": "Customer"})],
    )
    .await;

    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "node", "name": "Fresh", "tempId": "fresh"}),
        json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "dup"}),
    ])
    .unwrap();
    let err = orchestrator(&api, test_config())
        .run(document)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DUPLICATE");
    assert_eq!(err.origin(), Origin::Server);
    let recovery = err.recovery().unwrap();
    assert_eq!(recovery.failed_change, Some(1));
    assert_eq!(recovery.chunks_completed, 0);
    assert!(recovery.unbound_temp_ids.contains(&"fresh".to_string()));
    assert_eq!(recovery.model_summary.as_ref().unwrap().elements, 1);

    assert!(!has_element(&api, "Fresh"));
    assert_eq!(element_count(&api), 1);
}

// === Scenario: same name with another type is not a duplicate ===
#[tokio::test]
async fn duplicates_are_keyed_by_name_and_type() {
    let api = start_api();
    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "business-actor", "name": "Customer"}),
        json!({"op": "createElement", "type": "business-role", "name": "Customer"}),
    ])
    .unwrap();
    let report = orchestrator(&api, test_config()).run(document).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(element_count(&api), 2);

    let again = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "business-role", "name": "Customer"}),
    ])
    .unwrap();
    let err = orchestrator(&api, test_config())
        .run(again)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE");
    assert!(err.to_string().contains("already exists"));
}

// === Scenario: unresolved references stop the run before any submission ===
#[tokio::test]
async fn unresolved_reference_fails_fast() {
    let api = start_api();
    let document = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "application-component", "name": "Portal", "tempId": "portal"}),
        json!({"op": "createRelationship", "type": "serving-relationship",
               "sourceId": "portal", "targetId": "ghost"}),
    ])
    .unwrap();

    let err = orchestrator(&api, test_config())
        .run(document)
        .await
        .unwrap_err();
    match &err {
        OrchestratorError::UnresolvedReference { index, field, token, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(field, "targetId");
            assert_eq!(token, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.origin(), Origin::Client);
    assert_eq!(api.list_operations(None, 10).total, 0);
    assert_eq!(element_count(&api), 0);
}

#[tokio::test]
async fn reference_declared_later_is_unresolved() {
    let api = start_api();
    let document = FlattenedDocument::from_values(&[
        json!({"op": "createRelationship", "type": "serving-relationship",
               "sourceId": "a", "targetId": "b"}),
        json!({"op": "createElement", "type": "node", "name": "A", "tempId": "a"}),
        json!({"op": "createElement", "type": "node", "name": "B", "tempId": "b"}),
    ])
    .unwrap();
    let err = orchestrator(&api, test_config())
        .run(document)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNRESOLVED_REFERENCE");
}

// === Scenario: real ids and exact names count as resolved ===
#[tokio::test]
async fn existing_ids_and_names_resolve() {
    let api = start_api();
    let op = apply_direct(
        &api,
        &[json!({"op": "createElement", "type": "application-component", "name": "Billing", "tempId": "b"})],
    )
    .await;
    let billing = op.result.unwrap()[0].real_id.clone().unwrap();

    let by_id = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "application-component", "name": "Portal", "tempId": "p"}),
        json!({"op": "createRelationship", "type": "serving-relationship", "sourceId": billing, "targetId": "p"}),
    ])
    .unwrap();
    let report = orchestrator(&api, test_config()).run(by_id).await.unwrap();
    assert!(report.succeeded());

    let by_name = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "node", "name": "Host", "tempId": "h"}),
        json!({"op": "createRelationship", "type": "serving-relationship", "sourceId": "h", "targetId": "Billing"}),
    ])
    .unwrap();
    let mut config = test_config();
    config.resolve_names = true;
    let report = orchestrator(&api, config).run(by_name).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.id_map.get("Billing"), Some(billing.as_str()));
    assert_eq!(relationship_count(&api), 2);
}

// === Scenario: cascade delete removes dependents and clears undo ===
#[tokio::test]
async fn cascade_delete_removes_everything_attached() {
    let api = start_api();
    let built = FlattenedDocument::from_values(&[
        json!({"op": "createElement", "type": "business-actor", "name": "Clerk", "tempId": "clerk"}),
        json!({"op": "createElement", "type": "business-role", "name": "Desk", "tempId": "desk"}),
        json!({"op": "createRelationship", "type": "assignment-relationship",
               "sourceId": "clerk", "targetId": "desk", "tempId": "r"}),
        json!({"op": "createElement", "type": "business-role", "name": "Till", "tempId": "till"}),
        json!({"op": "createRelationship", "type": "assignment-relationship",
               "sourceId": "clerk", "targetId": "till"}),
        json!({"op": "createView", "name": "Front office", "tempId": "v"}),
        json!({"op": "addToView", "viewId": "v", "elementId": "clerk", "tempId": "v-clerk"}),
        json!({"op": "addToView", "viewId": "v", "elementId": "desk", "tempId": "v-desk"}),
        json!({"op": "addConnectionToView", "viewId": "v", "relationshipId": "r",
               "sourceVisualId": "v-clerk", "targetVisualId": "v-desk"}),
    ])
    .unwrap();
    let report = orchestrator(&api, test_config()).run(built).await.unwrap();
    let clerk = report.id_map.get("clerk").unwrap().to_string();
    assert_eq!(api.model_summary().connections, 1);

    let delete = FlattenedDocument::from_values(&[
        json!({"op": "deleteElement", "id": clerk, "cascade": true}),
    ])
    .unwrap();
    let report = orchestrator(&api, test_config()).run(delete).await.unwrap();
    assert_eq!(report.chunks[0].status, ChunkStatus::Complete);
    let result = api
        .status(&report.chunks[0].operation_ids[0])
        .and_then(|op| op.result)
        .unwrap();
    assert_eq!(result[0].fields["undoable"], json!(false));
    assert_eq!(result[0].fields["removedRelationships"].as_array().unwrap().len(), 2);
    assert_eq!(result[0].fields["removedVisuals"].as_array().unwrap().len(), 1);

    let summary = api.model_summary();
    assert_eq!(summary.elements, 2);
    assert_eq!(summary.relationships, 0);
    assert_eq!(summary.view_objects, 1);
    assert_eq!(summary.connections, 0);

    let receipt = api.undo().unwrap();
    let undo = wait_terminal(&api, &receipt.operation_id).await;
    assert_eq!(undo.error.as_deref(), Some("nothing to undo"));
}

// === Scenario: documents on disk, with includes ===
#[tokio::test]
async fn run_file_inlines_includes_after_own_changes() {
    let dir = tempfile::tempdir().unwrap();
    write_doc(
        dir.path(),
        "parts/relations.json",
        &json!({"version": "1.0", "changes": [
            {"op": "createRelationship", "type": "serving-relationship",
             "sourceId": "ordering", "targetId": "customer"}
        ]}),
    );
    let main = write_doc(
        dir.path(),
        "main.json",
        &json!({"version": "1.0", "includes": ["parts/relations.json"], "changes": [
            {"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "customer"},
            {"op": "createElement", "type": "business-service", "name": "Ordering", "tempId": "ordering"}
        ]}),
    );

    let api = start_api();
    let report = orchestrator(&api, test_config()).run_file(&main).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(element_count(&api), 2);
    assert_eq!(relationship_count(&api), 1);
}

async fn wait_terminal(api: &archbatch::ChangeApi, id: &str) -> archbatch::Operation {
    for _ in 0..2000 {
        match api.status(id) {
            Some(op) if op.status.is_terminal() => return op,
            _ => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
        }
    }
    panic!("operation {} did not finish", id);
}
