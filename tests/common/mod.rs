//! Shared harness for the end-to-end orchestrator tests
//!
//! Every test runs the real stack in-process: `Orchestrator` over a
//! `LocalTransport` over a `ChangeApi` with a fast queue tick.

#![allow(dead_code)]

use archbatch::client::{LocalTransport, Orchestrator, OrchestratorConfig};
use archbatch::{ChangeApi, ModelEngine, OperationStatus, QueueConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn start_api() -> ChangeApi {
    ChangeApi::start(
        Arc::new(ModelEngine::new()),
        QueueConfig {
            tick: Duration::from_millis(5),
            ..QueueConfig::default()
        },
    )
}

/// Safe profile without the inter-chunk delay, polling fast
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        inter_chunk_delay_ms: 0,
        poll_interval_ms: 5,
        poll_timeout_ms: 10_000,
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(api: &ChangeApi, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(Arc::new(LocalTransport::new(api.clone())), config)
}

/// Write a JSON change document under `dir`
pub fn write_doc(dir: &Path, name: &str, document: &Value) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, serde_json::to_string_pretty(document).unwrap()).unwrap();
    path
}

/// Submit raw changes straight to the API and wait for the outcome
pub async fn apply_direct(api: &ChangeApi, changes: &[Value]) -> archbatch::Operation {
    let receipt = api.submit_json(changes).unwrap();
    for _ in 0..2000 {
        match api.status(&receipt.operation_id) {
            Some(op) if op.status.is_terminal() => {
                assert_eq!(op.status, OperationStatus::Complete, "{:?}", op.error);
                return op;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    panic!("operation {} did not finish", receipt.operation_id);
}

pub fn element_count(api: &ChangeApi) -> usize {
    api.snapshot().elements.len()
}

pub fn relationship_count(api: &ChangeApi) -> usize {
    api.snapshot().relationships.len()
}

pub fn has_element(api: &ChangeApi, name: &str) -> bool {
    api.snapshot().elements.iter().any(|e| e.name == name)
}

/// Wait until the queue has nothing left to process
pub async fn drain(api: &ChangeApi) {
    for _ in 0..2000 {
        let busy = api
            .list_operations(None, usize::MAX)
            .operations
            .iter()
            .any(|op| !op.status.is_terminal());
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue did not drain");
}
