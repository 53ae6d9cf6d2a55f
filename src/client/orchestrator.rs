//! Chunk orchestrator: drives a flattened change document through a
//! transport in bounded, sequential chunks
//!
//! ```text
//! prepare:  load idFiles → (name lookup) → unresolved-reference check
//! execute:  per chunk: skip if blocked → substitute tempIds →
//!           (cross-validate connections) → submit → poll →
//!           (skip-existing retries) → merge bindings
//! ```

use super::chunk::{split_chunks, Chunk};
use super::config::OrchestratorConfig;
use super::connections::{BatchIndex, ConnectionChecker, ConnectionError};
use super::document::{DocumentError, FlattenedDocument};
use super::idmap::TempIdMap;
use super::recovery::RecoverySnapshot;
use super::transport::{submit_with_backoff, ChangeTransport, TransportError};
use crate::change::Change;
use crate::queue::{Operation, OperationStatus};
use crate::transaction::ErrorDetail;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Which side of the transport a failure came from.
///
/// `Server` means the request reached the mutation layer; `Client` means it
/// never did (or the outcome is unknown, for timeouts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Client => "client",
            Origin::Server => "server",
        }
    }
}

/// A declared idFile that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFileProblem {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for IdFileProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.reason)
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("incomplete idFiles: {}", join_problems(.files))]
    IncompleteIdFiles { files: Vec<IdFileProblem> },

    #[error("Change {index} ({op}): unresolved reference '{token}' in {field}")]
    UnresolvedReference {
        index: usize,
        op: String,
        field: String,
        token: String,
    },

    #[error(transparent)]
    Connection(ConnectionError),

    #[error("chunk {chunk}: operation {operation_id} did not finish within the polling timeout; re-query its status")]
    Timeout { chunk: usize, operation_id: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("chunk {chunk} failed (operation {operation_id}): {message}")]
    ChunkFailed {
        chunk: usize,
        operation_id: String,
        message: String,
        detail: Option<ErrorDetail>,
        recovery: Box<RecoverySnapshot>,
    },
}

impl OrchestratorError {
    pub fn code(&self) -> &str {
        match self {
            OrchestratorError::Document(e) => e.code(),
            OrchestratorError::IncompleteIdFiles { .. } => "INCOMPLETE_ID_FILES",
            OrchestratorError::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            OrchestratorError::Connection(ConnectionError::Mismatch { .. }) => "DIRECTION_MISMATCH",
            OrchestratorError::Connection(ConnectionError::UnresolvedVisual { .. }) => "UNRESOLVED_VISUAL",
            OrchestratorError::Connection(ConnectionError::Transport(e)) => e.code(),
            OrchestratorError::Timeout { .. } => "TIMEOUT",
            OrchestratorError::Transport(e) => e.code(),
            OrchestratorError::ChunkFailed { detail, .. } => detail
                .as_ref()
                .map(|d| d.code.as_str())
                .unwrap_or("OPERATION_FAILED"),
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            OrchestratorError::ChunkFailed { .. } => Origin::Server,
            OrchestratorError::Transport(TransportError::Rejected { .. })
            | OrchestratorError::Transport(TransportError::RateLimited { .. }) => Origin::Server,
            _ => Origin::Client,
        }
    }

    /// Diagnostics captured when a chunk failed on the server
    pub fn recovery(&self) -> Option<&RecoverySnapshot> {
        match self {
            OrchestratorError::ChunkFailed { recovery, .. } => Some(recovery),
            _ => None,
        }
    }
}

fn join_problems(files: &[IdFileProblem]) -> String {
    files
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStatus {
    Complete,
    Failed,
    TimedOut,
    /// Not sent: depends on a failed, skipped, or unpolled chunk
    Skipped,
    /// Sent without waiting for the outcome
    Submitted,
}

/// What happened to one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub chunk: usize,
    pub status: ChunkStatus,
    /// One per submission; skip-existing may resubmit a shrunken chunk
    pub operation_ids: Vec<String>,
    /// Changes in the last submission
    pub submitted: usize,
    pub duplicates_skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    /// Flattened-document position of the change the server blamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_change: Option<usize>,
}

impl ChunkOutcome {
    fn new(chunk: usize) -> Self {
        Self {
            chunk,
            status: ChunkStatus::Skipped,
            operation_ids: Vec::new(),
            submitted: 0,
            duplicates_skipped: 0,
            error: None,
            error_detail: None,
            failed_change: None,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub chunks: Vec<ChunkOutcome>,
    pub warnings: Vec<String>,
    pub skipped_chunks: Vec<usize>,
    pub id_map: TempIdMap,
}

impl RunReport {
    /// Operations submitted across all chunks
    pub fn operations(&self) -> usize {
        self.chunks.iter().map(|c| c.operation_ids.len()).sum()
    }

    pub fn succeeded(&self) -> bool {
        self.chunks.iter().all(|c| c.status == ChunkStatus::Complete)
    }

    pub fn duplicates_skipped(&self) -> usize {
        self.chunks.iter().map(|c| c.duplicates_skipped).sum()
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// A document that passed every pre-submission check
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub document: FlattenedDocument,
    pub ids: TempIdMap,
    pub warnings: Vec<String>,
}

impl PreparedRun {
    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        self.document.len().div_ceil(chunk_size.max(1))
    }
}

/// Why a chunk did not complete
enum Failure {
    Server,
    Timeout(String),
    Transport(TransportError),
    Connection(ConnectionError),
}

/// A duplicate rejection recovered from the validator's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateNotice {
    pub index: usize,
    pub op: String,
    pub existing_id: Option<String>,
}

fn duplicate_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^Change (\d+) \((\w+)\): .*?(?: \(id: ([^)]+)\))?$").ok())
        .as_ref()
}

/// Parse `Change <index> (<op>): <message>[ (id: <existingId>)]`
pub fn parse_duplicate(message: &str) -> Option<DuplicateNotice> {
    let caps = duplicate_pattern()?.captures(message.trim())?;
    Some(DuplicateNotice {
        index: caps.get(1)?.as_str().parse().ok()?,
        op: caps.get(2)?.as_str().to_string(),
        existing_id: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

fn substitute(changes: &mut [Change], ids: &TempIdMap) {
    for change in changes {
        change.rewrite_references(|token| ids.resolve(token));
    }
}

/// Drives change documents through a [`ChangeTransport`]
pub struct Orchestrator {
    transport: Arc<dyn ChangeTransport>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn ChangeTransport>, config: OrchestratorConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Load, flatten and run the document at `path`
    pub async fn run_file(&self, path: &Path) -> OrchestratorResult<RunReport> {
        let document = FlattenedDocument::load(path)?;
        self.run(document).await
    }

    pub async fn run(&self, document: FlattenedDocument) -> OrchestratorResult<RunReport> {
        let prepared = self.prepare(document).await?;
        self.execute(prepared).await
    }

    /// Everything short of submitting: idFiles, name lookup, and the
    /// unresolved-reference check
    pub async fn prepare(&self, document: FlattenedDocument) -> OrchestratorResult<PreparedRun> {
        let mut warnings = Vec::new();
        let mut ids = TempIdMap::new();

        let mut problems = Vec::new();
        for path in &document.id_files {
            match TempIdMap::load(path) {
                Ok(loaded) => {
                    debug!(path = %path.display(), bindings = loaded.len(), "idFile loaded");
                    ids.extend(&loaded);
                }
                Err(e) => problems.push(IdFileProblem {
                    path: path.clone(),
                    reason: match e {
                        DocumentError::Io { source, .. } => source.to_string(),
                        other => other.to_string(),
                    },
                }),
            }
        }
        if !problems.is_empty() {
            if !self.config.allow_incomplete_id_files {
                return Err(OrchestratorError::IncompleteIdFiles { files: problems });
            }
            for problem in problems {
                let message = format!("idFile skipped: {}", problem);
                warn!("{}", message);
                warnings.push(message);
            }
        }

        // Tokens neither declared earlier nor bound by an idFile
        let mut declared: HashSet<&str> = HashSet::new();
        let mut unbound: Vec<(usize, &str, &'static str, &str)> = Vec::new();
        for (index, change) in document.changes.iter().enumerate() {
            for reference in change.references() {
                if !declared.contains(reference.value) && !ids.contains(reference.value) {
                    unbound.push((index, change.op(), reference.field, reference.value));
                }
            }
            if let Some(temp_id) = change.temp_id() {
                declared.insert(temp_id);
            }
        }

        if !unbound.is_empty() {
            let tokens: Vec<String> = unbound
                .iter()
                .map(|(_, _, _, token)| token.to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let existing = self.transport.existing_ids(&tokens).await?;
            unbound.retain(|(_, _, _, token)| !existing.contains(*token));
        }

        if self.config.resolve_names && !unbound.is_empty() {
            let names: BTreeSet<&str> = unbound.iter().map(|(_, _, _, token)| *token).collect();
            for name in names {
                let matches = self.transport.find_by_name(name).await?;
                match matches.as_slice() {
                    [] => {}
                    [only] => {
                        info!(token = name, id = %only.id, "reference bound by name");
                        ids.bind(name, only.id.to_string());
                    }
                    many => {
                        let message = format!(
                            "reference '{}' matches {} concepts by name; left unresolved",
                            name,
                            many.len()
                        );
                        warn!("{}", message);
                        warnings.push(message);
                    }
                }
            }
            unbound.retain(|(_, _, _, token)| !ids.contains(token));
        }

        if let Some(&(index, op, field, token)) = unbound.first() {
            if !self.config.allow_incomplete_id_files {
                return Err(OrchestratorError::UnresolvedReference {
                    index,
                    op: op.to_string(),
                    field: field.to_string(),
                    token: token.to_string(),
                });
            }
            for (index, op, field, token) in &unbound {
                let message = format!(
                    "Change {} ({}): reference '{}' in {} is unresolved",
                    index, op, token, field
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        Ok(PreparedRun {
            document,
            ids,
            warnings,
        })
    }

    /// Submit a prepared document chunk by chunk
    pub async fn execute(&self, prepared: PreparedRun) -> OrchestratorResult<RunReport> {
        let PreparedRun {
            document,
            mut ids,
            warnings,
        } = prepared;
        let mut report = RunReport {
            warnings,
            ..RunReport::default()
        };

        let index = if self.config.cross_validate {
            BatchIndex::from_changes(&document.changes)
        } else {
            BatchIndex::default()
        };
        let chunks = split_chunks(&document.changes, self.config.chunk_size);
        let total = chunks.len();
        info!(changes = document.len(), chunks = total, "run started");

        let mut poisoned: HashSet<String> = HashSet::new();
        let mut unpolled: HashSet<String> = HashSet::new();

        for chunk in &chunks {
            if chunk.index > 0 && !self.config.inter_chunk_delay().is_zero() {
                tokio::time::sleep(self.config.inter_chunk_delay()).await;
            }

            let blocked = chunk
                .referenced_tokens()
                .into_iter()
                .find(|t| !ids.contains(t) && (poisoned.contains(t) || unpolled.contains(t)));
            if let Some(token) = blocked {
                let reason = if poisoned.contains(&token) {
                    "failed or skipped"
                } else {
                    "unpolled"
                };
                report.warn(format!(
                    "chunk {} skipped: references '{}' declared by a {} chunk",
                    chunk.index, token, reason
                ));
                poisoned.extend(chunk.declared_temp_ids());
                report.skipped_chunks.push(chunk.index);
                report.chunks.push(ChunkOutcome::new(chunk.index));
                continue;
            }

            let (outcome, failure) = self.run_chunk(chunk, &index, &mut ids, &mut report).await;
            match outcome.status {
                ChunkStatus::Submitted => unpolled.extend(chunk.declared_temp_ids()),
                ChunkStatus::Complete => {}
                _ => poisoned.extend(chunk.declared_temp_ids()),
            }
            report.chunks.push(outcome);

            let Some(failure) = failure else {
                continue;
            };
            if self.config.continue_on_error {
                report.warn(format!("chunk {} failed; continuing", chunk.index));
                continue;
            }

            let error = match failure {
                Failure::Server => {
                    let recovery = self.recovery(chunk, total, &document, &ids, &report).await;
                    let outcome = report.chunks.last().cloned().unwrap_or_else(|| ChunkOutcome::new(chunk.index));
                    OrchestratorError::ChunkFailed {
                        chunk: chunk.index,
                        operation_id: outcome.operation_ids.last().cloned().unwrap_or_default(),
                        message: outcome.error.unwrap_or_default(),
                        detail: outcome.error_detail,
                        recovery: Box::new(recovery),
                    }
                }
                Failure::Timeout(operation_id) => OrchestratorError::Timeout {
                    chunk: chunk.index,
                    operation_id,
                },
                Failure::Transport(e) => OrchestratorError::Transport(e),
                Failure::Connection(e) => OrchestratorError::Connection(e),
            };
            if let Err(e) = self.persist(&ids) {
                warn!(error = %e, "tempId map not saved");
            }
            return Err(error);
        }

        self.persist(&ids)?;
        info!(
            chunks = total,
            operations = report.operations(),
            skipped = report.skipped_chunks.len(),
            "run finished"
        );
        report.id_map = ids;
        Ok(report)
    }

    async fn run_chunk(
        &self,
        chunk: &Chunk,
        index: &BatchIndex,
        ids: &mut TempIdMap,
        report: &mut RunReport,
    ) -> (ChunkOutcome, Option<Failure>) {
        let mut outcome = ChunkOutcome::new(chunk.index);
        let mut pending = chunk.changes.clone();
        // flattened position of each pending change
        let mut positions: Vec<usize> = (chunk.offset..chunk.offset + chunk.len()).collect();
        substitute(&mut pending, ids);

        if self.config.cross_validate {
            let checker = ConnectionChecker::new(index, ids, self.transport.as_ref());
            match checker.check(&mut pending, chunk.offset).await {
                Ok(warnings) => report.warnings.extend(warnings),
                Err(e) => {
                    outcome.status = ChunkStatus::Failed;
                    outcome.error = Some(e.to_string());
                    return (outcome, Some(Failure::Connection(e)));
                }
            }
        }

        loop {
            if pending.is_empty() {
                outcome.status = ChunkStatus::Complete;
                return (outcome, None);
            }

            info!(chunk = chunk.index, changes = pending.len(), "submitting chunk");
            let receipt = match submit_with_backoff(self.transport.as_ref(), &pending, &self.config.backoff()).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    outcome.status = ChunkStatus::Failed;
                    outcome.error = Some(e.to_string());
                    return (outcome, Some(Failure::Transport(e)));
                }
            };
            outcome.operation_ids.push(receipt.operation_id.clone());
            outcome.submitted = pending.len();

            if !self.config.poll {
                outcome.status = ChunkStatus::Submitted;
                return (outcome, None);
            }

            let operation = match self.wait(&receipt.operation_id).await {
                Ok(Some(operation)) => operation,
                Ok(None) => {
                    outcome.status = ChunkStatus::TimedOut;
                    outcome.error = Some(format!(
                        "operation {} did not finish within the polling timeout",
                        receipt.operation_id
                    ));
                    return (outcome, Some(Failure::Timeout(receipt.operation_id)));
                }
                Err(e) => {
                    outcome.status = ChunkStatus::Failed;
                    outcome.error = Some(e.to_string());
                    return (outcome, Some(Failure::Transport(e)));
                }
            };

            if operation.status == OperationStatus::Complete {
                for result in operation.result.iter().flatten() {
                    if let Some((temp_id, real_id)) = result.binding() {
                        ids.bind(temp_id, real_id);
                    }
                }
                debug!(chunk = chunk.index, operation_id = %operation.id, bindings = ids.len(), "chunk complete");
                outcome.status = ChunkStatus::Complete;
                return (outcome, None);
            }

            let message = operation.error.clone().unwrap_or_default();
            let is_duplicate = operation
                .error_detail
                .as_ref()
                .is_some_and(|d| d.code == "DUPLICATE");
            if self.config.skip_existing && is_duplicate {
                if let Some(notice) = parse_duplicate(&message).filter(|n| n.index < pending.len()) {
                    let removed = pending.remove(notice.index);
                    let position = positions.remove(notice.index);
                    if let (Some(temp_id), Some(existing)) = (removed.temp_id(), &notice.existing_id) {
                        ids.bind(temp_id, existing.clone());
                    }
                    info!(
                        chunk = chunk.index,
                        change = position,
                        op = %notice.op,
                        existing_id = notice.existing_id.as_deref().unwrap_or("-"),
                        "duplicate skipped"
                    );
                    outcome.duplicates_skipped += 1;
                    substitute(&mut pending, ids);
                    continue;
                }
            }

            outcome.status = ChunkStatus::Failed;
            outcome.failed_change = operation
                .error_detail
                .as_ref()
                .and_then(|d| d.op_number)
                .and_then(|n| positions.get(n).copied());
            outcome.error = Some(message);
            outcome.error_detail = operation.error_detail;
            warn!(chunk = chunk.index, operation_id = %operation.id, "chunk failed");
            return (outcome, Some(Failure::Server));
        }
    }

    /// Poll until the operation is terminal. `Ok(None)` is a timeout.
    async fn wait(&self, operation_id: &str) -> Result<Option<Operation>, TransportError> {
        let interval = self.config.poll_interval();
        let polling = async {
            loop {
                let operation = self.transport.status(operation_id).await?;
                if operation.status.is_terminal() {
                    return Ok::<Operation, TransportError>(operation);
                }
                tokio::time::sleep(interval).await;
            }
        };
        match tokio::time::timeout(self.config.poll_timeout(), polling).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn recovery(
        &self,
        chunk: &Chunk,
        total: usize,
        document: &FlattenedDocument,
        ids: &TempIdMap,
        report: &RunReport,
    ) -> RecoverySnapshot {
        let mut snapshot = RecoverySnapshot::new(chunk.index, total);
        if let Some(outcome) = report.chunks.last() {
            snapshot.operation_id = outcome.operation_ids.last().cloned();
            snapshot.error_detail = outcome.error_detail.clone();
            snapshot.failed_change = outcome.failed_change;
            if let Some(error) = &outcome.error {
                snapshot.diagnostic(error.clone());
            }
            if outcome.duplicates_skipped > 0 {
                snapshot.diagnostic(format!(
                    "{} duplicate(s) were skipped before the failure",
                    outcome.duplicates_skipped
                ));
            }
        }
        match self.transport.model_summary().await {
            Ok(summary) => snapshot.model_summary = Some(summary),
            Err(e) => snapshot.diagnostic(format!("model summary unavailable: {}", e)),
        }
        snapshot.chunks_completed = report
            .chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Complete)
            .count();
        snapshot.bound_temp_ids = ids.len();
        snapshot.unbound_temp_ids = document
            .changes
            .iter()
            .filter_map(Change::temp_id)
            .filter(|t| ids.resolve(t).map_or(true, |id| id == *t))
            .map(str::to_string)
            .collect();
        snapshot
    }

    fn persist(&self, ids: &TempIdMap) -> OrchestratorResult<()> {
        if let Some(path) = &self.config.save_ids {
            ids.save(path)?;
            info!(path = %path.display(), bindings = ids.len(), "tempId map saved");
        }
        Ok(())
    }
}

/// Count changes per op kind, for `check` output
pub fn op_histogram(changes: &[Change]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for change in changes {
        *counts.entry(change.op()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duplicate_with_existing_id() {
        let notice = parse_duplicate(
            "Change 3 (createElement): element 'Db' of type 'node' already exists (id: id-0a1b)",
        )
        .unwrap();
        assert_eq!(notice.index, 3);
        assert_eq!(notice.op, "createElement");
        assert_eq!(notice.existing_id.as_deref(), Some("id-0a1b"));
    }

    #[test]
    fn parses_duplicate_without_existing_id() {
        let notice =
            parse_duplicate("Change 0 (createRelationship): relationship already declared in this batch")
                .unwrap();
        assert_eq!(notice.index, 0);
        assert_eq!(notice.existing_id, None);
    }

    #[test]
    fn unrelated_message_does_not_parse() {
        assert!(parse_duplicate("nothing to undo").is_none());
    }

    #[test]
    fn error_codes_and_origins() {
        let timeout = OrchestratorError::Timeout {
            chunk: 1,
            operation_id: "op-1".into(),
        };
        assert_eq!(timeout.code(), "TIMEOUT");
        assert_eq!(timeout.origin(), Origin::Client);

        let failed = OrchestratorError::ChunkFailed {
            chunk: 0,
            operation_id: "op-2".into(),
            message: "boom".into(),
            detail: Some(ErrorDetail::new("DUPLICATE")),
            recovery: Box::new(RecoverySnapshot::new(0, 1)),
        };
        assert_eq!(failed.code(), "DUPLICATE");
        assert_eq!(failed.origin(), Origin::Server);
        assert!(failed.recovery().is_some());

        let missing = OrchestratorError::IncompleteIdFiles {
            files: vec![IdFileProblem {
                path: PathBuf::from("ids/missing.json"),
                reason: "not found".into(),
            }],
        };
        assert!(missing.to_string().contains("ids/missing.json"));
        assert_eq!(missing.origin().as_str(), "client");
    }
}
