//! Test doubles for the worker's substitution points.
//!
//! Shipped as a library module so integration tests (and downstream
//! consumers embedding the worker) can assemble the pipelines without a
//! database, an object store, or network access. The in-memory job store
//! runs the same [`crate::job::apply`] function as the production backend,
//! so the transition rules exercised here are the real ones.

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::clock;
use crate::error::{
    IndexResult, RetrievalResult, StorageError, StorageResult, StoreError, StoreResult,
};
use crate::job::store::JobStore;
use crate::job::{self, JobDocument, JobStatus, StatusChange};
use crate::llm::{EmbeddingClient, Reranker, RetrievalPlanner, SnippetGenerator};
use crate::retrieval::RetrievalDecision;
use crate::sandbox::{CodeRunner, ExecRequest, ExecutionOutcome};
use crate::storage::ObjectStore;
use crate::vector::{IndexRecord, Snippet, VectorIndex};

/// Returns whether the hosted interpreter is installed; tests that need a
/// live child process skip (with a log line) when it is not.
#[must_use]
pub fn interpreter_available() -> bool {
    Command::new(crate::sandbox::INTERPRETER)
        .arg("--version")
        .output()
        .is_ok()
}

/// In-memory [`JobStore`] applying the production transition rules.
#[derive(Default)]
pub struct InMemoryJobStore {
    docs: DashMap<String, JobDocument>,
    fail_status_writes: AtomicBool,
    fail_terminal_writes: AtomicBool,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a job document in the `queued` state, as the enqueuer would.
    pub fn seed_queued(&self, job_id: &str) {
        self.docs.insert(job_id.to_owned(), JobDocument::queued());
    }

    /// Returns a copy of a job document.
    #[must_use]
    pub fn document(&self, job_id: &str) -> Option<JobDocument> {
        self.docs.get(job_id).map(|doc| doc.clone())
    }

    /// Makes subsequent non-terminal writes fail as backend errors.
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent terminal writes fail as backend errors.
    pub fn fail_terminal_writes(&self, fail: bool) {
        self.fail_terminal_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn status(&self, job_id: &str) -> StoreResult<Option<JobStatus>> {
        Ok(self.docs.get(job_id).map(|doc| doc.status))
    }

    async fn advance(&self, job_id: &str, change: StatusChange) -> StoreResult<()> {
        let terminal = change.target().is_terminal();
        if terminal && self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(eyre!("injected terminal write failure")));
        }
        if !terminal && self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(eyre!("injected status write failure")));
        }
        let mut doc = self
            .docs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::MissingJob {
                job_id: job_id.to_owned(),
            })?;
        job::apply(&mut doc, &change, &clock::now_iso8601())?;
        Ok(())
    }
}

/// In-memory [`ObjectStore`] keyed by `(bucket, key)`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), Vec<u8>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object.
    pub fn put(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .insert((bucket.to_owned(), key.to_owned()), bytes.to_vec());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|bytes| bytes.clone())
            .ok_or_else(|| StorageError::Fetch {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source: eyre!("no such object"),
            })
    }
}

/// Scripted [`CodeRunner`] returning queued outcomes and counting calls.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    /// Creates a runner with no scripted outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next outcome to return.
    pub fn push(&self, outcome: ExecutionOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    /// Number of times the runner was invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn run(&self, _request: ExecRequest) -> ExecutionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| ExecutionOutcome::internal("no scripted outcome queued"))
    }
}

/// In-memory [`VectorIndex`] scoring by cosine similarity, with a switch to
/// simulate a missing full-text index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    rows: Mutex<Vec<IndexRecord>>,
    fts_available: AtomicBool,
    fts_ensured: AtomicBool,
}

impl InMemoryVectorIndex {
    /// Creates an empty index with keyword search available.
    #[must_use]
    pub fn new() -> Self {
        let index = Self::default();
        index.fts_available.store(true, Ordering::SeqCst);
        index
    }

    /// Toggles keyword-search availability.
    pub fn set_fts_available(&self, available: bool) {
        self.fts_available.store(available, Ordering::SeqCst);
    }

    /// Whether [`VectorIndex::ensure_fts_index`] has been called.
    #[must_use]
    pub fn fts_ensured(&self) -> bool {
        self.fts_ensured.load(Ordering::SeqCst)
    }

    /// Copies out all rows for one workspace.
    #[must_use]
    pub fn rows_for(&self, workspace_id: &str) -> Vec<IndexRecord> {
        self.rows
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.workspace_id == workspace_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn delete_file(&self, workspace_id: &str, file_path: &str) -> IndexResult<()> {
        if let Ok(mut rows) = self.rows.lock() {
            rows.retain(|row| !(row.workspace_id == workspace_id && row.file_path == file_path));
        }
        Ok(())
    }

    async fn insert(&self, records: Vec<IndexRecord>) -> IndexResult<()> {
        if let Ok(mut rows) = self.rows.lock() {
            rows.extend(records);
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> IndexResult<Vec<Snippet>> {
        let mut scored: Vec<(f32, Snippet)> = self
            .rows
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.workspace_id == workspace_id)
                    .map(|row| {
                        (
                            cosine(&row.vector, vector),
                            Snippet {
                                file_path: row.file_path.clone(),
                                text: row.text.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, snippet)| snippet)
            .collect())
    }

    async fn keyword_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
    ) -> IndexResult<Vec<Snippet>> {
        if !self.fts_available.load(Ordering::SeqCst) {
            return Err(crate::error::IndexError::from(eyre!(
                "full-text index missing"
            )));
        }
        let needle = query.to_ascii_lowercase();
        Ok(self
            .rows
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.workspace_id == workspace_id
                            && row.text.to_ascii_lowercase().contains(&needle)
                    })
                    .take(limit)
                    .map(|row| Snippet {
                        file_path: row.file_path.clone(),
                        text: row.text.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ensure_fts_index(&self) -> IndexResult<()> {
        self.fts_ensured.store(true, Ordering::SeqCst);
        if self.fts_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(crate::error::IndexError::from(eyre!(
                "full-text index creation refused"
            )))
        }
    }
}

/// Deterministic [`EmbeddingClient`] deriving vectors from byte content.
pub struct HashedEmbeddings {
    dimension: usize,
}

impl HashedEmbeddings {
    /// Creates a client producing vectors of the given dimension.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for (position, byte) in text.bytes().enumerate() {
            if let Some(slot) = vector.get_mut(position % self.dimension) {
                *slot += f32::from(byte) / 255.0;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashedEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// [`SnippetGenerator`] echoing a canned hypothetical snippet.
pub struct EchoGenerator;

#[async_trait]
impl SnippetGenerator for EchoGenerator {
    async fn hypothetical_snippet(&self, query: &str) -> RetrievalResult<String> {
        Ok(format!("def answer():\n    # {query}\n    pass"))
    }
}

/// [`RetrievalPlanner`] returning a fixed decision.
pub struct FixedPlanner(pub RetrievalDecision);

#[async_trait]
impl RetrievalPlanner for FixedPlanner {
    async fn plan(&self, _query: &str) -> RetrievalResult<RetrievalDecision> {
        Ok(self.0)
    }
}

/// [`Reranker`] preserving candidate order and truncating to `top_n`.
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: &[Snippet],
        top_n: usize,
    ) -> RetrievalResult<Vec<Snippet>> {
        Ok(candidates.iter().take(top_n).cloned().collect())
    }
}
