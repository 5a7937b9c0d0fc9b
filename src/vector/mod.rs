//! Vector store for workspace code snippets.
//!
//! [`VectorIndex`] is the substitution point between the indexing/retrieval
//! pipelines and the vector backend. The production implementation keeps
//! rows `{vector(d), text, file_path, workspace_id}` in PostgreSQL with the
//! pgvector extension; keyword search runs against a GIN full-text index on
//! `text` whose creation is idempotent and whose absence degrades retrieval
//! to vector-only results.

use async_trait::async_trait;
use color_eyre::eyre::{Report, eyre};
use pgvector::Vector;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::observability::LOG_TARGET;

/// One row of the snippet index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Workspace the snippet belongs to.
    pub workspace_id: String,
    /// Path of the source file within the workspace.
    pub file_path: String,
    /// The chunk text.
    pub text: String,
    /// Embedding of the chunk; length equals the model dimension.
    pub vector: Vec<f32>,
}

/// A retrieved snippet with its source file preserved.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Snippet {
    /// Path of the source file within the workspace.
    pub file_path: String,
    /// The chunk text.
    pub text: String,
}

/// Store operations needed by the indexing worker and the retrieval core.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Removes every row for `(workspace_id, file_path)`. Deleting absent
    /// rows is not an error.
    async fn delete_file(&self, workspace_id: &str, file_path: &str) -> IndexResult<()>;

    /// Inserts new rows.
    async fn insert(&self, records: Vec<IndexRecord>) -> IndexResult<()>;

    /// Nearest-neighbour search within one workspace.
    async fn vector_search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> IndexResult<Vec<Snippet>>;

    /// Keyword (full-text) search within one workspace. Callers must treat
    /// a failure as a degraded mode, not a fatal error.
    async fn keyword_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
    ) -> IndexResult<Vec<Snippet>>;

    /// Ensures the full-text index on `text` exists; creation is
    /// idempotent. A failure here must not fail an indexing job.
    async fn ensure_fts_index(&self) -> IndexResult<()>;
}

const SNIPPET_TABLE: &str = "code_snippets";

/// PostgreSQL + pgvector [`VectorIndex`].
pub struct PgVectorIndex {
    client: Mutex<Client>,
}

impl PgVectorIndex {
    /// Connects and ensures the extension and snippet table exist for the
    /// configured embedding dimension.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] when the database is unreachable or the
    /// schema cannot be prepared.
    pub async fn connect(database_url: &str, dimension: usize) -> IndexResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(target: LOG_TARGET, error = %err, "vector store connection closed");
            }
        });

        client
            .batch_execute(&format!(
                "CREATE EXTENSION IF NOT EXISTS vector;
                 CREATE TABLE IF NOT EXISTS {SNIPPET_TABLE} (
                     id BIGSERIAL PRIMARY KEY,
                     workspace_id TEXT NOT NULL,
                     file_path TEXT NOT NULL,
                     text TEXT NOT NULL,
                     vector vector({dimension}) NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS {SNIPPET_TABLE}_by_file
                     ON {SNIPPET_TABLE} (workspace_id, file_path);"
            ))
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn delete_file(&self, workspace_id: &str, file_path: &str) -> IndexResult<()> {
        let client = self.client.lock().await;
        let statement = format!(
            "DELETE FROM {SNIPPET_TABLE} WHERE workspace_id = $1 AND file_path = $2"
        );
        let deleted = client
            .execute(statement.as_str(), &[&workspace_id, &file_path])
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        debug!(target: LOG_TARGET, workspace_id, file_path, deleted, "stale snippet rows removed");
        Ok(())
    }

    async fn insert(&self, records: Vec<IndexRecord>) -> IndexResult<()> {
        let client = self.client.lock().await;
        let statement = format!(
            "INSERT INTO {SNIPPET_TABLE} (workspace_id, file_path, text, vector)
             VALUES ($1, $2, $3, $4)"
        );
        for record in records {
            let vector = Vector::from(record.vector);
            client
                .execute(
                    statement.as_str(),
                    &[
                        &record.workspace_id,
                        &record.file_path,
                        &record.text,
                        &vector,
                    ],
                )
                .await
                .map_err(|err| IndexError::from(Report::new(err)))?;
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> IndexResult<Vec<Snippet>> {
        let client = self.client.lock().await;
        let probe = Vector::from(vector.to_vec());
        let limit = i64::try_from(limit).map_err(|_| IndexError::from(eyre!("limit too large")))?;
        let statement = format!(
            "SELECT file_path, text FROM {SNIPPET_TABLE}
             WHERE workspace_id = $1
             ORDER BY vector <=> $2
             LIMIT $3"
        );
        let rows = client
            .query(statement.as_str(), &[&workspace_id, &probe, &limit])
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        Ok(rows
            .into_iter()
            .map(|row| Snippet {
                file_path: row.get(0),
                text: row.get(1),
            })
            .collect())
    }

    async fn keyword_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
    ) -> IndexResult<Vec<Snippet>> {
        let client = self.client.lock().await;
        let limit = i64::try_from(limit).map_err(|_| IndexError::from(eyre!("limit too large")))?;
        let statement = format!(
            "SELECT file_path, text FROM {SNIPPET_TABLE}
             WHERE workspace_id = $1
               AND to_tsvector('english', text) @@ plainto_tsquery('english', $2)
             LIMIT $3"
        );
        let rows = client
            .query(statement.as_str(), &[&workspace_id, &query, &limit])
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        Ok(rows
            .into_iter()
            .map(|row| Snippet {
                file_path: row.get(0),
                text: row.get(1),
            })
            .collect())
    }

    async fn ensure_fts_index(&self) -> IndexResult<()> {
        let client = self.client.lock().await;
        let statement = format!(
            "CREATE INDEX IF NOT EXISTS {SNIPPET_TABLE}_text_fts
             ON {SNIPPET_TABLE} USING GIN (to_tsvector('english', text))"
        );
        client
            .execute(statement.as_str(), &[])
            .await
            .map_err(|err| IndexError::from(Report::new(err)))?;
        Ok(())
    }
}
