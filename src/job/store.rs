//! Durable job-document store.
//!
//! [`JobStore`] is the substitution point between the worker and the
//! metadata backend. Exactly one production backend is provided: PostgreSQL,
//! holding one JSONB document per job in a table named after the configured
//! collection. Every advancement is a single transaction — the document row
//! is locked, [`crate::job::apply`] validates and mutates it, and the row is
//! written back — so concurrent workers for the same job can never interleave
//! partial states.

use async_trait::async_trait;
use color_eyre::eyre::{Report, eyre};
use tokio::sync::Mutex;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::clock;
use crate::error::{StoreError, StoreResult};
use crate::job::{self, JobDocument, JobStatus, StatusChange};
use crate::observability::LOG_TARGET;

/// Transactional access to job documents.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reads the current status of a job, `None` when no document exists.
    async fn status(&self, job_id: &str) -> StoreResult<Option<JobStatus>>;

    /// Advances a job through one status change in a single transaction.
    async fn advance(&self, job_id: &str, change: StatusChange) -> StoreResult<()>;
}

/// PostgreSQL-backed [`JobStore`], one JSONB document per job.
pub struct PostgresJobStore {
    client: Mutex<Client>,
    table: String,
}

impl PostgresJobStore {
    /// Connects to the database and ensures the collection table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the database cannot be
    /// reached and [`StoreError::Backend`] when the collection name is not a
    /// valid identifier or the table cannot be created.
    pub async fn connect(database_url: &str, collection: &str) -> StoreResult<Self> {
        let table = validate_collection_name(collection)?;
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|err| StoreError::Unavailable(Report::new(err)))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(target: LOG_TARGET, error = %err, "metadata store connection closed");
            }
        });

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (job_id TEXT PRIMARY KEY, doc JSONB NOT NULL)"
        );
        client.execute(ddl.as_str(), &[]).await.map_err(classify)?;
        Ok(Self {
            client: Mutex::new(client),
            table,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn status(&self, job_id: &str) -> StoreResult<Option<JobStatus>> {
        let client = self.client.lock().await;
        let query = format!("SELECT doc->>'status' FROM {} WHERE job_id = $1", self.table);
        let row = client
            .query_opt(query.as_str(), &[&job_id])
            .await
            .map_err(classify)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get(0);
        JobStatus::parse(&raw)
            .map(Some)
            .ok_or_else(|| StoreError::Backend(eyre!("job '{job_id}' holds unknown status '{raw}'")))
    }

    async fn advance(&self, job_id: &str, change: StatusChange) -> StoreResult<()> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await.map_err(classify)?;

        let select = format!("SELECT doc FROM {} WHERE job_id = $1 FOR UPDATE", self.table);
        let row = transaction
            .query_opt(select.as_str(), &[&job_id])
            .await
            .map_err(classify)?;
        let Some(row) = row else {
            return Err(StoreError::MissingJob {
                job_id: job_id.to_owned(),
            });
        };

        let Json(mut doc): Json<JobDocument> = row.get(0);
        job::apply(&mut doc, &change, &clock::now_iso8601())?;

        let update = format!("UPDATE {} SET doc = $2 WHERE job_id = $1", self.table);
        transaction
            .execute(update.as_str(), &[&job_id, &Json(&doc)])
            .await
            .map_err(classify)?;
        transaction.commit().await.map_err(classify)?;

        debug!(
            target: LOG_TARGET,
            job_id,
            status = change.target().as_str(),
            "job status advanced"
        );
        Ok(())
    }
}

/// Maps a driver error onto the store error taxonomy: connection loss is
/// recoverable unavailability, everything else is a failed write.
fn classify(err: tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        StoreError::Unavailable(Report::new(err))
    } else {
        StoreError::Backend(Report::new(err))
    }
}

/// Collection names are interpolated into SQL, so they are restricted to
/// identifier characters.
fn validate_collection_name(collection: &str) -> StoreResult<String> {
    let valid = !collection.is_empty()
        && !collection.starts_with(|c: char| c.is_ascii_digit())
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(collection.to_owned())
    } else {
        Err(StoreError::Backend(eyre!(
            "'{collection}' is not a valid collection name"
        )))
    }
}
