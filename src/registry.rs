//! Process-wide client registry.
//!
//! Every external client (metadata store, object store, vector index,
//! embedding/generation/rerank clients, sandbox runner) is initialised once
//! at startup and shared by reference. There are no lazily-rebound globals:
//! when initialisation fails the service refuses work instead of limping
//! along with missing clients.

use std::sync::Arc;

use crate::config::WorkerCfg;
use crate::error::Result;
use crate::handler::TaskHandler;
use crate::index::IndexingWorker;
use crate::job::store::{JobStore, PostgresJobStore};
use crate::llm::{
    CohereReranker, EmbeddingClient, GeminiEmbeddings, GeminiGenerator, Reranker,
    RetrievalPlanner, SnippetGenerator,
};
use crate::query::QueryService;
use crate::retrieval::RetrievalCore;
use crate::sandbox::{CodeRunner, SandboxRunner};
use crate::storage::{ObjectStore, R2Store};
use crate::vector::{PgVectorIndex, VectorIndex};

/// The assembled pipelines plus the configuration they were built from.
pub struct Dependencies {
    /// Loaded configuration.
    pub cfg: WorkerCfg,
    /// Execution pipelines coordinator.
    pub handler: TaskHandler,
    /// Indexing pipeline.
    pub indexer: IndexingWorker,
    /// Query pipeline.
    pub query: QueryService,
}

/// Raw substitution-point clients used to assemble [`Dependencies`].
pub struct Clients {
    /// Metadata store.
    pub jobs: Arc<dyn JobStore>,
    /// Object store.
    pub objects: Arc<dyn ObjectStore>,
    /// Vector index.
    pub vectors: Arc<dyn VectorIndex>,
    /// Embedding client.
    pub embeddings: Arc<dyn EmbeddingClient>,
    /// Hypothetical-snippet generator.
    pub generator: Arc<dyn SnippetGenerator>,
    /// Retrieval planner.
    pub planner: Arc<dyn RetrievalPlanner>,
    /// Reranker.
    pub reranker: Arc<dyn Reranker>,
    /// Sandbox runner.
    pub runner: Arc<dyn CodeRunner>,
    /// Bucket holding workspace objects for the indexer.
    pub index_bucket: String,
}

/// Builds the production clients and assembles the pipelines.
///
/// # Errors
///
/// Returns an [`crate::error::Error`] when required configuration is
/// missing or a backend cannot be prepared; the caller is expected to
/// refuse work.
pub async fn initialise(cfg: WorkerCfg) -> Result<Dependencies> {
    let database_url = cfg.require_database_url()?.to_owned();
    let jobs: Arc<dyn JobStore> =
        Arc::new(PostgresJobStore::connect(&database_url, cfg.jobs_collection()).await?);
    let vectors: Arc<dyn VectorIndex> =
        Arc::new(PgVectorIndex::connect(&database_url, cfg.embedding_dim()).await?);

    let objects: Arc<dyn ObjectStore> = Arc::new(R2Store::new(cfg.require_r2_credentials()?));
    let index_bucket = cfg.require_index_bucket()?.to_owned();

    let http = reqwest::Client::new();
    let google_api_key = cfg.require_google_api_key()?;
    let embeddings: Arc<dyn EmbeddingClient> = Arc::new(GeminiEmbeddings::new(
        http.clone(),
        google_api_key.clone(),
        cfg.embedding_model(),
        cfg.embedding_dim(),
    ));
    let generation = Arc::new(GeminiGenerator::new(
        http.clone(),
        google_api_key,
        cfg.generation_model(),
    ));
    let generator: Arc<dyn SnippetGenerator> = Arc::clone(&generation) as _;
    let planner: Arc<dyn RetrievalPlanner> = generation as _;
    let reranker: Arc<dyn Reranker> = Arc::new(CohereReranker::new(http, cfg.require_cohere_api_key()?));

    let clients = Clients {
        jobs,
        objects,
        vectors,
        embeddings,
        generator,
        planner,
        reranker,
        runner: Arc::new(SandboxRunner),
        index_bucket,
    };
    Ok(assemble(cfg, clients))
}

/// Assembles the pipelines from explicit clients; tests use this with the
/// in-memory doubles from [`crate::test_support`].
#[must_use]
pub fn assemble(cfg: WorkerCfg, clients: Clients) -> Dependencies {
    let handler = TaskHandler::new(
        Arc::clone(&clients.jobs),
        Arc::clone(&clients.objects),
        Arc::clone(&clients.runner),
        cfg.direct_timeout(),
        cfg.workspace_timeout(),
        cfg.task_deadline(),
    )
    .with_limits(cfg.resource_limits());
    let indexer = IndexingWorker::new(
        Arc::clone(&clients.jobs),
        Arc::clone(&clients.objects),
        Arc::clone(&clients.vectors),
        Arc::clone(&clients.embeddings),
        clients.index_bucket,
    );
    let retrieval = RetrievalCore::new(
        clients.generator,
        clients.embeddings,
        clients.vectors,
        clients.reranker,
    );
    let query = QueryService::new(clients.jobs, clients.planner, retrieval);
    Dependencies {
        cfg,
        handler,
        indexer,
        query,
    }
}
