//! Asynchronous code-execution worker.
//!
//! The service consumes push-delivered tasks, advances each job through a
//! strictly ordered state machine in the metadata store, materialises the
//! execution environment (inline snippet or downloaded workspace), runs the
//! user program under kernel resource limits with a wall-clock deadline, and
//! durably commits the classified result. Two sibling pipelines share the
//! same stores: workspace indexing into a vector index and hybrid
//! (vector + keyword) retrieval with reranking.
//!
//! The substitution points — [`job::store::JobStore`],
//! [`storage::ObjectStore`], [`vector::VectorIndex`], and the clients in
//! [`llm`] — are traits with one production backend each; in-memory doubles
//! live in [`test_support`].

use color_eyre::eyre::{Context as _, Result};
use ortho_config::OrthoConfig as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod index;
pub mod job;
pub mod llm;
mod observability;
pub mod query;
pub mod registry;
pub mod retrieval;
pub mod sandbox;
pub mod server;
pub mod storage;
pub mod test_support;
pub mod vector;
pub mod workspace;

pub use config::WorkerCfg;
pub use registry::Dependencies;

use crate::observability::LOG_TARGET;

/// Entrypoint for the service binary: loads configuration, initialises the
/// process-wide clients, and serves the task endpoints.
///
/// # Errors
///
/// Returns an error when configuration is incomplete, a backend cannot be
/// prepared at startup, or the listener cannot be bound; the process exits
/// instead of serving with missing clients.
pub fn run() -> Result<()> {
    color_eyre::install()?;
    let cfg = WorkerCfg::load().context("failed to load configuration via OrthoConfig")?;

    let filter = EnvFilter::try_new(cfg.log_level())
        .context("WORKER_LOG_LEVEL is not a valid filter directive")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;
    runtime.block_on(serve(cfg))
}

async fn serve(cfg: WorkerCfg) -> Result<()> {
    let port = cfg.port();
    let deps = registry::initialise(cfg)
        .await
        .context("failed to initialise process-wide clients")?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(
        target: LOG_TARGET,
        port,
        project_id = deps.cfg.project_id.as_deref(),
        collection = deps.cfg.jobs_collection(),
        "worker service listening"
    );
    axum::serve(listener, server::router(std::sync::Arc::new(deps)))
        .await
        .context("server terminated")
}
