//! Live end-to-end scenarios against a real `python3` interpreter, skipped
//! with a log line when it is not installed.

use std::sync::Arc;

use code_exec_worker::WorkerCfg;
use code_exec_worker::handler::{DirectTaskPayload, TaskDisposition, WorkspaceTaskPayload};
use code_exec_worker::job::{FailureType, JobStatus};
use code_exec_worker::registry::{self, Clients, Dependencies};
use code_exec_worker::retrieval::RetrievalDecision;
use code_exec_worker::sandbox::SandboxRunner;
use code_exec_worker::test_support::{
    EchoGenerator, FixedPlanner, HashedEmbeddings, InMemoryJobStore, InMemoryObjectStore,
    InMemoryVectorIndex, PassthroughReranker, interpreter_available,
};
use code_exec_worker::workspace::ManifestEntry;
use color_eyre::eyre::{Result, ensure, eyre};
use serial_test::serial;

struct World {
    jobs: Arc<InMemoryJobStore>,
    objects: Arc<InMemoryObjectStore>,
    deps: Dependencies,
}

fn world(execution_timeout_secs: u64) -> World {
    let jobs = Arc::new(InMemoryJobStore::new());
    let objects = Arc::new(InMemoryObjectStore::new());
    let cfg = WorkerCfg {
        execution_timeout_secs: Some(execution_timeout_secs),
        workspace_timeout_secs: Some(execution_timeout_secs.max(10)),
        ..WorkerCfg::default()
    };
    let clients = Clients {
        jobs: Arc::clone(&jobs) as _,
        objects: Arc::clone(&objects) as _,
        vectors: Arc::new(InMemoryVectorIndex::new()),
        embeddings: Arc::new(HashedEmbeddings::new(16)),
        generator: Arc::new(EchoGenerator),
        planner: Arc::new(FixedPlanner(RetrievalDecision::SearchCodeOnly)),
        reranker: Arc::new(PassthroughReranker),
        runner: Arc::new(SandboxRunner),
        index_bucket: "bucket".to_owned(),
    };
    let deps = registry::assemble(cfg, clients);
    World { jobs, objects, deps }
}

fn direct(job_id: &str, code: &str, input: Option<&str>) -> DirectTaskPayload {
    DirectTaskPayload {
        job_id: job_id.to_owned(),
        code: code.to_owned(),
        language: "python".to_owned(),
        input: input.map(str::to_owned),
    }
}

#[tokio::test]
#[serial]
async fn live_direct_success() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(10);
    w.jobs.seed_queued("j1");

    let disposition = w
        .deps
        .handler
        .handle_direct(direct("j1", "print('hi')", None))
        .await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j1").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Completed, "status {:?}", doc.status);
    ensure!(doc.output.as_deref() == Some("hi\n"), "output {:?}", doc.output);
    ensure!(doc.error.is_none(), "error null");
    Ok(())
}

#[tokio::test]
#[serial]
async fn live_direct_name_error() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(10);
    w.jobs.seed_queued("j2");

    let disposition = w
        .deps
        .handler
        .handle_direct(direct("j2", "print(x)", None))
        .await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j2").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Failed, "status");
    ensure!(doc.failure_type == Some(FailureType::UserCodeError), "failure_type");
    ensure!(
        doc.error.as_deref().is_some_and(|e| e.contains("NameError")),
        "diagnostic {:?}",
        doc.error
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn live_direct_silent_failure_records_unknown_error() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(10);
    w.jobs.seed_queued("j2b");

    let disposition = w
        .deps
        .handler
        .handle_direct(direct("j2b", "import sys; sys.exit(1)", None))
        .await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j2b").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Failed, "status");
    ensure!(doc.failure_type == Some(FailureType::UserCodeError), "failure_type");
    ensure!(
        doc.error.as_deref() == Some("Unknown error"),
        "diagnostic {:?}",
        doc.error
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn live_direct_timeout() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(1);
    w.jobs.seed_queued("j3");

    let disposition = w
        .deps
        .handler
        .handle_direct(direct("j3", "import time; time.sleep(60)", None))
        .await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j3").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.failure_type == Some(FailureType::Timeout), "failure_type");
    ensure!(
        doc.error.as_deref() == Some("Execution timed out after 1 seconds."),
        "diagnostic {:?}",
        doc.error
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn live_direct_stdin_round_trip() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(10);
    w.jobs.seed_queued("j4");

    let disposition = w
        .deps
        .handler
        .handle_direct(direct(
            "j4",
            "import sys; print(sys.stdin.read().upper().strip())",
            Some("ping"),
        ))
        .await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j4").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.output.as_deref() == Some("PING\n"), "output {:?}", doc.output);
    Ok(())
}

#[tokio::test]
#[serial]
async fn live_workspace_with_package_import() -> Result<()> {
    if !interpreter_available() {
        tracing::warn!("SKIP-SANDBOX: python3 not installed");
        return Ok(());
    }
    let w = world(10);
    w.jobs.seed_queued("j5");
    w.objects
        .put("bucket", "w/a.py", b"import pkg.lib\nprint(pkg.lib.VALUE)\n");
    w.objects.put("bucket", "w/pkg_init.py", b"");
    w.objects.put("bucket", "w/lib.py", b"VALUE = 7\n");

    let payload = WorkspaceTaskPayload {
        job_id: "j5".to_owned(),
        workspace_id: "ws1".to_owned(),
        entrypoint_file: "a.py".to_owned(),
        language: "python".to_owned(),
        input: None,
        r2_bucket_name: "bucket".to_owned(),
        files: vec![
            ManifestEntry {
                r2_object_key: "w/a.py".to_owned(),
                file_path: "a.py".to_owned(),
            },
            ManifestEntry {
                r2_object_key: "w/pkg_init.py".to_owned(),
                file_path: "pkg/__init__.py".to_owned(),
            },
            ManifestEntry {
                r2_object_key: "w/lib.py".to_owned(),
                file_path: "pkg/lib.py".to_owned(),
            },
        ],
    };
    let disposition = w.deps.handler.handle_workspace(payload).await;
    ensure!(matches!(disposition, TaskDisposition::Processed { .. }), "{disposition:?}");

    let doc = w.jobs.document("j5").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Completed, "status {:?}: {:?}", doc.status, doc.error);
    ensure!(doc.output.as_deref() == Some("7\n"), "output {:?}", doc.output);
    Ok(())
}
