//! Unit tests for the query service over scripted clients.

use super::*;
use crate::test_support::{
    EchoGenerator, FixedPlanner, HashedEmbeddings, InMemoryJobStore, InMemoryVectorIndex,
    PassthroughReranker,
};
use crate::vector::{IndexRecord, VectorIndex};
use color_eyre::eyre::{Result, ensure, eyre};

const DIM: usize = 16;

async fn service_with(decision: RetrievalDecision) -> (Arc<InMemoryJobStore>, QueryService) {
    let jobs = Arc::new(InMemoryJobStore::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let embeddings = Arc::new(HashedEmbeddings::new(DIM));
    let mut vector = vec![0.0_f32; DIM];
    for (position, byte) in "def login(): pass".bytes().enumerate() {
        if let Some(slot) = vector.get_mut(position % DIM) {
            *slot += f32::from(byte) / 255.0;
        }
    }
    let _ = index
        .insert(vec![IndexRecord {
            workspace_id: "ws1".to_owned(),
            file_path: "auth.py".to_owned(),
            text: "def login(): pass".to_owned(),
            vector,
        }])
        .await;
    let retrieval = RetrievalCore::new(
        Arc::new(EchoGenerator),
        embeddings,
        index,
        Arc::new(PassthroughReranker),
    );
    let service = QueryService::new(
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::new(FixedPlanner(decision)),
        retrieval,
    );
    (jobs, service)
}

fn payload(job_id: &str) -> QueryTaskPayload {
    QueryTaskPayload {
        job_id: job_id.to_owned(),
        user_id: "u1".to_owned(),
        workspace_id: "ws1".to_owned(),
        query: "how does login work".to_owned(),
    }
}

#[tokio::test]
async fn code_search_decision_retrieves_and_completes_the_job() -> Result<()> {
    let (jobs, service) = service_with(RetrievalDecision::SearchCodeOnly).await;
    jobs.seed_queued("q1");

    let (disposition, reply) = service.handle(payload("q1")).await;
    ensure!(
        matches!(disposition, TaskDisposition::Processed { .. }),
        "got {disposition:?}"
    );
    let reply = reply.ok_or_else(|| eyre!("reply expected"))?;
    ensure!(reply.decision == RetrievalDecision::SearchCodeOnly, "decision");
    ensure!(!reply.snippets.is_empty(), "snippets expected");

    let doc = jobs.document("q1").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Completed, "status {:?}", doc.status);
    ensure!(
        doc.output.as_deref().is_some_and(|o| o.contains("auth.py")),
        "output cites the source file"
    );
    Ok(())
}

#[tokio::test]
async fn no_retrieval_decision_skips_code_search() -> Result<()> {
    let (jobs, service) = service_with(RetrievalDecision::NoRetrieval).await;
    jobs.seed_queued("q2");

    let (disposition, reply) = service.handle(payload("q2")).await;
    ensure!(
        matches!(disposition, TaskDisposition::Processed { .. }),
        "got {disposition:?}"
    );
    let reply = reply.ok_or_else(|| eyre!("reply expected"))?;
    ensure!(reply.snippets.is_empty(), "no snippets expected");

    let doc = jobs.document("q2").ok_or_else(|| eyre!("doc missing"))?;
    ensure!(doc.status == JobStatus::Completed, "status");
    Ok(())
}

#[tokio::test]
async fn replayed_terminal_query_short_circuits() -> Result<()> {
    let (jobs, service) = service_with(RetrievalDecision::SearchCodeOnly).await;
    jobs.seed_queued("q3");

    let (first, _) = service.handle(payload("q3")).await;
    ensure!(matches!(first, TaskDisposition::Processed { .. }), "first run");
    let (second, reply) = service.handle(payload("q3")).await;
    ensure!(
        second == TaskDisposition::AlreadyTerminal { job_id: "q3".to_owned() },
        "got {second:?}"
    );
    ensure!(reply.is_none(), "no reply on replay");
    Ok(())
}
