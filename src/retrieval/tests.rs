//! Unit tests for the retrieval core over scripted clients.

use super::*;
use crate::llm::{MockReranker, MockSnippetGenerator};
use crate::test_support::{
    EchoGenerator, HashedEmbeddings, InMemoryVectorIndex, PassthroughReranker,
};
use crate::vector::IndexRecord;
use color_eyre::eyre::{Result, ensure};

const DIM: usize = 16;

fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; DIM];
    for (position, byte) in text.bytes().enumerate() {
        if let Some(slot) = vector.get_mut(position % DIM) {
            *slot += f32::from(byte) / 255.0;
        }
    }
    vector
}

fn record(file_path: &str, text: &str) -> IndexRecord {
    IndexRecord {
        workspace_id: "ws1".to_owned(),
        file_path: file_path.to_owned(),
        text: text.to_owned(),
        vector: embed(text),
    }
}

async fn seeded_index() -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let records = vec![
        record("auth.py", "def login(user): check_password(user)"),
        record("db.py", "def connect(): return pool.acquire()"),
        record("auth.py", "def logout(user): clear_session(user)"),
    ];
    let _ = crate::vector::VectorIndex::insert(index.as_ref(), records).await;
    index
}

fn core_with(index: Arc<InMemoryVectorIndex>) -> RetrievalCore {
    RetrievalCore::new(
        Arc::new(EchoGenerator),
        Arc::new(HashedEmbeddings::new(DIM)),
        index,
        Arc::new(PassthroughReranker),
    )
}

#[tokio::test]
async fn retrieval_returns_ranked_snippets_with_file_paths() -> Result<()> {
    let core = core_with(seeded_index().await);
    let snippets = core.retrieve("how does login work", "ws1").await?;
    ensure!(!snippets.is_empty(), "snippets expected");
    ensure!(
        snippets.iter().all(|s| !s.file_path.is_empty()),
        "file paths must be preserved"
    );
    Ok(())
}

#[tokio::test]
async fn results_are_deduplicated_by_text() -> Result<()> {
    let core = core_with(seeded_index().await);
    // "login" also matches the keyword search, so the same snippet arrives
    // through both modes.
    let snippets = core.retrieve("login", "ws1").await?;
    let mut texts: Vec<&str> = snippets.iter().map(|s| s.text.as_str()).collect();
    let before = texts.len();
    texts.dedup();
    ensure!(before == texts.len(), "duplicate snippet texts survived");
    Ok(())
}

#[tokio::test]
async fn missing_fts_index_degrades_to_vector_only() -> Result<()> {
    let index = seeded_index().await;
    index.set_fts_available(false);
    let core = core_with(index);
    let snippets = core.retrieve("login", "ws1").await?;
    ensure!(!snippets.is_empty(), "vector results must still be returned");
    Ok(())
}

#[tokio::test]
async fn empty_workspace_returns_no_snippets_without_reranking() -> Result<()> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let mut reranker = MockReranker::new();
    reranker.expect_rerank().times(0);
    let core = RetrievalCore::new(
        Arc::new(EchoGenerator),
        Arc::new(HashedEmbeddings::new(DIM)),
        index,
        Arc::new(reranker),
    );
    let snippets = core.retrieve("anything", "ws-empty").await?;
    ensure!(snippets.is_empty(), "no snippets expected");
    Ok(())
}

#[tokio::test]
async fn generation_failure_propagates() {
    let mut generator = MockSnippetGenerator::new();
    generator.expect_hypothetical_snippet().returning(|_| {
        Err(crate::error::RetrievalError::from(color_eyre::eyre::eyre!(
            "generation unavailable"
        )))
    });
    let core = RetrievalCore::new(
        Arc::new(generator),
        Arc::new(HashedEmbeddings::new(DIM)),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(PassthroughReranker),
    );
    assert!(core.retrieve("q", "ws1").await.is_err());
}

#[test]
fn decisions_know_whether_they_include_code_search() {
    assert!(RetrievalDecision::SearchCodeAndWeb.includes_code_search());
    assert!(RetrievalDecision::SearchCodeOnly.includes_code_search());
    assert!(!RetrievalDecision::SearchWebOnly.includes_code_search());
    assert!(!RetrievalDecision::NoRetrieval.includes_code_search());
}

#[test]
fn formatted_snippets_cite_their_files() {
    let snippets = vec![
        Snippet {
            file_path: "auth.py".to_owned(),
            text: "def login(): ...".to_owned(),
        },
        Snippet {
            file_path: "db.py".to_owned(),
            text: "def connect(): ...".to_owned(),
        },
    ];
    let rendered = format_snippets(&snippets);
    assert!(rendered.contains("Snippet 1 from 'auth.py'"));
    assert!(rendered.contains("Snippet 2 from 'db.py'"));
    assert!(rendered.contains("\n\n---\n\n"));
}

#[test]
fn empty_result_set_renders_the_no_results_message() {
    assert_eq!(
        format_snippets(&[]),
        "No relevant code snippets found in the codebase for your query."
    );
}
