//! End-to-end pipeline test: scan real files, chunk, embed with a
//! deterministic stand-in, build the index, persist, reload, and query
//! through the conversational retriever.

use std::fs;
use std::sync::Mutex;

use repoquery::RepoQueryError;
use repoquery::config::{Config, ProjectConfig};
use repoquery::embeddings::Embedder;
use repoquery::index::{HnswIndex, Metric};
use repoquery::indexer::IndexBuilder;
use repoquery::llm::{ChatMessage, ChatModel, TokenStream};
use repoquery::retriever::{ChatHistory, ConversationalRetriever, TurnPhase};
use repoquery::scanner::FileSystemSource;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Identity-hash embedder: the same text always maps to the same vector.
struct HashEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 4];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % 4] += f32::from(byte);
    }
    vector
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> repoquery::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

struct ScriptedChat {
    tokens: Vec<String>,
    fail_streams: Mutex<usize>,
}

impl ScriptedChat {
    fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            fail_streams: Mutex::new(0),
        }
    }
}

impl ChatModel for ScriptedChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> repoquery::Result<String> {
        Ok("standalone question".to_string())
    }

    async fn stream_chat(&self, _messages: &[ChatMessage]) -> repoquery::Result<TokenStream> {
        let mut items: Vec<repoquery::Result<String>> =
            self.tokens.iter().cloned().map(Ok).collect();
        let mut failures = self.fail_streams.lock().expect("lock");
        if *failures > 0 {
            *failures -= 1;
            items.push(Err(RepoQueryError::Generation("stream failed".to_string())));
        }
        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

fn pipeline_config() -> Config {
    let mut config = Config::default();
    config.chunking.chunk_size = 10;
    config.chunking.chunk_overlap = 2;
    config.openai.batch_size = 4;
    config.openai.embedding_dimension = 4;
    config.index.metric = Metric::Euclidean;
    config.project = ProjectConfig {
        name: "tinyrepo".to_string(),
        repository_url: "https://example.com/tinyrepo".to_string(),
        ..ProjectConfig::default()
    };
    config
}

fn build_tiny_index(repo: &TempDir, out: &TempDir) -> HnswIndex {
    fs::write(repo.path().join("a.txt"), "alpha beta gamma").expect("write a.txt");
    fs::write(repo.path().join("b.txt"), "delta epsilon").expect("write b.txt");

    let config = pipeline_config();
    let output = out.path().join("index");
    let stats = IndexBuilder::new(&config, HashEmbedder)
        .build(&FileSystemSource::new(repo.path()), &output, |_| {})
        .expect("build");

    assert_eq!(stats.documents, 2);
    assert!(stats.chunks > 2, "both files must split into several chunks");
    assert_eq!(stats.chunks, stats.embeddings);

    HnswIndex::load(&output).expect("load")
}

#[test]
fn chunks_are_bounded_and_the_alpha_chunk_is_retrievable() {
    let repo = TempDir::new().expect("repo dir");
    let out = TempDir::new().expect("out dir");
    let index = build_tiny_index(&repo, &out);

    // The chunker emitted sub-10-char chunks; the k-NN query for the
    // embedding of the chunk holding "alpha" returns that chunk first.
    let hits = index.search(&embed_text("alpha "), 1).expect("search");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content.contains("alpha"));
    assert_eq!(hits[0].metadata.source_path, "a.txt");
    assert!(hits[0].content.chars().count() <= 10);
}

#[tokio::test]
async fn conversational_session_over_a_loaded_index() {
    let repo = TempDir::new().expect("repo dir");
    let out = TempDir::new().expect("out dir");
    let index = build_tiny_index(&repo, &out);

    let config = pipeline_config();
    let chat = ScriptedChat::new(&["The ", "alpha ", "chunk."]);
    let mut retriever =
        ConversationalRetriever::new(&index, HashEmbedder, chat, config.project.clone());
    let mut history = ChatHistory::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // First turn: empty history, streamed tokens, one history entry.
    let answer = retriever
        .answer("what is alpha?", &mut history, &tx)
        .await
        .expect("first turn");
    assert_eq!(answer, "The alpha chunk.");
    assert_eq!(retriever.phase(), TurnPhase::Completed);
    assert_eq!(history.len(), 1);

    let mut streamed = Vec::new();
    while let Ok(token) = rx.try_recv() {
        streamed.push(token);
    }
    assert_eq!(streamed, vec!["The ", "alpha ", "chunk."]);

    // Second turn: history is consulted and grows by exactly one.
    retriever
        .answer("tell me more", &mut history, &tx)
        .await
        .expect("second turn");
    assert_eq!(history.len(), 2);
    assert_eq!(history.turns()[1].question, "tell me more");
}

#[tokio::test]
async fn failed_turn_keeps_the_session_alive() {
    let repo = TempDir::new().expect("repo dir");
    let out = TempDir::new().expect("out dir");
    let index = build_tiny_index(&repo, &out);

    let config = pipeline_config();
    let chat = ScriptedChat::new(&["partial "]);
    *chat.fail_streams.lock().expect("lock") = 1;
    let mut retriever =
        ConversationalRetriever::new(&index, HashEmbedder, chat, config.project.clone());
    let mut history = ChatHistory::new();
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = retriever
        .answer("doomed", &mut history, &tx)
        .await
        .expect_err("turn must fail");
    assert!(matches!(err, RepoQueryError::Generation(_)));
    assert_eq!(retriever.phase(), TurnPhase::Failed);
    assert_eq!(history.len(), 0);

    retriever
        .answer("recovered", &mut history, &tx)
        .await
        .expect("next turn succeeds");
    assert_eq!(history.len(), 1);
}
