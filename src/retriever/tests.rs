use super::*;
use crate::config::ProjectConfig;
use crate::index::{ChunkMetadata, IndexConfig, Metric};
use crate::llm::{ChatMessage, Role, TokenStream};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Deterministic stand-in for the embedding service: the same text always
/// maps to the same 4-dimensional vector.
struct HashEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 4];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % 4] += f32::from(byte);
    }
    vector
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Err(RepoQueryError::Network("embedding service is down".to_string()))
    }
}

/// Scripted generation service that records what it is asked.
struct MockChat {
    condense_reply: String,
    tokens: Vec<String>,
    /// Number of upcoming stream calls that should fail mid-stream.
    fail_streams: Mutex<usize>,
    complete_calls: Mutex<usize>,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockChat {
    fn new(tokens: &[&str]) -> Self {
        Self {
            condense_reply: "standalone question".to_string(),
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            fail_streams: Mutex::new(0),
            complete_calls: Mutex::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(tokens: &[&str]) -> Self {
        let chat = Self::new(tokens);
        *chat.fail_streams.lock().expect("lock") = 1;
        chat
    }

    fn complete_calls(&self) -> usize {
        *self.complete_calls.lock().expect("lock")
    }
}

impl ChatModel for MockChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> crate::Result<String> {
        *self.complete_calls.lock().expect("lock") += 1;
        Ok(self.condense_reply.clone())
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> crate::Result<TokenStream> {
        *self.last_messages.lock().expect("lock") = messages.to_vec();

        let mut items: Vec<crate::Result<String>> =
            self.tokens.iter().cloned().map(Ok).collect();

        let mut failures = self.fail_streams.lock().expect("lock");
        if *failures > 0 {
            *failures -= 1;
            items.push(Err(RepoQueryError::Generation(
                "stream died mid-answer".to_string(),
            )));
        }

        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

fn project() -> ProjectConfig {
    ProjectConfig {
        name: "widget".to_string(),
        repository_url: "https://example.com/widget".to_string(),
        content_type: "code".to_string(),
        target_audience: "smart developer".to_string(),
        chat_prompt: None,
    }
}

fn build_index(chunks: &[&str]) -> HnswIndex {
    let mut index = HnswIndex::new(IndexConfig {
        metric: Metric::Euclidean,
        ..IndexConfig::default()
    });
    for (i, chunk) in chunks.iter().enumerate() {
        index
            .insert(
                embed_text(chunk),
                (*chunk).to_string(),
                ChunkMetadata {
                    source_path: format!("src/file{i}.rs"),
                    sequence_index: 0,
                },
            )
            .expect("insert chunk");
    }
    index
}

fn token_sink() -> (
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
) {
    mpsc::unbounded_channel()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut tokens = Vec::new();
    while let Ok(token) = rx.try_recv() {
        tokens.push(token);
    }
    tokens
}

#[tokio::test]
async fn empty_history_skips_the_rewrite_call() {
    let index = build_index(&["alpha", "beta", "gamma"]);
    let chat = MockChat::new(&["An", "swer"]);
    let mut retriever = ConversationalRetriever::new(&index, HashEmbedder, chat, project());
    let mut history = ChatHistory::new();
    let (tx, mut rx) = token_sink();

    let answer = retriever
        .answer("what is alpha?", &mut history, &tx)
        .await
        .expect("answer");

    assert_eq!(answer, "Answer");
    assert_eq!(retriever.chat.complete_calls(), 0);
    assert_eq!(retriever.phase(), TurnPhase::Completed);
    assert_eq!(drain(&mut rx), vec!["An", "swer"]);
}

#[tokio::test]
async fn successful_turn_appends_exactly_one_history_entry() {
    let index = build_index(&["alpha", "beta"]);
    let chat = MockChat::new(&["ok"]);
    let mut retriever = ConversationalRetriever::new(&index, HashEmbedder, chat, project());
    let mut history = ChatHistory::new();
    let (tx, _rx) = token_sink();

    retriever
        .answer("first question", &mut history, &tx)
        .await
        .expect("answer");

    assert_eq!(history.len(), 1);
    assert_eq!(
        history.turns()[0],
        ConversationTurn {
            question: "first question".to_string(),
            answer: "ok".to_string(),
        }
    );
}

#[tokio::test]
async fn non_empty_history_condenses_the_question() {
    let index = build_index(&["alpha", "beta"]);
    let chat = MockChat::new(&["ok"]);
    let mut retriever = ConversationalRetriever::new(&index, HashEmbedder, chat, project());
    let mut history = ChatHistory::new();
    history.push(ConversationTurn {
        question: "what is alpha?".to_string(),
        answer: "alpha is a chunk".to_string(),
    });
    let (tx, _rx) = token_sink();

    retriever
        .answer("and what about it?", &mut history, &tx)
        .await
        .expect("answer");

    assert_eq!(retriever.chat.complete_calls(), 1);
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn generation_failure_leaves_history_unchanged() {
    let index = build_index(&["alpha", "beta"]);
    let chat = MockChat::failing_first(&["partial"]);
    let mut retriever = ConversationalRetriever::new(&index, HashEmbedder, chat, project());
    let mut history = ChatHistory::new();
    let (tx, mut rx) = token_sink();

    let err = retriever
        .answer("doomed question", &mut history, &tx)
        .await
        .expect_err("turn must fail");

    assert!(matches!(err, RepoQueryError::Generation(_)));
    assert_eq!(retriever.phase(), TurnPhase::Failed);
    assert_eq!(history.len(), 0);
    // Tokens seen before the failure were still streamed.
    assert_eq!(drain(&mut rx), vec!["partial"]);

    // The session stays usable: the next turn succeeds and appends.
    let answer = retriever
        .answer("second attempt", &mut history, &tx)
        .await
        .expect("answer");
    assert_eq!(answer, "partial");
    assert_eq!(retriever.phase(), TurnPhase::Completed);
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn embedding_failure_fails_the_turn_before_generation() {
    let index = build_index(&["alpha"]);
    let chat = MockChat::new(&["never sent"]);
    let mut retriever = ConversationalRetriever::new(&index, FailingEmbedder, chat, project());
    let mut history = ChatHistory::new();
    let (tx, mut rx) = token_sink();

    let err = retriever
        .answer("question", &mut history, &tx)
        .await
        .expect_err("turn must fail");

    assert!(matches!(err, RepoQueryError::Network(_)));
    assert_eq!(retriever.phase(), TurnPhase::Failed);
    assert!(history.is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn prompt_carries_context_history_and_raw_question() {
    let index = build_index(&["alpha", "beta"]);
    let chat = MockChat::new(&["ok"]);
    let mut retriever =
        ConversationalRetriever::new(&index, HashEmbedder, chat, project()).with_top_k(1);
    let mut history = ChatHistory::new();
    history.push(ConversationTurn {
        question: "earlier question".to_string(),
        answer: "earlier answer".to_string(),
    });
    let (tx, _rx) = token_sink();

    retriever
        .answer("alpha", &mut history, &tx)
        .await
        .expect("answer");

    let messages = retriever.chat.last_messages.lock().expect("lock").clone();
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains("widget"));
    assert!(messages[0].content.contains("alpha"));
    assert!(messages[0].content.contains("src/file0.rs"));

    // Prior turns are replayed, raw question comes last.
    assert_eq!(messages[1].content, "earlier question");
    assert_eq!(messages[2].content, "earlier answer");
    assert_eq!(messages.last().expect("messages").content, "alpha");
    assert_eq!(messages.last().expect("messages").role, Role::User);
}

#[tokio::test]
async fn retrieval_returns_the_matching_chunk_first() {
    let index = build_index(&["alpha", "beta", "gamma"]);
    let chat = MockChat::new(&["ok"]);
    let retriever =
        ConversationalRetriever::new(&index, HashEmbedder, chat, project()).with_top_k(2);

    let hits = retriever.retrieve("alpha").expect("retrieve");
    assert_eq!(hits[0].content, "alpha");
    assert!(hits[0].distance.abs() < 1e-6);
}
