#[cfg(test)]
mod tests;

mod prompt;

use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::embeddings::Embedder;
use crate::index::{HnswIndex, SearchHit};
use crate::llm::ChatModel;
use crate::{RepoQueryError, Result};

/// Number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 4;

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// Append-only record of a query session's completed turns.
///
/// Owned by the session and passed into each retriever invocation; only the
/// retriever appends, and only after a turn fully completes. Never persisted
/// across sessions.
#[derive(Debug, Default)]
pub struct ChatHistory {
    turns: Vec<ConversationTurn>,
}

impl ChatHistory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }
}

/// Phases a question moves through. `Failed` is terminal for the turn but
/// not for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingQuestion,
    Rewriting,
    Retrieving,
    Assembling,
    Generating,
    Completed,
    Failed,
}

/// Per-session question answering over a read-only index.
///
/// Each call to [`answer`](Self::answer) drives one turn through the phase
/// sequence: the question is condensed against prior turns, the index is
/// queried with the condensed question's embedding, a prompt is assembled
/// from the retrieved chunks and the project identity, and the generated
/// answer is streamed token by token to the caller's sink. History is only
/// updated when a turn completes; a failed turn leaves it untouched.
pub struct ConversationalRetriever<'a, E, C> {
    index: &'a HnswIndex,
    embedder: E,
    chat: C,
    project: ProjectConfig,
    top_k: usize,
    phase: TurnPhase,
}

impl<'a, E: Embedder, C: ChatModel> ConversationalRetriever<'a, E, C> {
    #[inline]
    pub fn new(index: &'a HnswIndex, embedder: E, chat: C, project: ProjectConfig) -> Self {
        Self {
            index,
            embedder,
            chat,
            project,
            top_k: DEFAULT_TOP_K,
            phase: TurnPhase::AwaitingQuestion,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Phase reached by the most recent turn.
    #[inline]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Answer one question. Tokens are forwarded to `tokens` in arrival
    /// order; the full answer is returned once generation finishes and is
    /// appended to `history` together with the raw question. On error the
    /// history is left unchanged and the session stays usable.
    #[inline]
    pub async fn answer(
        &mut self,
        question: &str,
        history: &mut ChatHistory,
        tokens: &UnboundedSender<String>,
    ) -> Result<String> {
        match self.run_turn(question, history, tokens).await {
            Ok(answer) => {
                self.phase = TurnPhase::Completed;
                history.push(ConversationTurn {
                    question: question.to_string(),
                    answer: answer.clone(),
                });
                info!("Turn completed; history now holds {} turns", history.len());
                Ok(answer)
            }
            Err(e) => {
                self.phase = TurnPhase::Failed;
                Err(e)
            }
        }
    }

    async fn run_turn(
        &mut self,
        question: &str,
        history: &ChatHistory,
        tokens: &UnboundedSender<String>,
    ) -> Result<String> {
        self.phase = TurnPhase::Rewriting;
        let rewritten = self.rewrite_question(question, history).await?;

        self.phase = TurnPhase::Retrieving;
        let hits = self.retrieve(&rewritten)?;
        debug!("Retrieved {} chunks for the question", hits.len());

        self.phase = TurnPhase::Assembling;
        let messages = prompt::answer_messages(&self.project, question, &hits, history);

        self.phase = TurnPhase::Generating;
        let mut stream = self.chat.stream_chat(&messages).await?;
        let mut answer = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            answer.push_str(&token);
            // A dropped receiver only means nobody is displaying tokens;
            // the turn still completes.
            let _ = tokens.send(token);
        }

        if answer.is_empty() {
            return Err(RepoQueryError::Generation(
                "generation service produced an empty answer".to_string(),
            ));
        }
        Ok(answer)
    }

    /// Condense the question into a standalone query using prior turns.
    /// With an empty history the raw question is used verbatim and no
    /// generation call is made.
    async fn rewrite_question(&self, question: &str, history: &ChatHistory) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let messages = prompt::condense_messages(question, history);
        let rewritten = self.chat.complete(&messages).await?;
        let rewritten = rewritten.trim();
        debug!("Condensed question: {}", rewritten);

        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        let vectors = self.embedder.embed(&[query.to_string()])?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| {
            RepoQueryError::Network("embedding service returned no vector for the query".to_string())
        })?;
        self.index.search(&query_vector, self.top_k)
    }
}
