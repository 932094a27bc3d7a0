//! Prompt assembly for question condensing and answer generation.

use itertools::Itertools;

use super::ChatHistory;
use crate::config::ProjectConfig;
use crate::index::SearchHit;
use crate::llm::{ChatMessage, Role};

/// Messages asking the model to rewrite a follow-up question as a
/// standalone question, free of pronouns that depend on earlier turns.
pub(super) fn condense_messages(question: &str, history: &ChatHistory) -> Vec<ChatMessage> {
    let transcript = history
        .turns()
        .iter()
        .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
        .join("\n");

    vec![
        ChatMessage::new(
            Role::System,
            "Given the following conversation and a follow up question, rephrase the \
             follow up question to be a standalone question. Respond with only the \
             rephrased question.",
        ),
        ChatMessage::new(
            Role::User,
            format!("Chat history:\n{transcript}\n\nFollow up question: {question}"),
        ),
    ]
}

/// Messages for answer generation: a system prompt carrying the project
/// identity and the retrieved context, the prior turns for conversational
/// continuity, and the raw question last.
pub(super) fn answer_messages(
    project: &ProjectConfig,
    question: &str,
    hits: &[SearchHit],
    history: &ChatHistory,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new(
        Role::System,
        system_prompt(project, hits),
    )];

    for turn in history.turns() {
        messages.push(ChatMessage::new(Role::User, turn.question.clone()));
        messages.push(ChatMessage::new(Role::Assistant, turn.answer.clone()));
    }

    messages.push(ChatMessage::new(Role::User, question.to_string()));
    messages
}

fn system_prompt(project: &ProjectConfig, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|hit| format!("Source: {}\n{}", hit.metadata.source_path, hit.content))
        .join("\n\n---\n\n");

    let sources = hits
        .iter()
        .map(|hit| hit.metadata.source_path.as_str())
        .unique()
        .join(", ");

    let mut prompt = format!(
        "You are an AI assistant for the {name} project, a software repository \
         located at {url}. Answer questions about the {name} {content_type} for a \
         {audience}, using only the context below. Cite the source files you drew \
         from ({sources}). If the context does not contain the answer, say that \
         you don't know rather than guessing. Format answers in markdown.",
        name = project.name,
        url = project.repository_url,
        content_type = project.content_type,
        audience = project.target_audience,
        sources = sources,
    );

    if let Some(extra) = &project.chat_prompt {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }

    prompt.push_str("\n\nContext:\n\n");
    prompt.push_str(&context);
    prompt
}
