pub mod openai;

pub use openai::ChatClient;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Incremental answer tokens in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Generation service used for question condensing and answer generation.
pub trait ChatModel: Send + Sync {
    /// Send messages and return the complete assistant response.
    fn complete(&self, messages: &[ChatMessage]) -> impl Future<Output = Result<String>> + Send;

    /// Send messages and return the assistant response as a token stream.
    fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<TokenStream>> + Send;
}
