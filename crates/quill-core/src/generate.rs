//! Generation collaborator interface.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::domain::GenerationError;

/// Stream of text fragments in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation turn sent to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Text-generation backend. Batched backends return a single-item stream.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<FragmentStream, GenerationError>;
}

/// Wrap a complete response as a one-fragment stream.
pub fn single_fragment(text: impl Into<String>) -> FragmentStream {
    Box::pin(futures::stream::once(futures::future::ready(Ok(text.into()))))
}

/// Wrap pre-split fragments as a stream.
pub fn fragments<I>(parts: I) -> FragmentStream
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(parts.into_iter().map(Ok)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn single_fragment_yields_once() {
        let parts: Vec<_> = single_fragment("hello").collect().await;
        assert_eq!(parts, vec![Ok("hello".to_string())]);
    }

    #[test]
    fn chat_message_serde_roles() {
        let json = serde_json::to_value(ChatMessage::user("hi")).expect("serialize");
        assert_eq!(json["role"], "user");
    }
}
