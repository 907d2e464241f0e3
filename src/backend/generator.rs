use crate::backend::BoxResultStream;
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lazily produced response tokens. Dropping the stream cancels the request.
pub type TokenStream = BoxResultStream<String>;

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation entry, serialized the way chat-completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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
}

/// Trait for incremental response generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating a reply to `message` given the trailing `history`.
    ///
    /// The system framing is the backend's concern.
    async fn generate(&self, history: &[ChatMessage], message: &str) -> Result<TokenStream>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// What a single [`MockGenerator`] call produces.
#[derive(Debug, Clone, PartialEq)]
pub enum MockScript {
    /// Yield these tokens in order.
    Tokens(Vec<String>),
    /// Yield these tokens, then a stream error.
    FailAfter(Vec<String>),
    /// Refuse the request outright.
    Refuse(String),
}

impl MockScript {
    /// Tokens split on whitespace boundaries, keeping the spaces attached
    /// the way streaming chat APIs deliver them.
    pub fn words(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            if ch == ' ' && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        MockScript::Tokens(tokens)
    }
}

/// A request observed by [`MockGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    pub history: Vec<ChatMessage>,
    pub message: String,
}

/// Scripted generator for tests and the keyless `mock` provider.
///
/// Without a script it echoes the user message back.
#[derive(Debug)]
pub struct MockGenerator {
    name: String,
    scripts: Mutex<VecDeque<MockScript>>,
    token_delay: Duration,
    requests: Mutex<Vec<MockRequest>>,
    yielded: Arc<AtomicUsize>,
}

impl MockGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Mutex::new(VecDeque::new()),
            token_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            yielded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the behaviour of the next unscripted call.
    pub fn then(self, script: MockScript) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
        self
    }

    /// Delay before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Tokens actually pulled from returned streams across all calls.
    pub fn tokens_yielded(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }

    fn error(&self, message: &str) -> TalkbackError {
        TalkbackError::Generation {
            backend: self.name.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, history: &[ChatMessage], message: &str) -> Result<TokenStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(MockRequest {
                history: history.to_vec(),
                message: message.to_string(),
            });
        }

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| MockScript::words(&format!("You said: {message}.")));

        let (tokens, trailing_error) = match script {
            MockScript::Tokens(tokens) => (tokens, None),
            MockScript::FailAfter(tokens) => (tokens, Some(self.error("stream broke"))),
            MockScript::Refuse(reason) => return Err(self.error(&reason)),
        };

        let delay = self.token_delay;
        let yielded = self.yielded.clone();
        let tokens = stream::iter(tokens).then(move |token| {
            let yielded = yielded.clone();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yielded.fetch_add(1, Ordering::SeqCst);
                Ok(token)
            }
        });
        let tail = stream::iter(trailing_error.map(Err));

        Ok(Box::pin(tokens.chain(tail)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn test_words_keep_leading_spaces() {
        assert_eq!(
            MockScript::words("Hello there friend."),
            MockScript::Tokens(vec![
                "Hello".to_string(),
                " there".to_string(),
                " friend.".to_string()
            ])
        );
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[tokio::test]
    async fn test_mock_generator_echoes_by_default() {
        let generator = MockGenerator::new("mock");

        let tokens = collect(generator.generate(&[], "hi").await.unwrap()).await;
        let text: String = tokens.into_iter().map(|t| t.unwrap()).collect();

        assert_eq!(text, "You said: hi.");
    }

    #[tokio::test]
    async fn test_mock_generator_records_requests() {
        let generator = MockGenerator::new("mock").then(MockScript::Tokens(vec!["ok".into()]));
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];

        let _ = collect(generator.generate(&history, "now").await.unwrap()).await;

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].history, history);
        assert_eq!(requests[0].message, "now");
    }

    #[tokio::test]
    async fn test_fail_after_yields_error_last() {
        let generator =
            MockGenerator::new("mock").then(MockScript::FailAfter(vec!["partial".into()]));

        let items = collect(generator.generate(&[], "x").await.unwrap()).await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(TalkbackError::Generation { .. })));
    }

    #[tokio::test]
    async fn test_refuse_errors_before_streaming() {
        let generator = MockGenerator::new("mock").then(MockScript::Refuse("down".into()));

        assert!(generator.generate(&[], "x").await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_yielding() {
        let generator = MockGenerator::new("mock").then(MockScript::words("one two three four"));

        let mut stream = generator.generate(&[], "x").await.unwrap();
        let _ = stream.next().await;
        drop(stream);

        assert_eq!(generator.tokens_yielded(), 1);
    }
}
