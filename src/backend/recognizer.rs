use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for speech recognition backends.
///
/// Audio is 16-bit PCM at 16kHz mono. `Ok(None)` means the backend heard
/// nothing it could transcribe.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Provisional transcript of the audio collected so far (UI echo only).
    async fn transcribe_partial(&self, audio: &[i16]) -> Result<Option<String>>;

    /// Authoritative transcript of a complete utterance.
    async fn transcribe_final(&self, audio: &[i16]) -> Result<Option<String>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Recognizer + ?Sized> Recognizer for Arc<T> {
    async fn transcribe_partial(&self, audio: &[i16]) -> Result<Option<String>> {
        (**self).transcribe_partial(audio).await
    }

    async fn transcribe_final(&self, audio: &[i16]) -> Result<Option<String>> {
        (**self).transcribe_final(audio).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// One scripted answer from [`MockRecognizer`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    Nothing,
    Fail(String),
}

/// Scripted recognizer for tests and the keyless `mock` provider.
///
/// Final requests consume the scripted queue in order and fall back to the
/// default reply once it is empty.
#[derive(Debug)]
pub struct MockRecognizer {
    name: String,
    finals: Mutex<VecDeque<MockReply>>,
    default_final: MockReply,
    partial: MockReply,
    delay: Duration,
    final_calls: AtomicUsize,
    partial_calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            finals: Mutex::new(VecDeque::new()),
            default_final: MockReply::Text("mock transcription".to_string()),
            partial: MockReply::Nothing,
            delay: Duration::ZERO,
            final_calls: AtomicUsize::new(0),
            partial_calls: AtomicUsize::new(0),
        }
    }

    /// Reply used for every final request once the script is exhausted.
    pub fn with_response(mut self, text: &str) -> Self {
        self.default_final = MockReply::Text(text.to_string());
        self
    }

    /// Append one scripted final reply.
    pub fn then_reply(self, reply: MockReply) -> Self {
        if let Ok(mut finals) = self.finals.lock() {
            finals.push_back(reply);
        }
        self
    }

    /// Every final request fails.
    pub fn with_failure(mut self) -> Self {
        self.default_final = MockReply::Fail("mock recognition failure".to_string());
        self
    }

    pub fn with_partial(mut self, text: &str) -> Self {
        self.partial = MockReply::Text(text.to_string());
        self
    }

    /// Latency added to every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn final_calls(&self) -> usize {
        self.final_calls.load(Ordering::SeqCst)
    }

    pub fn partial_calls(&self) -> usize {
        self.partial_calls.load(Ordering::SeqCst)
    }

    fn resolve(&self, reply: MockReply) -> Result<Option<String>> {
        match reply {
            MockReply::Text(text) => Ok(Some(text)),
            MockReply::Nothing => Ok(None),
            MockReply::Fail(message) => Err(TalkbackError::Recognition {
                backend: self.name.clone(),
                message,
            }),
        }
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn transcribe_partial(&self, _audio: &[i16]) -> Result<Option<String>> {
        self.partial_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.resolve(self.partial.clone())
    }

    async fn transcribe_final(&self, _audio: &[i16]) -> Result<Option<String>> {
        self.final_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.finals.lock().ok().and_then(|mut f| f.pop_front());
        self.resolve(scripted.unwrap_or_else(|| self.default_final.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
