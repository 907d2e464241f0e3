//! Primary/secondary backend composition with bounded timeouts.
//!
//! Each composer tries the preferred backend first and retries against the
//! secondary on error or timeout. A [`FallbackPolicy`] counts consecutive
//! primary failures; once the limit is hit the primary is skipped for a
//! cooldown, then probed again. Any primary success resets the count.

use crate::backend::generator::{ChatMessage, Generator, TokenStream};
use crate::backend::recognizer::Recognizer;
use crate::backend::synthesizer::{AudioStream, Synthesizer};
use crate::backend::BoxResultStream;
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Run `fut` under a deadline, mapping expiry to [`TalkbackError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TalkbackError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

#[derive(Debug, Default)]
struct PolicyState {
    consecutive_failures: u32,
    skip_until: Option<Instant>,
}

/// Tracks primary health and decides whether to try it.
#[derive(Debug)]
pub struct FallbackPolicy {
    max_failures: u32,
    cooldown: Duration,
    state: Mutex<PolicyState>,
}

impl FallbackPolicy {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            cooldown,
            state: Mutex::new(PolicyState::default()),
        }
    }

    /// Whether the primary should be attempted right now.
    pub fn prefer_primary(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        match state.skip_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // Cooldown over: give the primary one probe.
                state.skip_until = None;
                state.consecutive_failures = self.max_failures.saturating_sub(1);
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures = 0;
            state.skip_until = None;
        }
    }

    /// Returns true when this failure trips the cooldown.
    pub fn record_failure(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.max_failures && state.skip_until.is_none() {
            state.skip_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .map(|s| s.consecutive_failures)
            .unwrap_or_default()
    }
}

fn note_primary_failure(policy: &FallbackPolicy, backend: &str, err: &TalkbackError) {
    let tripped = policy.record_failure();
    tracing::warn!(
        backend,
        transient = err.is_transient(),
        failures = policy.consecutive_failures(),
        "Primary backend failed: {}",
        err
    );
    if tripped {
        tracing::warn!(backend, "Primary backend disabled for cooldown");
    }
}

/// Recognizer that falls back from a primary to an optional secondary.
pub struct FallbackRecognizer {
    primary: Arc<dyn Recognizer>,
    secondary: Option<Arc<dyn Recognizer>>,
    policy: FallbackPolicy,
    partial_timeout: Duration,
    final_timeout: Duration,
    name: String,
}

impl FallbackRecognizer {
    pub fn new(
        primary: Arc<dyn Recognizer>,
        secondary: Option<Arc<dyn Recognizer>>,
        policy: FallbackPolicy,
    ) -> Self {
        let name = composite_name(primary.name(), secondary.as_ref().map(|s| s.name()));
        Self {
            primary,
            secondary,
            policy,
            partial_timeout: Duration::from_millis(crate::defaults::PARTIAL_TIMEOUT_MS),
            final_timeout: Duration::from_millis(crate::defaults::FINAL_TIMEOUT_MS),
            name,
        }
    }

    pub fn with_timeouts(mut self, partial: Duration, final_: Duration) -> Self {
        self.partial_timeout = partial;
        self.final_timeout = final_;
        self
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    async fn attempt(
        &self,
        backend: &dyn Recognizer,
        audio: &[i16],
        is_final: bool,
    ) -> Result<Option<String>> {
        if is_final {
            with_timeout(
                self.final_timeout,
                "final transcription",
                backend.transcribe_final(audio),
            )
            .await
        } else {
            with_timeout(
                self.partial_timeout,
                "partial transcription",
                backend.transcribe_partial(audio),
            )
            .await
        }
    }

    async fn run(&self, audio: &[i16], is_final: bool) -> Result<Option<String>> {
        let Some(secondary) = &self.secondary else {
            return self.attempt(self.primary.as_ref(), audio, is_final).await;
        };

        if self.policy.prefer_primary() {
            match self.attempt(self.primary.as_ref(), audio, is_final).await {
                Ok(text) => {
                    self.policy.record_success();
                    return Ok(text);
                }
                Err(e) => note_primary_failure(&self.policy, self.primary.name(), &e),
            }
        }

        tracing::debug!(backend = secondary.name(), is_final, "Using secondary recognizer");
        self.attempt(secondary.as_ref(), audio, is_final).await
    }
}

#[async_trait]
impl Recognizer for FallbackRecognizer {
    async fn transcribe_partial(&self, audio: &[i16]) -> Result<Option<String>> {
        self.run(audio, false).await
    }

    async fn transcribe_final(&self, audio: &[i16]) -> Result<Option<String>> {
        self.run(audio, true).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Open a stream and wait for its first item under one deadline, then hand
/// back a stream that replays that item ahead of the rest.
async fn open_with_first_item<T, F>(
    limit: Duration,
    operation: &str,
    open: F,
) -> Result<BoxResultStream<T>>
where
    T: Send + 'static,
    F: Future<Output = Result<BoxResultStream<T>>>,
{
    with_timeout(limit, operation, async move {
        let mut stream = open.await?;
        match stream.next().await {
            Some(Ok(first)) => {
                let replay = stream::once(async move { Ok(first) });
                Ok(Box::pin(replay.chain(stream)) as BoxResultStream<T>)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Box::pin(stream::empty()) as BoxResultStream<T>),
        }
    })
    .await
}

/// Generator that falls back when the primary fails before its first token.
///
/// Failures after the first token are surfaced to the caller unchanged.
pub struct FallbackGenerator {
    primary: Arc<dyn Generator>,
    secondary: Option<Arc<dyn Generator>>,
    policy: FallbackPolicy,
    first_token_timeout: Duration,
    name: String,
}

impl FallbackGenerator {
    pub fn new(
        primary: Arc<dyn Generator>,
        secondary: Option<Arc<dyn Generator>>,
        policy: FallbackPolicy,
    ) -> Self {
        let name = composite_name(primary.name(), secondary.as_ref().map(|s| s.name()));
        Self {
            primary,
            secondary,
            policy,
            first_token_timeout: Duration::from_millis(crate::defaults::FIRST_TOKEN_TIMEOUT_MS),
            name,
        }
    }

    pub fn with_first_token_timeout(mut self, timeout: Duration) -> Self {
        self.first_token_timeout = timeout;
        self
    }

    async fn attempt(
        &self,
        backend: &dyn Generator,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<TokenStream> {
        open_with_first_item(
            self.first_token_timeout,
            "first generation token",
            backend.generate(history, message),
        )
        .await
    }
}

#[async_trait]
impl Generator for FallbackGenerator {
    async fn generate(&self, history: &[ChatMessage], message: &str) -> Result<TokenStream> {
        let Some(secondary) = &self.secondary else {
            return self.attempt(self.primary.as_ref(), history, message).await;
        };

        if self.policy.prefer_primary() {
            match self.attempt(self.primary.as_ref(), history, message).await {
                Ok(tokens) => {
                    self.policy.record_success();
                    return Ok(tokens);
                }
                Err(e) => note_primary_failure(&self.policy, self.primary.name(), &e),
            }
        }

        tracing::debug!(backend = secondary.name(), "Using secondary generator");
        self.attempt(secondary.as_ref(), history, message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Synthesizer that falls back when the primary fails before its first fragment.
pub struct FallbackSynthesizer {
    primary: Arc<dyn Synthesizer>,
    secondary: Option<Arc<dyn Synthesizer>>,
    policy: FallbackPolicy,
    first_fragment_timeout: Duration,
    name: String,
}

impl FallbackSynthesizer {
    pub fn new(
        primary: Arc<dyn Synthesizer>,
        secondary: Option<Arc<dyn Synthesizer>>,
        policy: FallbackPolicy,
    ) -> Self {
        let name = composite_name(primary.name(), secondary.as_ref().map(|s| s.name()));
        Self {
            primary,
            secondary,
            policy,
            first_fragment_timeout: Duration::from_millis(
                crate::defaults::FIRST_FRAGMENT_TIMEOUT_MS,
            ),
            name,
        }
    }

    pub fn with_first_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.first_fragment_timeout = timeout;
        self
    }

    async fn attempt(&self, backend: &dyn Synthesizer, text: &str) -> Result<AudioStream> {
        open_with_first_item(
            self.first_fragment_timeout,
            "first synthesis fragment",
            backend.synthesize(text),
        )
        .await
    }
}

#[async_trait]
impl Synthesizer for FallbackSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let Some(secondary) = &self.secondary else {
            return self.attempt(self.primary.as_ref(), text).await;
        };

        if self.policy.prefer_primary() {
            match self.attempt(self.primary.as_ref(), text).await {
                Ok(audio) => {
                    self.policy.record_success();
                    return Ok(audio);
                }
                Err(e) => note_primary_failure(&self.policy, self.primary.name(), &e),
            }
        }

        tracing::debug!(backend = secondary.name(), "Using secondary synthesizer");
        self.attempt(secondary.as_ref(), text).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn composite_name(primary: &str, secondary: Option<&str>) -> String {
    match secondary {
        Some(secondary) => format!("{primary}>{secondary}"),
        None => primary.to_string(),
    }
}
