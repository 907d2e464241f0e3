use crate::audio::encode_pcm16le;
use crate::backend::BoxResultStream;
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::Mutex;
use std::time::Duration;

/// Lazily produced audio fragments. Dropping the stream cancels the request.
pub type AudioStream = BoxResultStream<Vec<u8>>;

/// Trait for incremental speech synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text`; fragments are 16-bit PCM bytes.
    async fn synthesize(&self, text: &str) -> Result<AudioStream>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Scripted synthesizer for tests and the keyless `mock` provider.
///
/// Each fragment is `"<text>#<index>"` as bytes so ordering is observable,
/// unless [`MockSynthesizer::with_silence`] asks for real PCM.
#[derive(Debug)]
pub struct MockSynthesizer {
    name: String,
    fragments: usize,
    fragment_delay: Duration,
    silence_ms: Option<u32>,
    fail_on: Option<String>,
    requests: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fragments: 2,
            fragment_delay: Duration::ZERO,
            silence_ms: None,
            fail_on: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fragments(mut self, fragments: usize) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// Emit silent 16kHz PCM of the given length per fragment.
    pub fn with_silence(mut self, ms: u32) -> Self {
        self.silence_ms = Some(ms);
        self
    }

    /// Refuse any text containing `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(text.to_string());
        }
        if let Some(needle) = &self.fail_on
            && text.contains(needle.as_str())
        {
            return Err(TalkbackError::Synthesis {
                backend: self.name.clone(),
                message: format!("refused {text:?}"),
            });
        }

        let fragments: Vec<Vec<u8>> = (0..self.fragments)
            .map(|i| match self.silence_ms {
                Some(ms) => encode_pcm16le(&vec![0i16; ms as usize * 16]),
                None => format!("{text}#{i}").into_bytes(),
            })
            .collect();
        let delay = self.fragment_delay;

        Ok(Box::pin(stream::iter(fragments).then(move |fragment| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(fragment)
        })))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
