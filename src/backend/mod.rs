//! External engines: recognition, generation and synthesis.
//!
//! Each capability is a small async trait. Concrete HTTP providers live behind
//! the `http-backends` feature; scripted mocks are always available. The
//! configured primary/secondary pair is wrapped in a fallback composer.

#[cfg(feature = "http-backends")]
pub mod elevenlabs;
pub mod fallback;
pub mod generator;
#[cfg(feature = "http-backends")]
pub mod http;
pub mod hygiene;
#[cfg(feature = "http-backends")]
pub mod openai;
pub mod recognizer;
pub mod sse;
pub mod synthesizer;

pub use fallback::{FallbackGenerator, FallbackPolicy, FallbackRecognizer, FallbackSynthesizer};
pub use generator::{ChatMessage, Generator, MockGenerator, MockScript, Role, TokenStream};
pub use hygiene::TranscriptFilter;
pub use recognizer::{MockRecognizer, MockReply, Recognizer};
pub use synthesizer::{AudioStream, MockSynthesizer, Synthesizer};

use crate::config::{Capability, Config, ProviderKind};
use crate::error::{Result, TalkbackError};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed, sendable stream of fallible items.
pub type BoxResultStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// The three engines one session talks to. Shared across sessions.
#[derive(Clone)]
pub struct Backends {
    pub recognizer: Arc<dyn Recognizer>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("recognizer", &self.recognizer.name())
            .field("generator", &self.generator.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}

impl Backends {
    /// In-process engines that need no credentials or network.
    pub fn mock() -> Self {
        Self {
            recognizer: Arc::new(MockRecognizer::new("mock")),
            generator: Arc::new(MockGenerator::new("mock")),
            synthesizer: Arc::new(MockSynthesizer::new("mock").with_silence(100)),
        }
    }
}

/// Build the configured backends, each wrapped in its fallback composer.
///
/// Fails when a provider's API key variable is unset, or when an HTTP
/// provider is configured in a build without `http-backends`.
pub fn build_backends(config: &Config) -> Result<Backends> {
    let factory = Factory::new(config)?;
    let policy = || {
        FallbackPolicy::new(
            config.fallback.max_consecutive_failures,
            Duration::from_secs(config.fallback.cooldown_secs),
        )
    };

    let recognizer = FallbackRecognizer::new(
        factory.recognizer(config.recognition.primary)?,
        config
            .recognition
            .secondary
            .map(|p| factory.recognizer(p))
            .transpose()?,
        policy(),
    )
    .with_timeouts(
        Duration::from_millis(config.recognition.partial_timeout_ms),
        Duration::from_millis(config.recognition.final_timeout_ms),
    );

    let generator = FallbackGenerator::new(
        factory.generator(config.generation.primary)?,
        config
            .generation
            .secondary
            .map(|p| factory.generator(p))
            .transpose()?,
        policy(),
    )
    .with_first_token_timeout(Duration::from_millis(
        config.generation.first_token_timeout_ms,
    ));

    let synthesizer = FallbackSynthesizer::new(
        factory.synthesizer(config.synthesis.primary)?,
        config
            .synthesis
            .secondary
            .map(|p| factory.synthesizer(p))
            .transpose()?,
        policy(),
    )
    .with_first_fragment_timeout(Duration::from_millis(
        config.synthesis.first_fragment_timeout_ms,
    ));

    let backends = Backends {
        recognizer: Arc::new(recognizer),
        generator: Arc::new(generator),
        synthesizer: Arc::new(synthesizer),
    };
    tracing::info!(?backends, "Backends ready");
    Ok(backends)
}

struct Factory<'a> {
    config: &'a Config,
    #[cfg(feature = "http-backends")]
    client: reqwest::Client,
}

impl<'a> Factory<'a> {
    fn new(config: &'a Config) -> Result<Self> {
        Ok(Self {
            config,
            #[cfg(feature = "http-backends")]
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()?,
        })
    }

    fn unsupported(provider: ProviderKind, capability: Capability) -> TalkbackError {
        TalkbackError::BackendUnavailable {
            capability: format!("{capability} via {provider}"),
        }
    }

    #[cfg(feature = "http-backends")]
    fn endpoint(&self, provider: ProviderKind) -> Result<openai::Endpoint> {
        let base_url = match provider {
            ProviderKind::Openai => &self.config.providers.openai.base_url,
            ProviderKind::Groq => &self.config.providers.groq.base_url,
            ProviderKind::Elevenlabs => &self.config.providers.elevenlabs.base_url,
            ProviderKind::Mock => return Err(Self::unsupported(provider, Capability::Generation)),
        };
        Ok(openai::Endpoint {
            name: provider.to_string(),
            base_url: base_url.clone(),
            api_key: http::api_key(self.config, provider)?,
        })
    }

    fn recognizer(&self, provider: ProviderKind) -> Result<Arc<dyn Recognizer>> {
        match provider {
            ProviderKind::Mock => Ok(Arc::new(MockRecognizer::new("mock"))),
            _ => self.http_recognizer(provider),
        }
    }

    fn generator(&self, provider: ProviderKind) -> Result<Arc<dyn Generator>> {
        match provider {
            ProviderKind::Mock => Ok(Arc::new(MockGenerator::new("mock"))),
            _ => self.http_generator(provider),
        }
    }

    fn synthesizer(&self, provider: ProviderKind) -> Result<Arc<dyn Synthesizer>> {
        match provider {
            ProviderKind::Mock => Ok(Arc::new(MockSynthesizer::new("mock").with_silence(100))),
            _ => self.http_synthesizer(provider),
        }
    }

    #[cfg(feature = "http-backends")]
    fn http_recognizer(&self, provider: ProviderKind) -> Result<Arc<dyn Recognizer>> {
        let model = match provider {
            ProviderKind::Openai => &self.config.providers.openai.transcription_model,
            ProviderKind::Groq => &self.config.providers.groq.transcription_model,
            _ => return Err(Self::unsupported(provider, Capability::Recognition)),
        };
        let rec = &self.config.recognition;
        Ok(Arc::new(
            openai::OpenAiRecognizer::new(
                self.client.clone(),
                self.endpoint(provider)?,
                model,
                self.config.pipeline.sample_rate,
            )
            .with_language(rec.language.clone())
            .with_prompt(rec.prompt.clone())
            .with_partial_window_secs(rec.partial_window_secs),
        ))
    }

    #[cfg(feature = "http-backends")]
    fn http_generator(&self, provider: ProviderKind) -> Result<Arc<dyn Generator>> {
        let model = match provider {
            ProviderKind::Openai => &self.config.providers.openai.chat_model,
            ProviderKind::Groq => &self.config.providers.groq.chat_model,
            _ => return Err(Self::unsupported(provider, Capability::Generation)),
        };
        let generation = &self.config.generation;
        Ok(Arc::new(openai::OpenAiGenerator::new(
            self.client.clone(),
            self.endpoint(provider)?,
            model,
            &generation.system_prompt,
            openai::Sampling {
                temperature: generation.temperature,
                max_tokens: generation.max_tokens,
                top_p: generation.top_p,
            },
        )))
    }

    #[cfg(feature = "http-backends")]
    fn http_synthesizer(&self, provider: ProviderKind) -> Result<Arc<dyn Synthesizer>> {
        match provider {
            ProviderKind::Openai => {
                let openai = &self.config.providers.openai;
                Ok(Arc::new(openai::OpenAiSynthesizer::new(
                    self.client.clone(),
                    self.endpoint(provider)?,
                    &openai.speech_model,
                    &openai.voice,
                )))
            }
            ProviderKind::Elevenlabs => {
                let eleven = &self.config.providers.elevenlabs;
                Ok(Arc::new(elevenlabs::ElevenLabsSynthesizer::new(
                    self.client.clone(),
                    self.endpoint(provider)?,
                    &eleven.model,
                    &eleven.voice_id,
                    elevenlabs::VoiceSettings {
                        stability: eleven.stability,
                        similarity_boost: eleven.similarity_boost,
                    },
                )))
            }
            _ => Err(Self::unsupported(provider, Capability::Synthesis)),
        }
    }

    #[cfg(not(feature = "http-backends"))]
    fn http_recognizer(&self, provider: ProviderKind) -> Result<Arc<dyn Recognizer>> {
        Err(Self::unsupported(provider, Capability::Recognition))
    }

    #[cfg(not(feature = "http-backends"))]
    fn http_generator(&self, provider: ProviderKind) -> Result<Arc<dyn Generator>> {
        Err(Self::unsupported(provider, Capability::Generation))
    }

    #[cfg(not(feature = "http-backends"))]
    fn http_synthesizer(&self, provider: ProviderKind) -> Result<Arc<dyn Synthesizer>> {
        Err(Self::unsupported(provider, Capability::Synthesis))
    }
}
