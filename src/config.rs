use crate::defaults;
use crate::error::{Result, TalkbackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineSettings,
    pub segmenter: SegmenterConfig,
    pub recognition: RecognitionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub fallback: FallbackConfig,
    pub providers: ProvidersConfig,
    pub messages: MessagesConfig,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub outbox_buffer: usize,
}

/// Turn detection, partial throttling, history and queue sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub sample_rate: u32,
    pub silence_threshold_ms: u64,
    pub silence_poll_ms: u64,
    pub partial_every_frames: usize,
    pub partial_interval_ms: u64,
    pub min_speech_ms: u64,
    pub fallback_min_audio_ms: u64,
    pub history_cap: usize,
    pub history_window: usize,
    pub recognition_buffer: usize,
    pub generation_buffer: usize,
    pub synthesis_buffer: usize,
}

/// Speakable chunk segmentation rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub first_chunk_chars: usize,
    pub chunk_chars: usize,
    pub quote_ceiling_chars: usize,
    pub terminators: String,
}

/// Speech recognition backends and request shaping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub primary: ProviderKind,
    #[serde(with = "optional_provider")]
    pub secondary: Option<ProviderKind>,
    pub partial_timeout_ms: u64,
    pub final_timeout_ms: u64,
    pub partial_window_secs: u32,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub hallucination_filters: Vec<String>,
}

/// Response generation backends and sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub primary: ProviderKind,
    #[serde(with = "optional_provider")]
    pub secondary: Option<ProviderKind>,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub first_token_timeout_ms: u64,
    pub token_timeout_ms: u64,
}

/// Speech synthesis backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub primary: ProviderKind,
    #[serde(with = "optional_provider")]
    pub secondary: Option<ProviderKind>,
    pub first_fragment_timeout_ms: u64,
    pub fragment_timeout_ms: u64,
}

/// Primary/secondary switching policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    pub max_consecutive_failures: u32,
    pub cooldown_secs: u64,
}

/// Connection settings per provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: OpenAiConfig,
    pub groq: GroqConfig,
    pub elevenlabs: ElevenLabsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub transcription_model: String,
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroqConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub transcription_model: String,
    pub chat_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub voice_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

/// Canned utterances and the human-readable text of `state` messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessagesConfig {
    pub fallback_utterance: String,
    pub apology: String,
    pub inaudible_marker: String,
    pub thinking_message: String,
    pub speaking_message: String,
    pub finished_message: String,
}

/// Backend provider selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Groq,
    Elevenlabs,
    /// Scripted in-process backend; needs no credentials.
    Mock,
}

/// What a provider is asked to do; used to validate provider choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Recognition,
    Generation,
    Synthesis,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::Elevenlabs => "elevenlabs",
            ProviderKind::Mock => "mock",
        }
    }

    pub fn supports(self, capability: Capability) -> bool {
        match self {
            ProviderKind::Openai | ProviderKind::Mock => true,
            ProviderKind::Groq => capability != Capability::Synthesis,
            ProviderKind::Elevenlabs => capability == Capability::Synthesis,
        }
    }
}

/// `secondary = "none"` disables fallback; `None` is written back the same way.
mod optional_provider {
    use super::ProviderKind;
    use serde::de::IntoDeserializer;
    use serde::de::value::StrDeserializer;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<ProviderKind>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map_or("none", ProviderKind::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<ProviderKind>, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name == "none" {
            return Ok(None);
        }
        let name: StrDeserializer<'_, D::Error> = name.as_str().into_deserializer();
        ProviderKind::deserialize(name).map(Some)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Recognition => write!(f, "recognition"),
            Capability::Generation => write!(f, "generation"),
            Capability::Synthesis => write!(f, "synthesis"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDRESS.to_string(),
            outbox_buffer: defaults::OUTBOX_BUFFER,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            silence_threshold_ms: defaults::SILENCE_THRESHOLD_MS,
            silence_poll_ms: defaults::SILENCE_POLL_MS,
            partial_every_frames: defaults::PARTIAL_EVERY_FRAMES,
            partial_interval_ms: defaults::PARTIAL_INTERVAL_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            fallback_min_audio_ms: defaults::FALLBACK_MIN_AUDIO_MS,
            history_cap: defaults::HISTORY_CAP,
            history_window: defaults::HISTORY_WINDOW,
            recognition_buffer: defaults::RECOGNITION_BUFFER,
            generation_buffer: defaults::GENERATION_BUFFER,
            synthesis_buffer: defaults::SYNTHESIS_BUFFER,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            first_chunk_chars: defaults::FIRST_CHUNK_CHARS,
            chunk_chars: defaults::CHUNK_CHARS,
            quote_ceiling_chars: defaults::QUOTE_CEILING_CHARS,
            terminators: defaults::TERMINATORS.to_string(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Groq,
            secondary: Some(ProviderKind::Openai),
            partial_timeout_ms: defaults::PARTIAL_TIMEOUT_MS,
            final_timeout_ms: defaults::FINAL_TIMEOUT_MS,
            partial_window_secs: defaults::PARTIAL_WINDOW_SECS,
            language: None,
            prompt: None,
            hallucination_filters: defaults::HALLUCINATION_FILTERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Groq,
            secondary: Some(ProviderKind::Openai),
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 0.9,
            first_token_timeout_ms: defaults::FIRST_TOKEN_TIMEOUT_MS,
            token_timeout_ms: defaults::TOKEN_TIMEOUT_MS,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Elevenlabs,
            secondary: Some(ProviderKind::Openai),
            first_fragment_timeout_ms: defaults::FIRST_FRAGMENT_TIMEOUT_MS,
            fragment_timeout_ms: defaults::FRAGMENT_TIMEOUT_MS,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
            cooldown_secs: defaults::FALLBACK_COOLDOWN_SECS,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            transcription_model: "whisper-1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            speech_model: "tts-1".to_string(),
            voice: "nova".to_string(),
        }
    }
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            transcription_model: "whisper-large-v3".to_string(),
            chat_model: "llama-3.3-70b-versatile".to_string(),
        }
    }
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_string(),
            api_key_env: "ELEVENLABS_API_KEY".to_string(),
            model: "eleven_turbo_v2_5".to_string(),
            voice_id: "pNInz6obpgDQGcFmaJgB".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            fallback_utterance: defaults::FALLBACK_UTTERANCE.to_string(),
            apology: defaults::APOLOGY_UTTERANCE.to_string(),
            inaudible_marker: defaults::INAUDIBLE_MARKER.to_string(),
            thinking_message: "Thinking...".to_string(),
            speaking_message: "Speaking...".to_string(),
            finished_message: "Finished speaking".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TalkbackError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                TalkbackError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(TalkbackError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TALKBACK_BIND → server.bind
    /// - TALKBACK_SYSTEM_PROMPT → generation.system_prompt
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("TALKBACK_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(prompt) = std::env::var("TALKBACK_SYSTEM_PROMPT")
            && !prompt.is_empty()
        {
            self.generation.system_prompt = prompt;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("server.outbox_buffer", self.server.outbox_buffer as u64),
            ("pipeline.sample_rate", self.pipeline.sample_rate as u64),
            (
                "pipeline.silence_threshold_ms",
                self.pipeline.silence_threshold_ms,
            ),
            ("pipeline.silence_poll_ms", self.pipeline.silence_poll_ms),
            (
                "pipeline.partial_every_frames",
                self.pipeline.partial_every_frames as u64,
            ),
            ("pipeline.history_cap", self.pipeline.history_cap as u64),
            (
                "pipeline.recognition_buffer",
                self.pipeline.recognition_buffer as u64,
            ),
            (
                "pipeline.generation_buffer",
                self.pipeline.generation_buffer as u64,
            ),
            (
                "pipeline.synthesis_buffer",
                self.pipeline.synthesis_buffer as u64,
            ),
            (
                "recognition.partial_timeout_ms",
                self.recognition.partial_timeout_ms,
            ),
            (
                "recognition.final_timeout_ms",
                self.recognition.final_timeout_ms,
            ),
            (
                "generation.first_token_timeout_ms",
                self.generation.first_token_timeout_ms,
            ),
            (
                "generation.token_timeout_ms",
                self.generation.token_timeout_ms,
            ),
            (
                "synthesis.first_fragment_timeout_ms",
                self.synthesis.first_fragment_timeout_ms,
            ),
            (
                "synthesis.fragment_timeout_ms",
                self.synthesis.fragment_timeout_ms,
            ),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }

        if self.pipeline.history_window > self.pipeline.history_cap {
            return Err(invalid(
                "pipeline.history_window",
                "must not exceed pipeline.history_cap",
            ));
        }
        if self.pipeline.min_speech_ms > self.pipeline.fallback_min_audio_ms {
            return Err(invalid(
                "pipeline.min_speech_ms",
                "must not exceed pipeline.fallback_min_audio_ms",
            ));
        }

        let seg = &self.segmenter;
        if seg.first_chunk_chars == 0 || seg.first_chunk_chars > seg.chunk_chars {
            return Err(invalid(
                "segmenter.first_chunk_chars",
                "must be positive and not exceed segmenter.chunk_chars",
            ));
        }
        if seg.quote_ceiling_chars <= seg.chunk_chars {
            return Err(invalid(
                "segmenter.quote_ceiling_chars",
                "must exceed segmenter.chunk_chars",
            ));
        }
        if seg.terminators.is_empty() {
            return Err(invalid("segmenter.terminators", "must not be empty"));
        }

        check_providers(
            "recognition",
            Capability::Recognition,
            self.recognition.primary,
            self.recognition.secondary,
        )?;
        check_providers(
            "generation",
            Capability::Generation,
            self.generation.primary,
            self.generation.secondary,
        )?;
        check_providers(
            "synthesis",
            Capability::Synthesis,
            self.synthesis.primary,
            self.synthesis.secondary,
        )?;

        Ok(())
    }

    /// Name of the environment variable holding the API key for a provider.
    pub fn api_key_env(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Openai => Some(&self.providers.openai.api_key_env),
            ProviderKind::Groq => Some(&self.providers.groq.api_key_env),
            ProviderKind::Elevenlabs => Some(&self.providers.elevenlabs.api_key_env),
            ProviderKind::Mock => None,
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            TalkbackError::Other("Could not determine config directory".to_string())
        })?;
        Ok(base.join("talkback").join("config.toml"))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TalkbackError::ConfigParse {
            message: e.to_string(),
        })
    }
}

fn invalid(key: &str, message: &str) -> TalkbackError {
    TalkbackError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn check_providers(
    section: &str,
    capability: Capability,
    primary: ProviderKind,
    secondary: Option<ProviderKind>,
) -> Result<()> {
    if !primary.supports(capability) {
        return Err(invalid(
            &format!("{section}.primary"),
            &format!("{primary} does not provide {capability}"),
        ));
    }
    if let Some(secondary) = secondary {
        if !secondary.supports(capability) {
            return Err(invalid(
                &format!("{section}.secondary"),
                &format!("{secondary} does not provide {capability}"),
            ));
        }
        if secondary == primary {
            return Err(invalid(
                &format!("{section}.secondary"),
                "must differ from the primary provider",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_talkback_env() {
        remove_env("TALKBACK_BIND");
        remove_env("TALKBACK_SYSTEM_PROMPT");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.bind, "0.0.0.0:8765");
        assert_eq!(config.pipeline.silence_threshold_ms, 700);
        assert_eq!(config.pipeline.silence_poll_ms, 200);
        assert_eq!(config.pipeline.partial_every_frames, 10);
        assert_eq!(config.pipeline.partial_interval_ms, 500);
        assert_eq!(config.pipeline.history_cap, 10);
        assert_eq!(config.pipeline.history_window, 8);

        assert_eq!(config.segmenter.first_chunk_chars, 30);
        assert_eq!(config.segmenter.chunk_chars, 50);
        assert_eq!(config.segmenter.quote_ceiling_chars, 150);

        assert_eq!(config.recognition.primary, ProviderKind::Groq);
        assert_eq!(config.recognition.secondary, Some(ProviderKind::Openai));
        assert_eq!(config.recognition.final_timeout_ms, 7000);
        assert_eq!(config.synthesis.primary, ProviderKind::Elevenlabs);
        assert_eq!(config.fallback.max_consecutive_failures, 3);
        assert_eq!(config.messages.inaudible_marker, "[Inaudible Audio]");
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [pipeline]
            silence_threshold_ms = 900

            [recognition]
            primary = "openai"
            secondary = "groq"
            language = "hi"

            [synthesis]
            primary = "mock"

            [providers.elevenlabs]
            voice_id = "custom-voice"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.pipeline.silence_threshold_ms, 900);
        assert_eq!(config.recognition.primary, ProviderKind::Openai);
        assert_eq!(config.recognition.secondary, Some(ProviderKind::Groq));
        assert_eq!(config.recognition.language.as_deref(), Some("hi"));
        assert_eq!(config.synthesis.primary, ProviderKind::Mock);
        assert_eq!(config.providers.elevenlabs.voice_id, "custom-voice");
        assert_eq!(config.providers.elevenlabs.model, "eleven_turbo_v2_5");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [segmenter]
            chunk_chars = 60
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.segmenter.chunk_chars, 60);
        assert_eq!(config.segmenter.first_chunk_chars, 30);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.pipeline, PipelineSettings::default());
    }

    #[test]
    fn test_env_override_bind() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_BIND", "127.0.0.1:1234");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.bind, "127.0.0.1:1234");
        assert_eq!(config.generation.system_prompt, defaults::SYSTEM_PROMPT);

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_system_prompt() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_SYSTEM_PROMPT", "Be brief.");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.generation.system_prompt, "Be brief.");

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_BIND", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.bind, defaults::BIND_ADDRESS);

        clear_talkback_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [server
            bind = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(TalkbackError::Config(_))));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let temp_file = write_config(
            r#"
            [recognition]
            primary = "whisper-local"
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_talkback_config() {
        let path = Config::default_path().unwrap();

        assert!(path.ends_with("talkback/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_talkback_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_config("[pipeline\nsilence = ");

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_silence_threshold() {
        let mut config = Config::default();
        config.pipeline.silence_threshold_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.silence_threshold_ms"));
    }

    #[test]
    fn test_validate_rejects_first_chunk_longer_than_chunk() {
        let mut config = Config::default();
        config.segmenter.first_chunk_chars = 80;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("segmenter.first_chunk_chars"));
    }

    #[test]
    fn test_validate_rejects_window_larger_than_cap() {
        let mut config = Config::default();
        config.pipeline.history_window = 12;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_provider_without_capability() {
        let mut config = Config::default();
        config.synthesis.primary = ProviderKind::Groq;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("synthesis.primary"));

        let mut config = Config::default();
        config.recognition.secondary = Some(ProviderKind::Elevenlabs);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_primary_and_secondary() {
        let mut config = Config::default();
        config.generation.secondary = Some(ProviderKind::Groq);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secondary_none_disables_fallback() {
        let temp_file = write_config(
            r#"
            [generation]
            primary = "mock"
            secondary = "none"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.generation.primary, ProviderKind::Mock);
        assert_eq!(config.generation.secondary, None);
        assert_eq!(config.recognition.secondary, Some(ProviderKind::Openai));

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.generation.secondary, None);
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let config = Config::default();

        assert_eq!(config.api_key_env(ProviderKind::Mock), None);
        assert_eq!(
            config.api_key_env(ProviderKind::Groq),
            Some("GROQ_API_KEY")
        );
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed, config);
    }
}
