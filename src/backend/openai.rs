//! OpenAI-compatible providers (OpenAI and Groq speak the same API).

use crate::audio::{tail, wrap_wav};
use crate::backend::generator::{ChatMessage, Generator, TokenStream};
use crate::backend::http::{check_status, endpoint};
use crate::backend::recognizer::Recognizer;
use crate::backend::sse::{SseData, SseDecoder};
use crate::backend::synthesizer::{AudioStream, Synthesizer};
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Connection details shared by every OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Provider label used in logs and errors.
    pub name: String,
    pub base_url: String,
    pub api_key: String,
}

/// Speech recognition through `/audio/transcriptions`.
pub struct OpenAiRecognizer {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    language: Option<String>,
    prompt: Option<String>,
    sample_rate: u32,
    partial_window_secs: u32,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiRecognizer {
    pub fn new(client: reqwest::Client, endpoint: Endpoint, model: &str, sample_rate: u32) -> Self {
        Self {
            client,
            endpoint,
            model: model.to_string(),
            language: None,
            prompt: None,
            sample_rate,
            partial_window_secs: crate::defaults::PARTIAL_WINDOW_SECS,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_partial_window_secs(mut self, secs: u32) -> Self {
        self.partial_window_secs = secs;
        self
    }

    async fn transcribe(&self, audio: &[i16]) -> Result<Option<String>> {
        let wav = wrap_wav(audio, self.sample_rate)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json")
            .text("temperature", "0");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let response = self
            .client
            .post(endpoint(&self.endpoint.base_url, "audio/transcriptions"))
            .bearer_auth(&self.endpoint.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(&self.endpoint.name, response).await?;
        let body: TranscriptionResponse = response.json().await?;

        let text = body.text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

#[async_trait]
impl Recognizer for OpenAiRecognizer {
    async fn transcribe_partial(&self, audio: &[i16]) -> Result<Option<String>> {
        let window = tail(audio, self.sample_rate, self.partial_window_secs);
        self.transcribe(window).await
    }

    async fn transcribe_final(&self, audio: &[i16]) -> Result<Option<String>> {
        self.transcribe(audio).await
    }

    fn name(&self) -> &str {
        &self.endpoint.name
    }
}

/// Sampling parameters for chat completions.
#[derive(Debug, Clone)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

/// Streaming chat completions through `/chat/completions`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    system_prompt: String,
    sampling: Sampling,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Extract the content delta from one streamed completion chunk.
pub fn parse_chat_delta(payload: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

struct TokenState<S> {
    bytes: S,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    done: bool,
    backend: String,
}

impl OpenAiGenerator {
    pub fn new(
        client: reqwest::Client,
        endpoint: Endpoint,
        model: &str,
        system_prompt: &str,
        sampling: Sampling,
    ) -> Self {
        Self {
            client,
            endpoint,
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            sampling,
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, history: &[ChatMessage], message: &str) -> Result<TokenStream> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(message));

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: self.sampling.top_p,
        };
        let response = self
            .client
            .post(endpoint(&self.endpoint.base_url, "chat/completions"))
            .bearer_auth(&self.endpoint.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(&self.endpoint.name, response).await?;

        let state = TokenState {
            bytes: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            done: false,
            backend: self.endpoint.name.clone(),
        };

        let tokens = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(token) = state.ready.pop_front() {
                    return Some((Ok(token), state));
                }
                if state.done {
                    return None;
                }
                let events = match state.bytes.next().await {
                    Some(Ok(bytes)) => state.decoder.push(&bytes),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(TalkbackError::from(e)), state));
                    }
                    None => {
                        state.done = true;
                        state.decoder.finish().into_iter().collect()
                    }
                };
                for event in events {
                    match event {
                        SseData::Done => state.done = true,
                        SseData::Payload(payload) => match parse_chat_delta(&payload) {
                            Ok(Some(token)) => state.ready.push_back(token),
                            Ok(None) => {}
                            Err(e) => {
                                tracing::debug!(backend = %state.backend, "Skipping unparseable chunk: {}", e)
                            }
                        },
                    }
                }
            }
        });

        Ok(Box::pin(tokens))
    }

    fn name(&self) -> &str {
        &self.endpoint.name
    }
}

/// Speech synthesis through `/audio/speech` with raw PCM output.
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    voice: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl OpenAiSynthesizer {
    pub fn new(client: reqwest::Client, endpoint: Endpoint, model: &str, voice: &str) -> Self {
        Self {
            client,
            endpoint,
            model: model.to_string(),
            voice: voice.to_string(),
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
        };
        let response = self
            .client
            .post(endpoint(&self.endpoint.base_url, "audio/speech"))
            .bearer_auth(&self.endpoint.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(&self.endpoint.name, response).await?;

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map(|b| b.to_vec()).map_err(TalkbackError::from)
        })))
    }

    fn name(&self) -> &str {
        &self.endpoint.name
    }
}
