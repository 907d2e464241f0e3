//! ElevenLabs streaming text-to-speech.

use crate::backend::http::{check_status, endpoint};
use crate::backend::openai::Endpoint;
use crate::backend::synthesizer::{AudioStream, Synthesizer};
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

/// Voice tuning sent with every request.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    voice_id: String,
    settings: VoiceSettings,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

impl ElevenLabsSynthesizer {
    pub fn new(
        client: reqwest::Client,
        endpoint: Endpoint,
        model: &str,
        voice_id: &str,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            client,
            endpoint,
            model: model.to_string(),
            voice_id: voice_id.to_string(),
            settings,
        }
    }

    fn stream_url(&self) -> String {
        endpoint(
            &self.endpoint.base_url,
            &format!(
                "v1/text-to-speech/{}/stream?output_format=pcm_16000",
                self.voice_id
            ),
        )
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let request = SpeechRequest {
            text,
            model_id: &self.model,
            voice_settings: &self.settings,
        };
        let response = self
            .client
            .post(self.stream_url())
            .header("xi-api-key", &self.endpoint.api_key)
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
