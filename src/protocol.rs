//! JSON message protocol spoken over the client WebSocket.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64-encoded 16 kHz mono 16-bit little-endian PCM
    AudioChunk { audio: String },
    /// The user started talking over the assistant
    Interrupt,
    /// The client believes the user stopped talking
    EndOfSpeech,
}

impl ClientMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Audio message carrying raw PCM bytes.
    pub fn audio(pcm: &[u8]) -> Self {
        ClientMessage::AudioChunk {
            audio: STANDARD.encode(pcm),
        }
    }
}

/// `status` field of a [`ServerMessage::State`] update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    /// A reply is being generated.
    Processing,
    /// A chunk of the reply is being spoken.
    Speaking,
    /// A chunk finished playing.
    Success,
    /// Speech failed; nothing is playing.
    Idle,
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TranscriptPartial { text: String },
    TranscriptFinal { text: String },
    LlmToken { token: String },
    /// Base64-encoded synthesized audio
    AudioChunk { audio: String },
    /// All audio for one speakable chunk has been sent
    AudioComplete,
    /// The assistant's reply for the turn is over
    ResponseComplete,
    State { message: String, status: StateStatus },
}

impl ServerMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Audio message carrying raw synthesized bytes.
    pub fn audio(bytes: &[u8]) -> Self {
        ServerMessage::AudioChunk {
            audio: STANDARD.encode(bytes),
        }
    }

    pub fn state(message: &str, status: StateStatus) -> Self {
        ServerMessage::State {
            message: message.to_string(),
            status,
        }
    }
}

/// Decode a base64 audio payload.
pub fn decode_audio(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload)
}
