//! Synthesis driver: speaks chunks in order and streams audio to the client.

use crate::backend::Synthesizer;
use crate::config::Config;
use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::latency::{LatencyTracker, Milestone};
use crate::pipeline::session::SessionContext;
use crate::pipeline::stage::{Outbox, Stage};
use crate::pipeline::types::{SpeakableChunk, SynthesisInput, TurnId};
use crate::protocol::{ServerMessage, StateStatus};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Tuning for [`SynthesisStage`].
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub first_fragment_timeout: Duration,
    pub fragment_timeout: Duration,
    pub speaking_message: String,
    pub finished_message: String,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            first_fragment_timeout: Duration::from_millis(defaults::FIRST_FRAGMENT_TIMEOUT_MS),
            fragment_timeout: Duration::from_millis(defaults::FRAGMENT_TIMEOUT_MS),
            speaking_message: "Speaking...".to_string(),
            finished_message: "Finished speaking".to_string(),
        }
    }
}

impl SynthesisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            first_fragment_timeout: Duration::from_millis(
                config.synthesis.first_fragment_timeout_ms,
            ),
            fragment_timeout: Duration::from_millis(config.synthesis.fragment_timeout_ms),
            speaking_message: config.messages.speaking_message.clone(),
            finished_message: config.messages.finished_message.clone(),
        }
    }
}

/// How speaking one chunk ended.
#[derive(Debug, PartialEq, Eq)]
enum Playback {
    Finished,
    Interrupted,
    Failed,
}

pub struct SynthesisStage {
    ctx: Arc<SessionContext>,
    synthesizer: Arc<dyn Synthesizer>,
    settings: SynthesisSettings,
    outbox: Outbox,
    latency: LatencyTracker,
}

impl SynthesisStage {
    pub fn new(
        ctx: Arc<SessionContext>,
        synthesizer: Arc<dyn Synthesizer>,
        settings: SynthesisSettings,
        outbox: Outbox,
    ) -> Self {
        Self {
            ctx,
            synthesizer,
            settings,
            outbox,
            latency: LatencyTracker::new(),
        }
    }

    async fn on_chunk(&mut self, chunk: SpeakableChunk) -> Result<(), StationError> {
        if self.ctx.is_interrupted() {
            tracing::debug!(turn = chunk.turn_id, seq = chunk.seq, "Discarding chunk after interrupt");
            return Ok(());
        }

        self.ctx.set_speaking(true);
        self.outbox
            .send(ServerMessage::state(
                &self.settings.speaking_message,
                StateStatus::Speaking,
            ))
            .await?;

        match self.play(&chunk).await? {
            Playback::Finished => {
                self.outbox.send(ServerMessage::AudioComplete).await?;
                self.outbox
                    .send(ServerMessage::state(
                        &self.settings.finished_message,
                        StateStatus::Success,
                    ))
                    .await
            }
            Playback::Interrupted => {
                tracing::info!(turn = chunk.turn_id, seq = chunk.seq, "Playback interrupted");
                Ok(())
            }
            Playback::Failed => {
                self.outbox
                    .send(ServerMessage::state(
                        &self.settings.finished_message,
                        StateStatus::Idle,
                    ))
                    .await
            }
        }
    }

    /// Stream one chunk's audio, checking the interrupt flag between fragments.
    async fn play(&mut self, chunk: &SpeakableChunk) -> Result<Playback, StationError> {
        let mut audio = match self.synthesizer.synthesize(&chunk.text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(turn = chunk.turn_id, seq = chunk.seq, error = %e, "Synthesis failed");
                return Ok(Playback::Failed);
            }
        };

        let mut fragments = 0usize;
        loop {
            let limit = if fragments == 0 {
                self.settings.first_fragment_timeout
            } else {
                self.settings.fragment_timeout
            };
            let fragment = match tokio::time::timeout(limit, audio.next()).await {
                Ok(Some(Ok(fragment))) => fragment,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!(turn = chunk.turn_id, seq = chunk.seq, error = %e, "Synthesis stream failed");
                    return Ok(Playback::Failed);
                }
                Err(_) => {
                    tracing::warn!(
                        turn = chunk.turn_id,
                        seq = chunk.seq,
                        after_ms = limit.as_millis() as u64,
                        "Synthesis stalled"
                    );
                    return Ok(Playback::Failed);
                }
            };

            if self.ctx.is_interrupted() {
                return Ok(Playback::Interrupted);
            }
            if fragment.is_empty() {
                continue;
            }
            if self.ctx.mark(chunk.turn_id, Milestone::FirstAudio) {
                tracing::debug!(turn = chunk.turn_id, "First audio");
            }
            fragments += 1;
            self.outbox.send(ServerMessage::audio(&fragment)).await?;
        }

        tracing::debug!(turn = chunk.turn_id, seq = chunk.seq, fragments, "Chunk spoken");
        Ok(Playback::Finished)
    }

    async fn on_end_of_turn(
        &mut self,
        turn_id: TurnId,
        ack: Option<oneshot::Sender<()>>,
    ) -> Result<(), StationError> {
        self.ctx.set_speaking(false);
        let sent = self.outbox.send(ServerMessage::ResponseComplete).await;

        self.ctx.mark(turn_id, Milestone::Completed);
        if let Some(timing) = self.ctx.finish_metrics(turn_id) {
            self.latency.log_turn(&timing);
            self.latency.record(timing);
        }
        if let Some(ack) = ack
            && ack.send(()).is_err()
        {
            tracing::debug!(turn = turn_id, "Generation stopped before the turn ended");
        }
        sent
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    type Input = SynthesisInput;

    async fn process(&mut self, input: SynthesisInput) -> Result<(), StationError> {
        match input {
            SynthesisInput::Chunk(chunk) => self.on_chunk(chunk).await,
            SynthesisInput::EndOfTurn { turn_id, ack } => self.on_end_of_turn(turn_id, ack).await,
        }
    }

    fn name(&self) -> &'static str {
        "synthesis"
    }

    async fn shutdown(&mut self) {
        self.latency.log_summary();
    }
}
