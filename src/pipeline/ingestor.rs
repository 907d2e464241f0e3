//! Audio ingestor: turns client messages into recognition input.

use crate::audio::{calculate_rms, decode_pcm16le};
use crate::pipeline::error::StationError;
use crate::pipeline::latency::Milestone;
use crate::pipeline::session::SessionContext;
use crate::pipeline::stage::{Stage, forward};
use crate::pipeline::types::{AudioFrame, RecognitionInput};
use crate::protocol::{ClientMessage, decode_audio};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// First stage of a session. Consumes raw text frames from the socket.
pub struct IngestorStage {
    ctx: Arc<SessionContext>,
    recognition_tx: mpsc::Sender<RecognitionInput>,
    frames: u64,
}

impl IngestorStage {
    pub fn new(ctx: Arc<SessionContext>, recognition_tx: mpsc::Sender<RecognitionInput>) -> Self {
        Self {
            ctx,
            recognition_tx,
            frames: 0,
        }
    }

    async fn on_audio(&mut self, payload: &str) -> Result<(), StationError> {
        let bytes = decode_audio(payload)
            .map_err(|e| StationError::Recoverable(format!("bad audio payload: {e}")))?;
        let samples = decode_pcm16le(&bytes)?;
        if samples.is_empty() {
            return Ok(());
        }

        let now = self.ctx.now();
        let (turn_id, is_new) = self.ctx.turns().on_frame(now);
        if is_new {
            self.ctx.begin_metrics(turn_id, now);
            tracing::info!(turn = turn_id, "Turn started");
        }

        self.frames += 1;
        tracing::trace!(
            turn = turn_id,
            samples = samples.len(),
            rms = calculate_rms(&samples),
            "Audio frame"
        );

        let frame = AudioFrame {
            turn_id,
            samples,
            received_at: now,
        };
        forward(
            &self.recognition_tx,
            RecognitionInput::Frame(frame),
            "recognition",
        )
        .await
    }

    async fn on_end_of_speech(&mut self) -> Result<(), StationError> {
        let Some(turn_id) = self.ctx.turns().request_terminator() else {
            tracing::debug!("End of speech without an open turn");
            return Ok(());
        };
        self.ctx.mark(turn_id, Milestone::UtteranceEnd);
        tracing::debug!(turn = turn_id, "Client signalled end of speech");
        forward(
            &self.recognition_tx,
            RecognitionInput::EndOfUtterance { turn_id },
            "recognition",
        )
        .await
    }

    async fn on_interrupt(&mut self) -> Result<(), StationError> {
        let status = self.ctx.status();
        self.ctx.interrupt();
        self.ctx.set_speaking(false);
        self.ctx.turns().reset_idle();
        tracing::info!(?status, "Interrupted by client");
        forward(&self.recognition_tx, RecognitionInput::Reset, "recognition").await
    }
}

#[async_trait]
impl Stage for IngestorStage {
    type Input = String;

    async fn process(&mut self, input: String) -> Result<(), StationError> {
        let message = match ClientMessage::from_json(&input) {
            Ok(message) => message,
            Err(e) => {
                // Malformed messages never end the session.
                tracing::warn!(error = %e, "Skipping malformed client message");
                return Ok(());
            }
        };

        match message {
            ClientMessage::AudioChunk { audio } => self.on_audio(&audio).await,
            ClientMessage::EndOfSpeech => self.on_end_of_speech().await,
            ClientMessage::Interrupt => self.on_interrupt().await,
        }
    }

    fn name(&self) -> &'static str {
        "ingestor"
    }

    async fn shutdown(&mut self) {
        tracing::debug!(frames = self.frames, "Client stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encode_pcm16le;

    fn audio_json(samples: &[i16]) -> String {
        ClientMessage::audio(&encode_pcm16le(samples))
            .to_json()
            .unwrap()
    }

    fn setup() -> (
        IngestorStage,
        Arc<SessionContext>,
        mpsc::Receiver<RecognitionInput>,
    ) {
        let ctx = Arc::new(SessionContext::new(1, 10));
        let (tx, rx) = mpsc::channel(16);
        (IngestorStage::new(ctx.clone(), tx), ctx, rx)
    }

    #[tokio::test]
    async fn test_first_frame_opens_turn_and_is_forwarded() {
        let (mut stage, ctx, mut rx) = setup();

        stage.process(audio_json(&[1, 2, 3])).await.unwrap();
        stage.process(audio_json(&[4])).await.unwrap();

        for expected in [vec![1, 2, 3], vec![4]] {
            match rx.try_recv().unwrap() {
                RecognitionInput::Frame(frame) => {
                    assert_eq!(frame.turn_id, 1);
                    assert_eq!(frame.samples, expected);
                }
                other => panic!("Expected frame, got {:?}", other),
            }
        }
        assert!(ctx.timing(1).is_some());
    }

    #[tokio::test]
    async fn test_end_of_speech_sends_one_terminator() {
        let (mut stage, _ctx, mut rx) = setup();
        let end = r#"{"type":"end_of_speech"}"#.to_string();

        stage.process(audio_json(&[1])).await.unwrap();
        stage.process(end.clone()).await.unwrap();
        stage.process(end).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(RecognitionInput::Frame(_))));
        assert!(matches!(
            rx.try_recv(),
            Ok(RecognitionInput::EndOfUtterance { turn_id: 1 })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_next_frame_after_terminator_opens_new_turn() {
        let (mut stage, ctx, mut rx) = setup();

        stage.process(audio_json(&[1])).await.unwrap();
        stage
            .process(r#"{"type":"end_of_speech"}"#.to_string())
            .await
            .unwrap();
        stage.process(audio_json(&[2])).await.unwrap();

        let _ = rx.try_recv();
        let _ = rx.try_recv();
        match rx.try_recv().unwrap() {
            RecognitionInput::Frame(frame) => assert_eq!(frame.turn_id, 2),
            other => panic!("Expected frame, got {:?}", other),
        }
        assert_eq!(ctx.turns().current(), 2);
    }

    #[tokio::test]
    async fn test_interrupt_sets_flag_and_resets_recognition() {
        let (mut stage, ctx, mut rx) = setup();
        ctx.set_speaking(true);

        stage.process(audio_json(&[1])).await.unwrap();
        stage
            .process(r#"{"type":"interrupt"}"#.to_string())
            .await
            .unwrap();

        assert!(ctx.is_interrupted());
        assert!(!ctx.is_speaking());
        assert!(!ctx.turns().is_active());
        let _ = rx.try_recv();
        assert!(matches!(rx.try_recv(), Ok(RecognitionInput::Reset)));
    }

    #[tokio::test]
    async fn test_malformed_messages_are_skipped() {
        let (mut stage, _ctx, mut rx) = setup();

        stage.process("{not json".to_string()).await.unwrap();
        stage
            .process(r#"{"type":"unknown"}"#.to_string())
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_corrupt_audio_is_recoverable() {
        let (mut stage, _ctx, mut rx) = setup();

        let bad_base64 = r#"{"type":"audio_chunk","audio":"@@@"}"#.to_string();
        let odd_length = ClientMessage::audio(&[1, 2, 3]).to_json().unwrap();

        assert!(matches!(
            stage.process(bad_base64).await,
            Err(StationError::Recoverable(_))
        ));
        assert!(matches!(
            stage.process(odd_length).await,
            Err(StationError::Recoverable(_))
        ));
        assert!(rx.try_recv().is_err());
    }
}
