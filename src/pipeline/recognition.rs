//! Recognition driver: buffers a turn's audio, echoes partial transcripts and
//! produces one final transcript per turn.

use crate::audio::duration_ms;
use crate::backend::{Recognizer, TranscriptFilter};
use crate::config::Config;
use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::latency::Milestone;
use crate::pipeline::session::SessionContext;
use crate::pipeline::stage::{Outbox, Stage, forward};
use crate::pipeline::types::{
    AudioFrame, GenerationInput, RecognitionInput, TranscriptEvent, TranscriptKind, TurnId,
};
use crate::protocol::ServerMessage;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tuning for [`RecognitionStage`].
#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub sample_rate: u32,
    pub partial_every_frames: usize,
    pub partial_interval: Duration,
    /// Shorter buffers are noise.
    pub min_speech_ms: u64,
    /// Buffers at least this long get the fallback utterance when nothing was understood.
    pub fallback_min_audio_ms: u64,
    pub min_transcript_chars: usize,
    pub fallback_utterance: String,
    pub inaudible_marker: String,
    pub filter: TranscriptFilter,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            partial_every_frames: defaults::PARTIAL_EVERY_FRAMES,
            partial_interval: Duration::from_millis(defaults::PARTIAL_INTERVAL_MS),
            min_speech_ms: defaults::MIN_SPEECH_MS,
            fallback_min_audio_ms: defaults::FALLBACK_MIN_AUDIO_MS,
            min_transcript_chars: defaults::MIN_TRANSCRIPT_CHARS,
            fallback_utterance: defaults::FALLBACK_UTTERANCE.to_string(),
            inaudible_marker: defaults::INAUDIBLE_MARKER.to_string(),
            filter: TranscriptFilter::new(defaults::HALLUCINATION_FILTERS),
        }
    }
}

impl RecognitionSettings {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            sample_rate: pipeline.sample_rate,
            partial_every_frames: pipeline.partial_every_frames,
            partial_interval: Duration::from_millis(pipeline.partial_interval_ms),
            min_speech_ms: pipeline.min_speech_ms,
            fallback_min_audio_ms: pipeline.fallback_min_audio_ms,
            min_transcript_chars: defaults::MIN_TRANSCRIPT_CHARS,
            fallback_utterance: config.messages.fallback_utterance.clone(),
            inaudible_marker: config.messages.inaudible_marker.clone(),
            filter: TranscriptFilter::new(&config.recognition.hallucination_filters),
        }
    }
}

pub struct RecognitionStage {
    ctx: Arc<SessionContext>,
    recognizer: Arc<dyn Recognizer>,
    settings: RecognitionSettings,
    outbox: Outbox,
    generation_tx: mpsc::Sender<GenerationInput>,

    /// Audio of `buffer_turn`. Owned by this stage alone.
    buffer: Vec<i16>,
    buffer_turn: TurnId,
    frames_since_partial: usize,
    last_partial_at: Option<Instant>,
    partial_task: Option<JoinHandle<()>>,
    /// Last partial text sent to the client, for deduplication.
    last_partial: Arc<Mutex<String>>,
    last_finalized: TurnId,
}

impl RecognitionStage {
    pub fn new(
        ctx: Arc<SessionContext>,
        recognizer: Arc<dyn Recognizer>,
        settings: RecognitionSettings,
        outbox: Outbox,
        generation_tx: mpsc::Sender<GenerationInput>,
    ) -> Self {
        Self {
            ctx,
            recognizer,
            settings,
            outbox,
            generation_tx,
            buffer: Vec::new(),
            buffer_turn: 0,
            frames_since_partial: 0,
            last_partial_at: None,
            partial_task: None,
            last_partial: Arc::new(Mutex::new(String::new())),
            last_finalized: 0,
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if frame.turn_id != self.buffer_turn {
            self.clear();
            self.buffer_turn = frame.turn_id;
        }
        self.buffer.extend_from_slice(&frame.samples);
        self.frames_since_partial += 1;
        self.maybe_request_partial(frame.received_at);
    }

    fn partial_in_flight(&self) -> bool {
        self.partial_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn maybe_request_partial(&mut self, now: Instant) {
        if self.frames_since_partial < self.settings.partial_every_frames
            || self.partial_in_flight()
            || self.ctx.is_speaking()
        {
            return;
        }
        if let Some(last) = self.last_partial_at
            && now.saturating_duration_since(last) < self.settings.partial_interval
        {
            return;
        }

        self.frames_since_partial = 0;
        self.last_partial_at = Some(now);

        let turn_id = self.buffer_turn;
        let audio = self.buffer.clone();
        let recognizer = self.recognizer.clone();
        let ctx = self.ctx.clone();
        let outbox = self.outbox.clone();
        let last_partial = self.last_partial.clone();
        let min_chars = self.settings.min_transcript_chars;

        self.partial_task = Some(tokio::spawn(async move {
            let text = match recognizer.transcribe_partial(&audio).await {
                Ok(Some(text)) => text.trim().to_string(),
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(turn = turn_id, error = %e, "Partial transcription failed");
                    return;
                }
            };
            if text.chars().count() < min_chars || ctx.is_speaking() {
                return;
            }
            {
                let mut last = match last_partial.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if *last == text {
                    return;
                }
                last.clone_from(&text);
            }

            ctx.mark(turn_id, Milestone::FirstPartial);
            tracing::debug!(turn = turn_id, text = %text, "Partial transcript");
            if outbox.send(ServerMessage::TranscriptPartial { text }).await.is_err() {
                tracing::trace!(turn = turn_id, "Partial dropped, client gone");
            }
        }));
    }

    fn cancel_partial(&mut self) {
        if let Some(task) = self.partial_task.take() {
            task.abort();
        }
    }

    /// Drop the buffered audio and partial state.
    fn clear(&mut self) {
        self.cancel_partial();
        self.buffer.clear();
        self.frames_since_partial = 0;
        self.last_partial_at = None;
        if let Ok(mut last) = self.last_partial.lock() {
            last.clear();
        }
    }

    async fn finalize(&mut self, turn_id: TurnId) -> Result<(), StationError> {
        self.cancel_partial();
        if turn_id <= self.last_finalized {
            tracing::debug!(turn = turn_id, "Duplicate terminator ignored");
            return Ok(());
        }
        self.last_finalized = turn_id;

        let audio = if self.buffer_turn == turn_id {
            std::mem::take(&mut self.buffer)
        } else {
            Vec::new()
        };
        self.clear();

        let audio_ms = duration_ms(audio.len(), self.settings.sample_rate);
        if audio_ms < self.settings.min_speech_ms {
            tracing::debug!(turn = turn_id, audio_ms, "Discarding noise");
            return Ok(());
        }

        self.ctx.set_finalizing(true);
        let result = self.recognizer.transcribe_final(&audio).await;
        self.ctx.set_finalizing(false);

        let text = match result {
            Ok(Some(raw)) => self.settings.filter.apply(&raw),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(turn = turn_id, error = %e, "Final transcription failed");
                None
            }
        }
        .filter(|t| t.chars().count() >= self.settings.min_transcript_chars);

        match text {
            Some(text) => {
                self.ctx.mark(turn_id, Milestone::FinalTranscript);
                tracing::info!(turn = turn_id, audio_ms, text = %text, "Final transcript");
                self.outbox
                    .send(ServerMessage::TranscriptFinal { text: text.clone() })
                    .await?;
                let event = TranscriptEvent {
                    turn_id,
                    kind: TranscriptKind::Final,
                    text,
                    timestamp: self.ctx.now(),
                };
                forward(
                    &self.generation_tx,
                    GenerationInput::Transcript(event),
                    "generation",
                )
                .await
            }
            None if audio_ms >= self.settings.fallback_min_audio_ms => {
                tracing::info!(turn = turn_id, audio_ms, "Nothing understood, asking to repeat");
                self.outbox
                    .send(ServerMessage::TranscriptFinal {
                        text: self.settings.inaudible_marker.clone(),
                    })
                    .await?;
                let canned = GenerationInput::Canned {
                    turn_id,
                    text: self.settings.fallback_utterance.clone(),
                };
                forward(&self.generation_tx, canned, "generation").await
            }
            None => {
                tracing::debug!(turn = turn_id, audio_ms, "Short unintelligible audio dropped");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Stage for RecognitionStage {
    type Input = RecognitionInput;

    async fn process(&mut self, input: RecognitionInput) -> Result<(), StationError> {
        match input {
            RecognitionInput::Frame(frame) => {
                self.on_frame(frame);
                Ok(())
            }
            RecognitionInput::EndOfUtterance { turn_id } => self.finalize(turn_id).await,
            RecognitionInput::Reset => {
                tracing::debug!(
                    turn = self.buffer_turn,
                    samples = self.buffer.len(),
                    "Recognition buffer reset"
                );
                self.clear();
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "recognition"
    }

    async fn shutdown(&mut self) {
        self.cancel_partial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockRecognizer, MockReply};

    const SECOND: usize = 16000;

    struct Harness {
        stage: RecognitionStage,
        recognizer: Arc<MockRecognizer>,
        outbox_rx: mpsc::Receiver<ServerMessage>,
        generation_rx: mpsc::Receiver<GenerationInput>,
    }

    fn harness(recognizer: MockRecognizer) -> Harness {
        let ctx = Arc::new(SessionContext::new(1, 10));
        let recognizer = Arc::new(recognizer);
        let (outbox_tx, outbox_rx) = mpsc::channel(32);
        let (generation_tx, generation_rx) = mpsc::channel(8);
        let stage = RecognitionStage::new(
            ctx,
            recognizer.clone(),
            RecognitionSettings::default(),
            Outbox::new(outbox_tx),
            generation_tx,
        );
        Harness {
            stage,
            recognizer,
            outbox_rx,
            generation_rx,
        }
    }

    fn frame(turn_id: TurnId, samples: usize) -> RecognitionInput {
        RecognitionInput::Frame(AudioFrame {
            turn_id,
            samples: vec![100; samples],
            received_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_final_transcript_is_forwarded_once() {
        let mut h = harness(MockRecognizer::new("mock").with_response("hello there"));

        h.stage.process(frame(1, SECOND)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 1);
        assert_eq!(
            h.outbox_rx.try_recv().unwrap(),
            ServerMessage::TranscriptFinal {
                text: "hello there".to_string()
            }
        );
        match h.generation_rx.try_recv().unwrap() {
            GenerationInput::Transcript(event) => {
                assert_eq!(event.turn_id, 1);
                assert_eq!(event.kind, TranscriptKind::Final);
                assert_eq!(event.text, "hello there");
            }
            other => panic!("Expected transcript, got {:?}", other),
        }
        assert!(h.generation_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_short_buffer_is_noise() {
        let mut h = harness(MockRecognizer::new("mock"));

        // 100ms of audio
        h.stage.process(frame(1, SECOND / 10)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 0);
        assert!(h.outbox_rx.try_recv().is_err());
        assert!(h.generation_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unintelligible_long_audio_asks_to_repeat() {
        let mut h = harness(MockRecognizer::new("mock").then_reply(MockReply::Nothing));

        h.stage.process(frame(1, SECOND)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(
            h.outbox_rx.try_recv().unwrap(),
            ServerMessage::TranscriptFinal {
                text: defaults::INAUDIBLE_MARKER.to_string()
            }
        );
        assert_eq!(
            h.generation_rx.try_recv().unwrap(),
            GenerationInput::Canned {
                turn_id: 1,
                text: defaults::FALLBACK_UTTERANCE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recognition_failure_on_long_audio_asks_to_repeat() {
        let mut h = harness(MockRecognizer::new("mock").with_failure());

        h.stage.process(frame(1, SECOND)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert!(matches!(
            h.generation_rx.try_recv(),
            Ok(GenerationInput::Canned { turn_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_hallucination_on_medium_audio_is_dropped() {
        let mut h = harness(MockRecognizer::new("mock").with_response("Thanks for watching!"));

        // 500ms: real speech, but below the fallback length
        h.stage.process(frame(1, SECOND / 2)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 1);
        assert!(h.outbox_rx.try_recv().is_err());
        assert!(h.generation_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_discards_buffer() {
        let mut h = harness(MockRecognizer::new("mock"));

        h.stage.process(frame(1, SECOND)).await.unwrap();
        h.stage.process(RecognitionInput::Reset).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 0);
        assert!(h.generation_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_turn_starts_with_empty_buffer() {
        let mut h = harness(MockRecognizer::new("mock"));

        h.stage.process(frame(1, SECOND)).await.unwrap();
        h.stage.process(frame(2, SECOND / 10)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 2 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 0, "turn 2 only has 100ms");
    }

    #[tokio::test]
    async fn test_stale_terminator_is_ignored() {
        let mut h = harness(MockRecognizer::new("mock"));

        h.stage.process(frame(2, SECOND)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 2 })
            .await
            .unwrap();
        h.stage.process(frame(3, SECOND)).await.unwrap();
        h.stage
            .process(RecognitionInput::EndOfUtterance { turn_id: 1 })
            .await
            .unwrap();

        assert_eq!(h.recognizer.final_calls(), 1);
    }

    #[tokio::test]
    async fn test_partials_are_throttled_and_deduplicated() {
        let mut h = harness(MockRecognizer::new("mock").with_partial("hello"));

        for _ in 0..10 {
            h.stage.process(frame(1, 320)).await.unwrap();
        }
        h.stage.partial_task.take().unwrap().await.unwrap();

        assert_eq!(h.recognizer.partial_calls(), 1);
        assert_eq!(
            h.outbox_rx.try_recv().unwrap(),
            ServerMessage::TranscriptPartial {
                text: "hello".to_string()
            }
        );

        // Ten more frames, but the interval since the last partial has not elapsed.
        for _ in 0..10 {
            h.stage.process(frame(1, 320)).await.unwrap();
        }
        assert_eq!(h.recognizer.partial_calls(), 1);

        // Force the interval to have elapsed; the same text is not resent.
        h.stage.last_partial_at = Some(Instant::now() - Duration::from_secs(1));
        h.stage.process(frame(1, 320)).await.unwrap();
        h.stage.partial_task.take().unwrap().await.unwrap();

        assert_eq!(h.recognizer.partial_calls(), 2);
        assert!(h.outbox_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_partials_while_speaking() {
        let mut h = harness(MockRecognizer::new("mock").with_partial("hello"));
        h.stage.ctx.set_speaking(true);

        for _ in 0..20 {
            h.stage.process(frame(1, 320)).await.unwrap();
        }

        assert!(h.stage.partial_task.is_none());
        assert_eq!(h.recognizer.partial_calls(), 0);
    }

    #[tokio::test]
    async fn test_partials_resume_after_barge_in() {
        let mut h = harness(MockRecognizer::new("mock").with_partial("wait"));
        // The previous reply was interrupted; the flag stays set until the
        // next turn reaches generation.
        h.stage.ctx.interrupt();

        for _ in 0..10 {
            h.stage.process(frame(2, 320)).await.unwrap();
        }
        h.stage.partial_task.take().unwrap().await.unwrap();

        assert_eq!(h.recognizer.partial_calls(), 1);
        assert_eq!(
            h.outbox_rx.try_recv().unwrap(),
            ServerMessage::TranscriptPartial {
                text: "wait".to_string()
            }
        );
    }
}
