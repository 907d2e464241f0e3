//! Generation driver: final transcript in, speakable chunks out.
//!
//! Turns are serialized by the processing lock. The lock is taken when a
//! transcript is accepted and released only after synthesis has acknowledged
//! the turn's end, so the next turn's audio can never interleave with this one.

use crate::backend::{ChatMessage, Generator};
use crate::config::{Config, SegmenterConfig};
use crate::defaults;
use crate::error::TalkbackError;
use crate::pipeline::error::StationError;
use crate::pipeline::history::ConversationHistory;
use crate::pipeline::latency::Milestone;
use crate::pipeline::segmenter::Segmenter;
use crate::pipeline::session::SessionContext;
use crate::pipeline::stage::{Outbox, Stage, forward};
use crate::pipeline::types::{
    GenerationInput, SpeakableChunk, SynthesisInput, TranscriptEvent, TranscriptKind, TurnId,
};
use crate::protocol::{ServerMessage, StateStatus};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Tuning for [`GenerationStage`].
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Trailing history entries sent with each request.
    pub history_window: usize,
    pub segmenter: SegmenterConfig,
    pub first_token_timeout: Duration,
    pub token_timeout: Duration,
    pub apology: String,
    pub thinking_message: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            history_window: defaults::HISTORY_WINDOW,
            segmenter: SegmenterConfig::default(),
            first_token_timeout: Duration::from_millis(defaults::FIRST_TOKEN_TIMEOUT_MS),
            token_timeout: Duration::from_millis(defaults::TOKEN_TIMEOUT_MS),
            apology: defaults::APOLOGY_UTTERANCE.to_string(),
            thinking_message: "Thinking...".to_string(),
        }
    }
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_window: config.pipeline.history_window,
            segmenter: config.segmenter.clone(),
            first_token_timeout: Duration::from_millis(config.generation.first_token_timeout_ms),
            token_timeout: Duration::from_millis(config.generation.token_timeout_ms),
            apology: config.messages.apology.clone(),
            thinking_message: config.messages.thinking_message.clone(),
        }
    }
}

/// How a token loop ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Interrupted,
    Failed(TalkbackError),
}

pub struct GenerationStage {
    ctx: Arc<SessionContext>,
    generator: Arc<dyn Generator>,
    settings: GenerationSettings,
    segmenter: Segmenter,
    outbox: Outbox,
    synthesis_tx: mpsc::Sender<SynthesisInput>,
    /// Next chunk sequence number within the current turn.
    seq: u32,
}

impl GenerationStage {
    pub fn new(
        ctx: Arc<SessionContext>,
        generator: Arc<dyn Generator>,
        settings: GenerationSettings,
        outbox: Outbox,
        synthesis_tx: mpsc::Sender<SynthesisInput>,
    ) -> Self {
        let segmenter = Segmenter::new(&settings.segmenter);
        Self {
            ctx,
            generator,
            settings,
            segmenter,
            outbox,
            synthesis_tx,
            seq: 0,
        }
    }

    async fn on_transcript(&mut self, event: TranscriptEvent) -> Result<(), StationError> {
        if event.kind != TranscriptKind::Final {
            return Ok(());
        }
        let text = event.text.trim();
        if text.is_empty() {
            tracing::debug!(turn = event.turn_id, "Empty transcript, nothing to answer");
            return Ok(());
        }
        if !self.ctx.claim_turn(event.turn_id) {
            tracing::debug!(
                turn = event.turn_id,
                last = self.ctx.last_processed_turn(),
                "Stale transcript dropped"
            );
            return Ok(());
        }

        let ctx = self.ctx.clone();
        let mut history = ctx.lock_history().await;
        self.begin_turn();
        let result = self.respond(&mut history, event.turn_id, text).await;
        self.ctx.set_processing(false);
        result
    }

    async fn on_canned(&mut self, turn_id: TurnId, text: String) -> Result<(), StationError> {
        if !self.ctx.claim_turn(turn_id) {
            return Ok(());
        }

        let ctx = self.ctx.clone();
        let _history = ctx.lock_history().await;
        self.begin_turn();
        tracing::info!(turn = turn_id, text = %text, "Speaking canned response");
        let result = async {
            self.emit_chunk(turn_id, text).await?;
            self.end_turn(turn_id).await
        }
        .await;
        self.ctx.set_processing(false);
        result
    }

    fn begin_turn(&mut self) {
        self.ctx.clear_interrupt();
        self.ctx.set_processing(true);
        self.segmenter.reset();
        self.seq = 0;
    }

    async fn respond(
        &mut self,
        history: &mut ConversationHistory,
        turn_id: TurnId,
        text: &str,
    ) -> Result<(), StationError> {
        self.ctx.mark(turn_id, Milestone::GenerationStart);
        self.outbox
            .send(ServerMessage::state(
                &self.settings.thinking_message,
                StateStatus::Processing,
            ))
            .await?;

        let context = history.window(self.settings.history_window);
        history.push(ChatMessage::user(text));

        let (mut reply, outcome) = self.stream_reply(turn_id, &context, text).await?;
        match outcome {
            Outcome::Completed => {
                tracing::info!(turn = turn_id, chars = reply.chars().count(), "Reply generated");
            }
            Outcome::Interrupted => {
                tracing::info!(turn = turn_id, "Generation interrupted");
            }
            Outcome::Failed(e) => {
                tracing::warn!(turn = turn_id, error = %e, "Generation failed, apologizing");
                self.segmenter.reset();
                reply = self.settings.apology.clone();
                self.outbox
                    .send(ServerMessage::LlmToken {
                        token: reply.clone(),
                    })
                    .await?;
                self.emit_chunk(turn_id, reply.clone()).await?;
            }
        }

        if let Some(rest) = self.segmenter.flush() {
            self.emit_chunk(turn_id, rest).await?;
        }

        let reply = reply.trim();
        if !reply.is_empty() {
            history.push(ChatMessage::assistant(reply));
        }

        self.end_turn(turn_id).await
    }

    /// Pull tokens until the stream ends, fails, times out or is interrupted.
    async fn stream_reply(
        &mut self,
        turn_id: TurnId,
        context: &[ChatMessage],
        text: &str,
    ) -> Result<(String, Outcome), StationError> {
        let mut reply = String::new();
        let mut tokens = match self.generator.generate(context, text).await {
            Ok(tokens) => tokens,
            Err(e) => return Ok((reply, Outcome::Failed(e))),
        };

        let mut first = true;
        loop {
            let limit = if first {
                self.settings.first_token_timeout
            } else {
                self.settings.token_timeout
            };
            let next = match tokio::time::timeout(limit, tokens.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let e = TalkbackError::Timeout {
                        operation: format!("generation ({})", self.generator.name()),
                        after_ms: limit.as_millis() as u64,
                    };
                    return Ok((reply, Outcome::Failed(e)));
                }
            };
            let token = match next {
                None => return Ok((reply, Outcome::Completed)),
                Some(Ok(token)) => token,
                Some(Err(e)) => return Ok((reply, Outcome::Failed(e))),
            };

            // Dropping the stream cancels the backend request.
            if self.ctx.is_interrupted() {
                return Ok((reply, Outcome::Interrupted));
            }
            if first {
                self.ctx.mark(turn_id, Milestone::FirstToken);
                first = false;
            }

            reply.push_str(&token);
            let chunk = self.segmenter.push(&token);
            self.outbox.send(ServerMessage::LlmToken { token }).await?;
            if let Some(chunk) = chunk {
                self.emit_chunk(turn_id, chunk).await?;
            }
        }
    }

    async fn emit_chunk(&mut self, turn_id: TurnId, text: String) -> Result<(), StationError> {
        let chunk = SpeakableChunk {
            turn_id,
            seq: self.seq,
            text,
        };
        self.seq += 1;
        tracing::debug!(turn = turn_id, seq = chunk.seq, text = %chunk.text, "Speakable chunk");
        forward(&self.synthesis_tx, SynthesisInput::Chunk(chunk), "synthesis").await
    }

    /// Send the end-of-turn sentinel and wait until synthesis has drained the turn.
    async fn end_turn(&mut self, turn_id: TurnId) -> Result<(), StationError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let end = SynthesisInput::EndOfTurn {
            turn_id,
            ack: Some(ack_tx),
        };
        forward(&self.synthesis_tx, end, "synthesis").await?;
        ack_rx
            .await
            .map_err(|_| StationError::queue_closed("synthesis"))
    }
}

#[async_trait]
impl Stage for GenerationStage {
    type Input = GenerationInput;

    async fn process(&mut self, input: GenerationInput) -> Result<(), StationError> {
        match input {
            GenerationInput::Transcript(event) => self.on_transcript(event).await,
            GenerationInput::Canned { turn_id, text } => self.on_canned(turn_id, text).await,
        }
    }

    fn name(&self) -> &'static str {
        "generation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockGenerator, MockScript, Role};
    use std::time::Instant;
    use tokio::task::JoinHandle;

    struct Harness {
        stage: GenerationStage,
        ctx: Arc<SessionContext>,
        generator: Arc<MockGenerator>,
        outbox_rx: mpsc::Receiver<ServerMessage>,
        synthesis: JoinHandle<Vec<SynthesisInput>>,
    }

    /// Stand-in synthesis stage: records input and acknowledges turn ends.
    fn drain_synthesis(mut rx: mpsc::Receiver<SynthesisInput>) -> JoinHandle<Vec<SynthesisInput>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(input) = rx.recv().await {
                match input {
                    SynthesisInput::EndOfTurn { turn_id, ack } => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        seen.push(SynthesisInput::EndOfTurn { turn_id, ack: None });
                    }
                    chunk => seen.push(chunk),
                }
            }
            seen
        })
    }

    fn harness(generator: MockGenerator) -> Harness {
        let ctx = Arc::new(SessionContext::new(1, 10));
        let generator = Arc::new(generator);
        let (outbox_tx, outbox_rx) = mpsc::channel(256);
        let (synthesis_tx, synthesis_rx) = mpsc::channel(32);
        let stage = GenerationStage::new(
            ctx.clone(),
            generator.clone(),
            GenerationSettings::default(),
            Outbox::new(outbox_tx),
            synthesis_tx,
        );
        Harness {
            stage,
            ctx,
            generator,
            outbox_rx,
            synthesis: drain_synthesis(synthesis_rx),
        }
    }

    fn final_transcript(turn_id: TurnId, text: &str) -> GenerationInput {
        GenerationInput::Transcript(TranscriptEvent {
            turn_id,
            kind: TranscriptKind::Final,
            text: text.to_string(),
            timestamp: Instant::now(),
        })
    }

    async fn finish(h: Harness) -> (Vec<SynthesisInput>, Vec<ServerMessage>) {
        let Harness {
            stage,
            synthesis,
            mut outbox_rx,
            ..
        } = h;
        drop(stage);
        let inputs = synthesis.await.unwrap();
        let mut messages = Vec::new();
        while let Ok(msg) = outbox_rx.try_recv() {
            messages.push(msg);
        }
        (inputs, messages)
    }

    fn chunk_texts(inputs: &[SynthesisInput]) -> Vec<String> {
        inputs
            .iter()
            .filter_map(|i| match i {
                SynthesisInput::Chunk(c) => Some(c.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reply_is_segmented_and_terminated() {
        let mut h = harness(
            MockGenerator::new("mock")
                .then(MockScript::words("Hello there. How are you today, my friend?")),
        );

        h.stage.process(final_transcript(1, "hi")).await.unwrap();

        assert!(!h.ctx.is_processing());
        let (inputs, messages) = finish(h).await;
        assert_eq!(
            chunk_texts(&inputs),
            vec!["Hello there.", "How are you today,", "my friend?"]
        );
        let seqs: Vec<u32> = inputs
            .iter()
            .filter_map(|i| match i {
                SynthesisInput::Chunk(c) => Some(c.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(matches!(
            inputs.last(),
            Some(SynthesisInput::EndOfTurn { turn_id: 1, .. })
        ));
        assert_eq!(
            messages[0],
            ServerMessage::state("Thinking...", StateStatus::Processing)
        );
        let tokens = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::LlmToken { .. }))
            .count();
        assert_eq!(tokens, 8);
    }

    #[tokio::test]
    async fn test_history_records_both_sides() {
        let mut h = harness(MockGenerator::new("mock"));

        h.stage.process(final_transcript(1, "first")).await.unwrap();
        h.stage.process(final_transcript(2, "second")).await.unwrap();

        let requests = h.generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].history.is_empty());
        assert_eq!(
            requests[1].history,
            vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("You said: first.")
            ]
        );
        {
            let history = h.ctx.lock_history().await;
            assert_eq!(history.len(), 4);
            let last = history.entries().last().unwrap();
            assert_eq!(last.role, Role::Assistant);
        }
        finish(h).await;
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_turns_are_dropped() {
        let mut h = harness(MockGenerator::new("mock"));

        h.stage.process(final_transcript(2, "hello")).await.unwrap();
        h.stage.process(final_transcript(2, "hello")).await.unwrap();
        h.stage.process(final_transcript(1, "late")).await.unwrap();

        assert_eq!(h.generator.requests().len(), 1);
        finish(h).await;
    }

    #[tokio::test]
    async fn test_empty_transcript_never_reaches_generator() {
        let mut h = harness(MockGenerator::new("mock"));

        h.stage.process(final_transcript(1, "   ")).await.unwrap();

        assert!(h.generator.requests().is_empty());
        assert!(h.ctx.lock_history().await.is_empty());
        let (inputs, messages) = finish(h).await;
        assert!(inputs.is_empty());
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_partial_transcripts_are_ignored() {
        let mut h = harness(MockGenerator::new("mock"));

        h.stage
            .process(GenerationInput::Transcript(TranscriptEvent {
                turn_id: 1,
                kind: TranscriptKind::Partial,
                text: "hel".to_string(),
                timestamp: Instant::now(),
            }))
            .await
            .unwrap();

        assert!(h.generator.requests().is_empty());
        assert_eq!(h.ctx.last_processed_turn(), 0);
        finish(h).await;
    }

    #[tokio::test]
    async fn test_refused_generation_apologizes() {
        let mut h = harness(MockGenerator::new("mock").then(MockScript::Refuse("down".into())));

        h.stage.process(final_transcript(1, "hi")).await.unwrap();

        {
            let history = h.ctx.lock_history().await;
            let last = history.entries().last().unwrap();
            assert_eq!(last.content, defaults::APOLOGY_UTTERANCE);
        }
        let (inputs, messages) = finish(h).await;
        assert_eq!(chunk_texts(&inputs), vec![defaults::APOLOGY_UTTERANCE]);
        assert!(messages.contains(&ServerMessage::LlmToken {
            token: defaults::APOLOGY_UTTERANCE.to_string()
        }));
        assert!(matches!(
            inputs.last(),
            Some(SynthesisInput::EndOfTurn { turn_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_apologizes_after_spoken_chunks() {
        let mut h = harness(MockGenerator::new("mock").then(MockScript::FailAfter(vec![
            "Sure.".into(),
            " Let".into(),
        ])));

        h.stage.process(final_transcript(1, "hi")).await.unwrap();

        let (inputs, _) = finish(h).await;
        assert_eq!(
            chunk_texts(&inputs),
            vec!["Sure.".to_string(), defaults::APOLOGY_UTTERANCE.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_generator_times_out() {
        let mut h = harness(
            MockGenerator::new("mock")
                .then(MockScript::words("late"))
                .with_token_delay(Duration::from_secs(30)),
        );

        h.stage.process(final_transcript(1, "hi")).await.unwrap();

        let (inputs, _) = finish(h).await;
        assert_eq!(chunk_texts(&inputs), vec![defaults::APOLOGY_UTTERANCE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_token_loop() {
        let mut h = harness(
            MockGenerator::new("mock")
                .then(MockScript::words("one two three four five six seven eight"))
                .with_token_delay(Duration::from_millis(100)),
        );
        let ctx = h.ctx.clone();
        let interrupter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            ctx.interrupt();
        });

        h.stage.process(final_transcript(1, "count")).await.unwrap();
        interrupter.await.unwrap();

        // Tokens at 100ms and 200ms are used; the one at 300ms sees the flag.
        assert_eq!(h.generator.tokens_yielded(), 3);
        let (inputs, messages) = finish(h).await;
        let tokens: Vec<&ServerMessage> = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::LlmToken { .. }))
            .collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(chunk_texts(&inputs), vec!["one two"]);
        assert!(matches!(
            inputs.last(),
            Some(SynthesisInput::EndOfTurn { turn_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_new_turn_clears_interrupt() {
        let mut h = harness(MockGenerator::new("mock"));
        h.ctx.interrupt();

        h.stage.process(final_transcript(1, "hi")).await.unwrap();

        assert!(!h.ctx.is_interrupted());
        let (inputs, _) = finish(h).await;
        assert_eq!(chunk_texts(&inputs), vec!["You said: hi."]);
    }

    #[tokio::test]
    async fn test_canned_response_skips_generator_and_history() {
        let mut h = harness(MockGenerator::new("mock"));

        h.stage
            .process(GenerationInput::Canned {
                turn_id: 1,
                text: "Please repeat.".to_string(),
            })
            .await
            .unwrap();

        assert!(h.generator.requests().is_empty());
        assert!(h.ctx.lock_history().await.is_empty());
        assert_eq!(h.ctx.last_processed_turn(), 1);
        let (inputs, _) = finish(h).await;
        assert_eq!(chunk_texts(&inputs), vec!["Please repeat."]);
    }
}
