//! Wires one session's stages together and runs them until the client leaves.

use crate::backend::Backends;
use crate::config::Config;
use crate::defaults;
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::generation::{GenerationSettings, GenerationStage};
use crate::pipeline::ingestor::IngestorStage;
use crate::pipeline::recognition::{RecognitionSettings, RecognitionStage};
use crate::pipeline::session::SessionContext;
use crate::pipeline::silence::SilenceMonitor;
use crate::pipeline::stage::{Outbox, run_stage};
use crate::pipeline::synthesis::{SynthesisSettings, SynthesisStage};
use crate::protocol::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::Instrument;

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub silence_threshold: Duration,
    pub silence_poll: Duration,
    pub recognition: RecognitionSettings,
    pub generation: GenerationSettings,
    pub synthesis: SynthesisSettings,
    /// Channel buffer sizes
    pub recognition_buffer: usize,
    pub generation_buffer: usize,
    pub synthesis_buffer: usize,
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(defaults::SILENCE_THRESHOLD_MS),
            silence_poll: Duration::from_millis(defaults::SILENCE_POLL_MS),
            recognition: RecognitionSettings::default(),
            generation: GenerationSettings::default(),
            synthesis: SynthesisSettings::default(),
            recognition_buffer: defaults::RECOGNITION_BUFFER,
            generation_buffer: defaults::GENERATION_BUFFER,
            synthesis_buffer: defaults::SYNTHESIS_BUFFER,
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            silence_threshold: Duration::from_millis(pipeline.silence_threshold_ms),
            silence_poll: Duration::from_millis(pipeline.silence_poll_ms),
            recognition: RecognitionSettings::from_config(config),
            generation: GenerationSettings::from_config(config),
            synthesis: SynthesisSettings::from_config(config),
            recognition_buffer: pipeline.recognition_buffer,
            generation_buffer: pipeline.generation_buffer,
            synthesis_buffer: pipeline.synthesis_buffer,
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
        }
    }
}

/// Handle to a running session pipeline.
pub struct PipelineHandle {
    ctx: Arc<SessionContext>,
    tasks: JoinSet<&'static str>,
    monitor: AbortHandle,
    shutdown_grace: Duration,
}

impl PipelineHandle {
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Wait for the first stage to stop, then wind the rest down.
    ///
    /// Upstream stages close their queues as they exit, so downstream stages
    /// drain and run their shutdown hooks. Anything still running after the
    /// grace period is aborted. Returns the name of the stage that stopped first.
    pub async fn wait(mut self) -> Option<&'static str> {
        let first = self.tasks.join_next().await.and_then(log_exit);
        tracing::debug!(stage = first.unwrap_or("?"), "Session winding down");
        self.monitor.abort();

        let tasks = &mut self.tasks;
        let drain = async {
            while let Some(exit) = tasks.join_next().await {
                log_exit(exit);
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            tracing::debug!(remaining = self.tasks.len(), "Aborting stages");
            self.tasks.shutdown().await;
        }

        tracing::info!("Session closed");
        first
    }

    /// Stop every stage immediately.
    pub async fn abort(mut self) {
        self.tasks.shutdown().await;
    }
}

fn log_exit(exit: Result<&'static str, JoinError>) -> Option<&'static str> {
    match exit {
        Ok(stage) => {
            tracing::debug!(stage, "Stage exited");
            Some(stage)
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            tracing::error!(error = %e, "Stage panicked");
            None
        }
    }
}

/// Session pipeline: Ingestor → Recognition → Generation → Synthesis → client,
/// with the silence monitor feeding terminators into recognition.
pub struct Pipeline {
    ctx: Arc<SessionContext>,
    backends: Backends,
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl Pipeline {
    /// Creates a new pipeline with the default error reporter.
    pub fn new(ctx: Arc<SessionContext>, backends: Backends, config: PipelineConfig) -> Self {
        Self {
            ctx,
            backends,
            config,
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Spawn every stage.
    ///
    /// `inbound_rx` carries raw text frames from the client; `outbox_tx` is
    /// drained by the socket writer.
    pub fn spawn(
        self,
        inbound_rx: mpsc::Receiver<String>,
        outbox_tx: mpsc::Sender<ServerMessage>,
    ) -> PipelineHandle {
        let Pipeline {
            ctx,
            backends,
            config,
            error_reporter,
        } = self;

        let (recognition_tx, recognition_rx) = mpsc::channel(config.recognition_buffer);
        let (generation_tx, generation_rx) = mpsc::channel(config.generation_buffer);
        let (synthesis_tx, synthesis_rx) = mpsc::channel(config.synthesis_buffer);
        let outbox = Outbox::new(outbox_tx);

        let ingestor = IngestorStage::new(ctx.clone(), recognition_tx.clone());
        let monitor = SilenceMonitor::new(
            ctx.clone(),
            recognition_tx,
            config.silence_threshold,
            config.silence_poll,
        );
        let recognition = RecognitionStage::new(
            ctx.clone(),
            backends.recognizer.clone(),
            config.recognition,
            outbox.clone(),
            generation_tx,
        );
        let generation = GenerationStage::new(
            ctx.clone(),
            backends.generator.clone(),
            config.generation,
            outbox.clone(),
            synthesis_tx,
        );
        let synthesis = SynthesisStage::new(
            ctx.clone(),
            backends.synthesizer.clone(),
            config.synthesis,
            outbox,
        );

        let span = tracing::info_span!("session", id = ctx.id());
        tracing::info!(parent: &span, backends = ?backends, "Session started");

        let mut tasks = JoinSet::new();
        tasks.spawn(run_stage(ingestor, inbound_rx, error_reporter.clone()).instrument(span.clone()));
        tasks.spawn(
            run_stage(recognition, recognition_rx, error_reporter.clone()).instrument(span.clone()),
        );
        tasks.spawn(
            run_stage(generation, generation_rx, error_reporter.clone()).instrument(span.clone()),
        );
        tasks.spawn(run_stage(synthesis, synthesis_rx, error_reporter).instrument(span.clone()));
        let monitor = tasks.spawn(monitor.run().instrument(span));

        PipelineHandle {
            ctx,
            tasks,
            monitor,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Spawn the stages and wait for the session to end.
    pub async fn run(
        self,
        inbound_rx: mpsc::Receiver<String>,
        outbox_tx: mpsc::Sender<ServerMessage>,
    ) -> Option<&'static str> {
        self.spawn(inbound_rx, outbox_tx).wait().await
    }
}
