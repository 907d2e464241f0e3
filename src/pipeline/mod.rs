//! Streaming turn orchestrator.
//!
//! Each session runs five concurrent stages connected by bounded tokio
//! channels for backpressure:
//!
//! ```text
//! client ─► ingestor ─► recognition ─► generation ─► synthesis ─► client
//!               │            ▲
//!               └─ silence ──┘
//! ```
//!
//! Stages share one [`SessionContext`]: the interrupt flag, turn bookkeeping,
//! latency milestones and the processing lock around conversation history.

pub mod clock;
pub mod error;
pub mod generation;
pub mod history;
pub mod ingestor;
pub mod latency;
pub mod orchestrator;
pub mod recognition;
pub mod segmenter;
pub mod session;
pub mod silence;
pub mod stage;
pub mod synthesis;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use generation::{GenerationSettings, GenerationStage};
pub use history::ConversationHistory;
pub use ingestor::IngestorStage;
pub use latency::{Grade, LatencyTracker, Milestone, TurnTiming};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use recognition::{RecognitionSettings, RecognitionStage};
pub use segmenter::Segmenter;
pub use session::{SessionContext, TurnTracker};
pub use silence::SilenceMonitor;
pub use stage::{Outbox, Stage, run_stage};
pub use synthesis::{SynthesisSettings, SynthesisStage};
pub use types::{
    AudioFrame, GenerationInput, RecognitionInput, SpeakableChunk, SynthesisInput,
    TranscriptEvent, TranscriptKind, TurnId, TurnStatus,
};
