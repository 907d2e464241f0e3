//! Data carried between pipeline stages.

use std::time::Instant;
use tokio::sync::oneshot;

/// Monotonically increasing turn identifier; 0 means "no turn yet".
pub type TurnId = u64;

/// Lifecycle of one user-utterance to assistant-reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Collecting,
    Finalizing,
    Generating,
    Speaking,
    Complete,
}

/// Decoded client audio, tagged with the turn it belongs to.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub turn_id: TurnId,
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    pub received_at: Instant,
}

/// Input to the recognition driver.
#[derive(Debug)]
pub enum RecognitionInput {
    Frame(AudioFrame),
    /// The utterance for `turn_id` is over; finalize it.
    EndOfUtterance { turn_id: TurnId },
    /// Barge-in: discard everything buffered.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Partial,
    Final,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub turn_id: TurnId,
    pub kind: TranscriptKind,
    pub text: String,
    pub timestamp: Instant,
}

/// Input to the generation driver.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationInput {
    Transcript(TranscriptEvent),
    /// Speak fixed text for a turn without consulting the generator or
    /// touching history (e.g. "please repeat").
    Canned { turn_id: TurnId, text: String },
}

/// A span of generated text safe to synthesize on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableChunk {
    pub turn_id: TurnId,
    /// Position within the turn, starting at 0.
    pub seq: u32,
    pub text: String,
}

/// Input to the synthesis driver.
#[derive(Debug)]
pub enum SynthesisInput {
    Chunk(SpeakableChunk),
    /// No more chunks for this turn. `ack` fires once the turn is drained.
    EndOfTurn {
        turn_id: TurnId,
        ack: Option<oneshot::Sender<()>>,
    },
}
