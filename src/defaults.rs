//! Default configuration constants for talkback.
//!
//! Shared by the configuration types and the pipeline stages so the two never
//! drift apart.

/// Audio sample rate in Hz expected from clients (16-bit mono PCM).
pub const SAMPLE_RATE: u32 = 16000;

/// Address the WebSocket server listens on.
pub const BIND_ADDRESS: &str = "0.0.0.0:8765";

/// Quiet period after the last audio frame before the server ends the utterance.
///
/// Client end-of-speech signaling is unreliable; this is the authoritative fallback.
pub const SILENCE_THRESHOLD_MS: u64 = 700;

/// How often the silence monitor checks the time since the last frame.
pub const SILENCE_POLL_MS: u64 = 200;

/// Minimum buffered frames before a partial transcript is requested.
pub const PARTIAL_EVERY_FRAMES: usize = 10;

/// Minimum spacing between partial transcription requests.
pub const PARTIAL_INTERVAL_MS: u64 = 500;

/// Buffers shorter than this are treated as noise and discarded.
pub const MIN_SPEECH_MS: u64 = 200;

/// Buffers at least this long get a spoken "please repeat" when recognition
/// yields nothing usable.
pub const FALLBACK_MIN_AUDIO_MS: u64 = 800;

/// Maximum conversation history entries retained per session.
pub const HISTORY_CAP: usize = 10;

/// Trailing history entries sent with each generation request.
pub const HISTORY_WINDOW: usize = 8;

/// Chunk length that triggers a split at whitespace for the first chunk of a turn.
pub const FIRST_CHUNK_CHARS: usize = 30;

/// Chunk length that triggers a split at whitespace after the first chunk.
pub const CHUNK_CHARS: usize = 50;

/// Hard ceiling after which an open quotation may be split anyway.
pub const QUOTE_CEILING_CHARS: usize = 150;

/// Characters that end a speakable chunk.
pub const TERMINATORS: &str = ".!?।\n,";

/// Queue capacity between the ingestor and the recognition driver.
pub const RECOGNITION_BUFFER: usize = 512;

/// Queue capacity between recognition and generation.
pub const GENERATION_BUFFER: usize = 8;

/// Queue capacity between generation and synthesis.
pub const SYNTHESIS_BUFFER: usize = 32;

/// Queue capacity of the per-session outbound message queue.
pub const OUTBOX_BUFFER: usize = 256;

/// How long a closing session's stages may drain before they are aborted.
pub const SHUTDOWN_GRACE_MS: u64 = 2000;

/// Timeout for a partial transcription request.
pub const PARTIAL_TIMEOUT_MS: u64 = 4000;

/// Timeout for a final transcription request.
pub const FINAL_TIMEOUT_MS: u64 = 7000;

/// Seconds of trailing audio sent with partial transcription requests.
pub const PARTIAL_WINDOW_SECS: u32 = 3;

/// Timeout for the first token of a generation stream.
pub const FIRST_TOKEN_TIMEOUT_MS: u64 = 5000;

/// Timeout between subsequent generation tokens.
pub const TOKEN_TIMEOUT_MS: u64 = 10000;

/// Timeout for the first audio fragment of a synthesis stream.
pub const FIRST_FRAGMENT_TIMEOUT_MS: u64 = 5000;

/// Timeout between subsequent synthesis fragments.
pub const FRAGMENT_TIMEOUT_MS: u64 = 10000;

/// Consecutive primary failures before the secondary backend is preferred.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How long the secondary stays preferred before the primary is retried.
pub const FALLBACK_COOLDOWN_SECS: u64 = 30;

/// Partial transcripts this short are never worth echoing (characters).
pub const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Spoken when recognition produced nothing usable from real speech.
pub const FALLBACK_UTTERANCE: &str =
    "I could not hear your words clearly. Could you please say that again?";

/// Spoken when the generation backend fails.
pub const APOLOGY_UTTERANCE: &str =
    "I am sorry, the connection is weak right now. Please speak again.";

/// Shown to the client as the final transcript when speech was inaudible.
pub const INAUDIBLE_MARKER: &str = "[Inaudible Audio]";

/// Framing prompt sent ahead of the conversation history.
pub const SYSTEM_PROMPT: &str = "You are a warm, concise voice assistant. \
Answer in a few short spoken sentences. Avoid lists, markdown and emoji.";

/// Phrases speech recognizers commonly hallucinate from silence or noise.
pub const HALLUCINATION_FILTERS: &[&str] = &[
    "Thanks for watching!",
    "Thank you.",
    "Please subscribe",
    "Subtitles by",
    "unintelligible",
    "inaudible",
    "Bye.",
];
