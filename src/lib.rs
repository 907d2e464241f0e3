//! talkback - real-time voice conversation server
//!
//! Streams client audio through recognition, generation and synthesis with
//! barge-in, serialized turns and backend fallback.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod server;

// Engines
pub use backend::{Backends, Generator, Recognizer, Synthesizer, build_backends};

// Pipeline
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, SessionContext};

// Error handling
pub use error::{Result, TalkbackError};

// Config
pub use config::Config;

// Wire protocol
pub use protocol::{ClientMessage, ServerMessage};

// Stage framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::stage::Stage;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn test_version_string_has_hash_only_when_built_from_git() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => {
                assert_eq!(ver.split('+').nth(1), Some(hash));
            }
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
