//! Error types for Envasar operations.
//!
//! One enum covers the whole pipeline. Nothing is recovered internally:
//! a conversion is a one-shot offline build, so every variant aborts the
//! build and carries a single diagnostic naming the tensor, vocabulary id
//! or shard that caused it.

use std::fmt;

/// Main error type for container builds.
///
/// # Examples
///
/// ```
/// use envasar::error::EnvasarError;
///
/// let err = EnvasarError::Config {
///     message: "n_head=3 not divisible by n_head_kv=2".to_string(),
/// };
/// assert!(err.to_string().contains("hyperparameters"));
/// ```
#[derive(Debug)]
pub enum EnvasarError {
    /// Malformed or inconsistent hyperparameters (e.g. non-divisible head
    /// counts). Raised before any output byte is written.
    Config {
        /// What is inconsistent
        message: String,
    },

    /// Vocabulary id has no token, or a token character has no inverse
    /// byte mapping (token was not produced by the byte-level BPE scheme).
    Vocabulary {
        /// Which id/character failed and why
        message: String,
    },

    /// Checkpoint source failed to produce a shard.
    ShardLoad {
        /// Shard label (file name or part index)
        shard: String,
        /// Propagated loader diagnostic
        message: String,
    },

    /// Tensor data does not fit the layout the pipeline expects
    /// (fused-attention decomposition mismatch, shape/buffer mismatch,
    /// duplicate tensor name).
    Layout {
        /// Offending tensor name
        tensor: String,
        /// What did not fit
        message: String,
    },

    /// Output sink failure.
    Io(std::io::Error),
}

impl fmt::Display for EnvasarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvasarError::Config { message } => {
                write!(f, "Invalid hyperparameters: {message}")
            }
            EnvasarError::Vocabulary { message } => {
                write!(f, "Vocabulary error: {message}")
            }
            EnvasarError::ShardLoad { shard, message } => {
                write!(f, "Failed to load shard {shard}: {message}")
            }
            EnvasarError::Layout { tensor, message } => {
                write!(f, "Tensor layout error in {tensor}: {message}")
            }
            EnvasarError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for EnvasarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvasarError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EnvasarError {
    fn from(err: std::io::Error) -> Self {
        EnvasarError::Io(err)
    }
}

impl EnvasarError {
    /// Missing vocabulary entry for an id in `0..vocab_size`.
    #[must_use]
    pub fn missing_vocab_entry(id: u32) -> Self {
        Self::Vocabulary {
            message: format!("no token for id {id}"),
        }
    }

    /// Token character with no inverse byte mapping.
    #[must_use]
    pub fn invalid_byte_mapping(id: u32, token: &str, ch: char) -> Self {
        Self::Vocabulary {
            message: format!("token {token:?} (id {id}) contains unmapped character {ch:?}"),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, EnvasarError>;
