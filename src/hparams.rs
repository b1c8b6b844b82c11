//! Model hyperparameters and precision policy.
//!
//! The hyperparameters are the only architecture metadata the container
//! needs: they size the header and drive the fused-attention layout
//! rewrite. Everything else in the checkpoint's `config.json` is ignored.

use serde::Deserialize;

use crate::error::{EnvasarError, Result};
use crate::tensor::DType;

/// Header tag for checkpoints that carry grouped-query attention metadata.
pub const ARCH_TAG_GQA: u32 = 40;

/// Header tag for classic multi-head attention checkpoints.
pub const ARCH_TAG_MHA: u32 = 7;

/// Immutable header-sizing record extracted from checkpoint metadata.
///
/// `n_head_kv` is `None` when the source config does not mention grouped
/// attention; it then reads as 1 (every query head shares a single kv
/// head, i.e. classic multi-query layout with one group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperparameters {
    /// Number of vocabulary entries the container must carry.
    pub vocab_size: usize,
    /// Model embedding width.
    pub hidden_size: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Number of key/value head groups, if the source config declared one.
    pub n_head_kv: Option<usize>,
    /// Number of transformer layers.
    pub n_layer: usize,
}

/// On-disk shape of the fields we read from a HuggingFace `config.json`.
#[derive(Debug, Deserialize)]
struct RawConfig {
    vocab_size: usize,
    hidden_size: usize,
    n_head: usize,
    #[serde(default)]
    n_head_kv: Option<usize>,
    n_layer: usize,
}

impl Hyperparameters {
    /// Parse the fields this crate needs from `config.json` content.
    ///
    /// Unknown keys are ignored; a missing `n_head_kv` is recorded as
    /// absent rather than defaulted, because the header's architecture tag
    /// distinguishes the two cases.
    pub fn from_config_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|e| EnvasarError::Config {
            message: format!("failed to parse config.json: {e}"),
        })?;
        let hparams = Self {
            vocab_size: raw.vocab_size,
            hidden_size: raw.hidden_size,
            n_head: raw.n_head,
            n_head_kv: raw.n_head_kv,
            n_layer: raw.n_layer,
        };
        hparams.validate()?;
        Ok(hparams)
    }

    /// Effective number of kv groups (1 when the config declared none).
    #[must_use]
    pub fn n_head_kv(&self) -> usize {
        self.n_head_kv.unwrap_or(1)
    }

    /// Per-head embedding width.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.n_head
    }

    /// Query sub-blocks per kv group in the fused attention tensor.
    #[must_use]
    pub fn queries_per_group(&self) -> usize {
        self.n_head / self.n_head_kv()
    }

    /// Architecture tag written to the header.
    ///
    /// The tag records whether grouping metadata was *present* upstream,
    /// not what its value was: an explicit `n_head_kv = 1` still tags as
    /// grouped. Downstream readers depend on exactly this discrimination,
    /// so it is preserved as documented behavior.
    #[must_use]
    pub fn arch_tag(&self) -> u32 {
        if self.n_head_kv.is_some() {
            ARCH_TAG_GQA
        } else {
            ARCH_TAG_MHA
        }
    }

    /// Check the invariants every later stage assumes.
    ///
    /// # Errors
    ///
    /// `Config` when any count is zero, `hidden_size` is not divisible by
    /// `n_head`, or `n_head` is not divisible by `n_head_kv`.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.hidden_size == 0 || self.n_head == 0 || self.n_layer == 0 {
            return Err(EnvasarError::Config {
                message: format!(
                    "all counts must be nonzero: vocab_size={}, hidden_size={}, n_head={}, n_layer={}",
                    self.vocab_size, self.hidden_size, self.n_head, self.n_layer
                ),
            });
        }
        if self.hidden_size % self.n_head != 0 {
            return Err(EnvasarError::Config {
                message: format!(
                    "hidden_size={} not divisible by n_head={}",
                    self.hidden_size, self.n_head
                ),
            });
        }
        let n_head_kv = self.n_head_kv();
        if n_head_kv == 0 || self.n_head % n_head_kv != 0 {
            return Err(EnvasarError::Config {
                message: format!(
                    "n_head={} not divisible by n_head_kv={}",
                    self.n_head, n_head_kv
                ),
            });
        }
        Ok(())
    }
}

/// Global storage-precision policy for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionMode {
    /// Store every tensor at full precision.
    ForceF32,
    /// Store rank ≥ 2 tensors at half precision; biases and norms
    /// (rank ≤ 1 after squeezing) stay at full precision.
    #[default]
    PreferF16,
}

impl PrecisionMode {
    /// Mode code written to the header.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::ForceF32 => 0,
            Self::PreferF16 => 1,
        }
    }

    /// Storage dtype for a tensor of the given post-squeeze rank.
    ///
    /// Pure function; the decision is recorded per record, so containers
    /// routinely mix F16 weights with F32 norms.
    #[must_use]
    pub fn storage_dtype(self, rank: usize) -> DType {
        if rank <= 1 {
            DType::F32
        } else {
            match self {
                Self::ForceF32 => DType::F32,
                Self::PreferF16 => DType::F16,
            }
        }
    }
}
