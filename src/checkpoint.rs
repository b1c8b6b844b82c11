//! Checkpoint shards and the collaborator seam that yields them.
//!
//! The builder never opens checkpoint files itself; a [`ShardSource`]
//! streams shards one at a time, in declared order, and each shard's
//! tensors arrive in that shard's declared order. Keeping one shard live
//! at a time bounds memory for models split across many part files.

use std::collections::VecDeque;

use crate::error::Result;
use crate::tensor::NamedTensor;

/// Shard file names of a checkpoint split into `num_parts` files.
///
/// `num_parts == 0` means a single-file checkpoint. Multipart checkpoints
/// number their parts 1-based with five-digit padding.
#[must_use]
pub fn shard_file_names(num_parts: usize) -> Vec<String> {
    if num_parts == 0 {
        vec!["pytorch_model.bin".to_string()]
    } else {
        (1..=num_parts)
            .map(|i| format!("pytorch_model-{i:05}-of-{num_parts:05}.bin"))
            .collect()
    }
}

/// One checkpoint shard: an ordered run of tensors plus a label used in
/// diagnostics (typically the part file name).
#[derive(Debug, Clone)]
pub struct Shard {
    /// Diagnostic label for this shard.
    pub label: String,
    /// Tensors in the shard's declared order.
    pub tensors: Vec<NamedTensor>,
}

impl Shard {
    /// Create a shard.
    #[must_use]
    pub fn new(label: impl Into<String>, tensors: Vec<NamedTensor>) -> Self {
        Self {
            label: label.into(),
            tensors,
        }
    }
}

/// Ordered, streaming source of checkpoint shards.
///
/// Implementations own the file I/O (or hold tensors in memory) and
/// surface loader failures as [`crate::EnvasarError::ShardLoad`] so the
/// diagnostic names the shard that broke the build.
pub trait ShardSource {
    /// Yield the next shard, or `None` when the checkpoint is exhausted.
    fn next_shard(&mut self) -> Result<Option<Shard>>;
}

/// Shard source over tensors the caller already holds in memory.
#[derive(Debug, Default)]
pub struct MemoryShards {
    shards: VecDeque<Shard>,
}

impl MemoryShards {
    /// Wrap pre-loaded shards, preserving their order.
    #[must_use]
    pub fn new(shards: Vec<Shard>) -> Self {
        Self {
            shards: shards.into(),
        }
    }

    /// Convenience constructor for a single-shard checkpoint.
    #[must_use]
    pub fn single(tensors: Vec<NamedTensor>) -> Self {
        Self::new(vec![Shard::new("pytorch_model.bin", tensors)])
    }
}

impl ShardSource for MemoryShards {
    fn next_shard(&mut self) -> Result<Option<Shard>> {
        Ok(self.shards.pop_front())
    }
}
