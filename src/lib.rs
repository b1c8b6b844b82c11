//! # Envasar
//!
//! Envasar (Spanish: "to pack, to put into a container") converts a
//! pretrained transformer checkpoint — sharded tensor files plus a
//! byte-level BPE vocabulary — into the single flat binary container
//! consumed by ggml-family inference runtimes.
//!
//! The conversion is a one-shot, strictly sequential pipeline:
//!
//! ```text
//! header → vocabulary table → tensor records (shard order)
//! ```
//!
//! Fused attention weights stored in the checkpoint's interleaved
//! grouped-query layout are rewritten into the contiguous Q|K|V layout the
//! runtime expects before their record is written.
//!
//! ## Example
//!
//! ```
//! use envasar::{
//!     build_container, Hyperparameters, MemoryShards, NamedTensor,
//!     PrecisionMode, Shard, Vocabulary,
//! };
//!
//! let hparams = Hyperparameters {
//!     vocab_size: 2,
//!     hidden_size: 4,
//!     n_head: 2,
//!     n_head_kv: None,
//!     n_layer: 1,
//! };
//! let vocab = Vocabulary::from_pairs([("a".to_string(), 0), ("b".to_string(), 1)]);
//! let tensor = NamedTensor::new(
//!     "transformer.word_embeddings.weight",
//!     vec![2, 4],
//!     vec![0.0; 8],
//! ).unwrap();
//! let mut shards = MemoryShards::new(vec![Shard::new("part 1", vec![tensor])]);
//!
//! let mut out = Vec::new();
//! let report = build_container(
//!     &mut out,
//!     &hparams,
//!     PrecisionMode::ForceF32,
//!     &vocab,
//!     &mut shards,
//! ).unwrap();
//! assert_eq!(report.tensors_written, 1);
//! ```
//!
//! ## Scope
//!
//! The checkpoint loader, tokenizer file discovery, CLI parsing and
//! progress rendering are collaborators: this crate consumes their outputs
//! (hyperparameters, ordered `(token, id)` pairs, ordered shards of named
//! tensors) and owns only the container format and the layout rewrite.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)] // shape/name lengths fit u32 by format contract
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

pub mod checkpoint;
pub mod container;
pub mod error;
pub mod hparams;
pub mod layout;
pub mod tensor;
pub mod vocab;

pub use checkpoint::{shard_file_names, MemoryShards, Shard, ShardSource};
pub use container::{
    build_container, container_file_name, BuildPhase, BuildProgress, BuildReport,
    ContainerBuilder, ProgressCallback, GGML_MAGIC, HEADER_SIZE,
};
pub use error::{EnvasarError, Result};
pub use hparams::{Hyperparameters, PrecisionMode};
pub use layout::{canonicalize, interleave};
pub use tensor::{classify, DType, NamedTensor, TensorClass, FUSED_ATTENTION_MARKER};
pub use vocab::{byte_unicode_maps, TokenByteDecoder, Vocabulary};
