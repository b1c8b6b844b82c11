//! The flat binary container: header, vocabulary table, tensor records.
//!
//! All integers are little-endian u32. The stream is position-dependent
//! and not truncation-safe: exactly one header, then `vocab_size`
//! vocabulary entries in ascending id order, then one record per tensor
//! in shard-traversal order. A failed build leaves the sink in an
//! undefined partial state that readers must treat as invalid.
//!
//! ```text
//! Header:           magic vocab_size hidden_size n_head
//!                   n_head_kv n_layer arch_tag precision_mode
//! Vocabulary entry: length raw_bytes[length]          × vocab_size
//! Tensor record:    n_dims name_len dtype_code
//!                   dim[n_dims] (reversed order)
//!                   name_bytes[name_len]
//!                   data_bytes[n_elements × dtype_size]
//! ```

use std::collections::HashSet;
use std::io::Write;

use half::f16;

use crate::checkpoint::{Shard, ShardSource};
use crate::error::{EnvasarError, Result};
use crate::hparams::{Hyperparameters, PrecisionMode};
use crate::layout;
use crate::tensor::{classify, DType, NamedTensor, TensorClass};
use crate::vocab::{TokenByteDecoder, Vocabulary};

/// Container magic: "ggml" as a little-endian u32.
pub const GGML_MAGIC: u32 = 0x6767_6d6c;

/// Fixed header size in bytes (8 × u32).
pub const HEADER_SIZE: usize = 32;

/// Pipeline phase, reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Writing the fixed header.
    Header,
    /// Writing vocabulary entries.
    Vocabulary,
    /// Writing tensor records.
    Tensors,
    /// Build finished; sink flushed.
    Complete,
}

/// Progress snapshot handed to the callback after each step.
#[derive(Debug, Clone)]
pub struct BuildProgress {
    /// Current phase.
    pub phase: BuildPhase,
    /// Vocabulary entries written so far.
    pub vocab_written: usize,
    /// Tensor records written so far.
    pub tensors_written: usize,
    /// Total bytes written to the sink so far.
    pub bytes_written: u64,
}

/// Progress callback. The library never prints; rendering belongs to the
/// caller.
pub type ProgressCallback = Box<dyn Fn(&BuildProgress) + Send + Sync>;

/// Summary of a completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Vocabulary entries written (always `vocab_size` on success).
    pub vocab_entries: usize,
    /// Tensor records written.
    pub tensors_written: usize,
    /// Total container size in bytes.
    pub bytes_written: u64,
}

/// Output-file naming convention of the original converter:
/// `ggml-model-{model}-{f32|f16}.bin`, keeping only the last path segment
/// of a `org/model` name.
#[must_use]
pub fn container_file_name(model_name: &str, mode: PrecisionMode) -> String {
    let short = model_name.rsplit('/').next().unwrap_or(model_name);
    let precision = match mode {
        PrecisionMode::ForceF32 => "f32",
        PrecisionMode::PreferF16 => "f16",
    };
    format!("ggml-model-{short}-{precision}.bin")
}

/// Sequential container writer.
///
/// Owns the sink and the running counts; the phase order
/// (header → vocabulary → tensors) is enforced, not assumed. Constructed
/// once per build — there is no ambient state and no recovery: the first
/// error poisons the container.
pub struct ContainerBuilder<W: Write> {
    sink: W,
    hparams: Hyperparameters,
    mode: PrecisionMode,
    decoder: TokenByteDecoder,
    names_seen: HashSet<String>,
    header_written: bool,
    vocab_written: usize,
    tensors_written: usize,
    bytes_written: u64,
    progress: Option<ProgressCallback>,
}

impl<W: Write> ContainerBuilder<W> {
    /// Create a builder for one container.
    ///
    /// Hyperparameters are validated here, before any byte is written, so
    /// a malformed configuration never touches the sink.
    pub fn new(sink: W, hparams: &Hyperparameters, mode: PrecisionMode) -> Result<Self> {
        hparams.validate()?;
        Ok(Self {
            sink,
            hparams: hparams.clone(),
            mode,
            decoder: TokenByteDecoder::new(),
            names_seen: HashSet::new(),
            header_written: false,
            vocab_written: 0,
            tensors_written: 0,
            bytes_written: 0,
            progress: None,
        })
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Write the 8-field fixed header.
    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Err(EnvasarError::Config {
                message: "header already written".to_string(),
            });
        }
        self.put_u32(GGML_MAGIC)?;
        self.put_u32(self.hparams.vocab_size as u32)?;
        self.put_u32(self.hparams.hidden_size as u32)?;
        self.put_u32(self.hparams.n_head as u32)?;
        self.put_u32(self.hparams.n_head_kv() as u32)?;
        self.put_u32(self.hparams.n_layer as u32)?;
        self.put_u32(self.hparams.arch_tag())?;
        self.put_u32(self.mode.code())?;
        self.header_written = true;
        self.report(BuildPhase::Header);
        Ok(())
    }

    /// Write all `vocab_size` vocabulary entries in ascending id order.
    ///
    /// The tokenizer's internal ordering is irrelevant: ids are walked
    /// 0..vocab_size and each must resolve to exactly one token.
    pub fn write_vocabulary(&mut self, vocab: &Vocabulary) -> Result<()> {
        if !self.header_written {
            return Err(EnvasarError::Config {
                message: "vocabulary cannot precede the header".to_string(),
            });
        }
        if self.vocab_written > 0 {
            return Err(EnvasarError::Config {
                message: "vocabulary already written".to_string(),
            });
        }
        for id in 0..self.hparams.vocab_size as u32 {
            let token = vocab
                .token(id)
                .ok_or_else(|| EnvasarError::missing_vocab_entry(id))?;
            let bytes = self.decoder.decode(id, token)?;
            self.put_u32(bytes.len() as u32)?;
            self.put_bytes(&bytes)?;
            self.vocab_written += 1;
        }
        self.report(BuildPhase::Vocabulary);
        Ok(())
    }

    /// Write one tensor record, applying the layout rewrite when the name
    /// carries the fusion marker, then squeezing size-1 dimensions and
    /// selecting the storage dtype.
    ///
    /// Consumes the tensor; the buffer is dropped as soon as its record
    /// is on the sink.
    pub fn write_tensor(&mut self, tensor: NamedTensor) -> Result<()> {
        if self.vocab_written != self.hparams.vocab_size {
            return Err(EnvasarError::Config {
                message: "tensor records cannot precede the vocabulary table".to_string(),
            });
        }
        if !self.names_seen.insert(tensor.name.clone()) {
            return Err(EnvasarError::Layout {
                tensor: tensor.name,
                message: "duplicate tensor record".to_string(),
            });
        }

        let squeezed = tensor.squeezed_shape();
        let NamedTensor { name, data, .. } = tensor;
        let data = match classify(&name) {
            TensorClass::Fused => layout::canonicalize(&name, &data, &self.hparams)?,
            TensorClass::Plain => data,
        };
        let dtype = self.mode.storage_dtype(squeezed.len());
        self.write_record(&name, &squeezed, dtype, &data)?;
        self.tensors_written += 1;
        self.report(BuildPhase::Tensors);
        Ok(())
    }

    /// Write every tensor of a shard, in the shard's declared order.
    pub fn write_shard(&mut self, shard: Shard) -> Result<()> {
        for tensor in shard.tensors {
            self.write_tensor(tensor)?;
        }
        Ok(())
    }

    /// Flush the sink and return the build summary.
    pub fn finish(mut self) -> Result<BuildReport> {
        self.sink.flush()?;
        self.report(BuildPhase::Complete);
        Ok(BuildReport {
            vocab_entries: self.vocab_written,
            tensors_written: self.tensors_written,
            bytes_written: self.bytes_written,
        })
    }

    /// Record wire format: counts, reversed dims, name, then data cast to
    /// the storage dtype.
    fn write_record(
        &mut self,
        name: &str,
        shape: &[usize],
        dtype: DType,
        data: &[f32],
    ) -> Result<()> {
        self.put_u32(shape.len() as u32)?;
        self.put_u32(name.len() as u32)?;
        self.put_u32(dtype.code())?;
        // Dimensions go out innermost-first: the reader declares the
        // fastest-varying dimension first.
        for &dim in shape.iter().rev() {
            self.put_u32(dim as u32)?;
        }
        self.put_bytes(name.as_bytes())?;

        let mut raw = Vec::with_capacity(data.len() * dtype.size_in_bytes());
        match dtype {
            DType::F32 => {
                for &v in data {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
            }
            DType::F16 => {
                for &v in data {
                    raw.extend_from_slice(&f16::from_f32(v).to_le_bytes());
                }
            }
        }
        self.put_bytes(&raw)
    }

    fn put_u32(&mut self, value: u32) -> Result<()> {
        self.sink.write_all(&value.to_le_bytes())?;
        self.bytes_written += 4;
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn report(&self, phase: BuildPhase) {
        if let Some(callback) = &self.progress {
            callback(&BuildProgress {
                phase,
                vocab_written: self.vocab_written,
                tensors_written: self.tensors_written,
                bytes_written: self.bytes_written,
            });
        }
    }
}

/// Run the whole pipeline: header, vocabulary, then every shard the
/// source yields, in order.
///
/// Any step's failure aborts the build; the sink's partial contents are
/// invalid by convention and left to the caller to discard.
pub fn build_container<W: Write>(
    sink: W,
    hparams: &Hyperparameters,
    mode: PrecisionMode,
    vocab: &Vocabulary,
    source: &mut dyn ShardSource,
) -> Result<BuildReport> {
    let mut builder = ContainerBuilder::new(sink, hparams, mode)?;
    builder.write_header()?;
    builder.write_vocabulary(vocab)?;
    while let Some(shard) = source.next_shard()? {
        builder.write_shard(shard)?;
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_hparams() -> Hyperparameters {
        Hyperparameters {
            vocab_size: 2,
            hidden_size: 4,
            n_head: 2,
            n_head_kv: None,
            n_layer: 1,
        }
    }

    fn tiny_vocab() -> Vocabulary {
        Vocabulary::from_pairs([("a".to_string(), 0), ("b".to_string(), 1)])
    }

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    }

    #[test]
    fn test_header_is_32_bytes_fixed_order() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        drop(b);

        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(u32_at(&out, 0), GGML_MAGIC);
        assert_eq!(u32_at(&out, 4), 2); // vocab_size
        assert_eq!(u32_at(&out, 8), 4); // hidden_size
        assert_eq!(u32_at(&out, 12), 2); // n_head
        assert_eq!(u32_at(&out, 16), 1); // n_head_kv defaulted
        assert_eq!(u32_at(&out, 20), 1); // n_layer
        assert_eq!(u32_at(&out, 24), 7); // arch tag: no grouping metadata
        assert_eq!(u32_at(&out, 28), 1); // precision mode code
    }

    #[test]
    fn test_header_size_independent_of_values() {
        let big = Hyperparameters {
            vocab_size: 65024,
            hidden_size: 8192,
            n_head: 128,
            n_head_kv: Some(8),
            n_layer: 60,
        };
        let mut out = Vec::new();
        let mut b =
            ContainerBuilder::new(&mut out, &big, PrecisionMode::ForceF32).expect("builder");
        b.write_header().expect("header");
        drop(b);
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(u32_at(&out, 24), 40); // grouped tag
        assert_eq!(u32_at(&out, 28), 0);
    }

    #[test]
    fn test_invalid_hparams_write_nothing() {
        let bad = Hyperparameters {
            vocab_size: 4,
            hidden_size: 12,
            n_head: 3,
            n_head_kv: Some(2),
            n_layer: 1,
        };
        let mut out = Vec::new();
        let err = match ContainerBuilder::new(&mut out, &bad, PrecisionMode::PreferF16) {
            Ok(_) => panic!("expected a config error"),
            Err(e) => e,
        };
        assert!(matches!(err, EnvasarError::Config { .. }));
        assert!(out.is_empty(), "config errors must precede any write");
    }

    #[test]
    fn test_vocabulary_requires_header() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        let err = b.write_vocabulary(&tiny_vocab()).unwrap_err();
        assert!(err.to_string().contains("precede"));
    }

    #[test]
    fn test_vocabulary_missing_id_fails() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        // Only id 0 present; id 1 missing.
        let vocab = Vocabulary::from_pairs([("a".to_string(), 0)]);
        let err = b.write_vocabulary(&vocab).unwrap_err();
        assert!(err.to_string().contains("id 1"));
    }

    #[test]
    fn test_vocabulary_entries_ascending_regardless_of_map_order() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        // Insertion order reversed relative to ids.
        let vocab = Vocabulary::from_pairs([("b".to_string(), 1), ("a".to_string(), 0)]);
        b.write_vocabulary(&vocab).expect("vocab");
        drop(b);

        let mut off = HEADER_SIZE;
        assert_eq!(u32_at(&out, off), 1);
        assert_eq!(out[off + 4], b'a');
        off += 5;
        assert_eq!(u32_at(&out, off), 1);
        assert_eq!(out[off + 4], b'b');
    }

    #[test]
    fn test_tensor_requires_vocabulary() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        let t = NamedTensor::new("w", vec![2, 2], vec![0.0; 4]).expect("tensor");
        let err = b.write_tensor(t).unwrap_err();
        assert!(err.to_string().contains("vocabulary"));
    }

    #[test]
    fn test_duplicate_tensor_rejected() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::ForceF32)
            .expect("builder");
        b.write_header().expect("header");
        b.write_vocabulary(&tiny_vocab()).expect("vocab");
        let t = NamedTensor::new("w", vec![2, 2], vec![0.0; 4]).expect("tensor");
        b.write_tensor(t.clone()).expect("first write");
        let err = b.write_tensor(t).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_record_dims_reversed_and_name_verbatim() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::ForceF32)
            .expect("builder");
        b.write_header().expect("header");
        b.write_vocabulary(&tiny_vocab()).expect("vocab");
        let t = NamedTensor::new("mlp.w", vec![2, 3, 4], (0..24).map(|i| i as f32).collect())
            .expect("tensor");
        b.write_tensor(t).expect("tensor write");
        drop(b);

        // Skip header + 2 vocab entries of 1 byte each.
        let rec = HEADER_SIZE + 2 * 5;
        assert_eq!(u32_at(&out, rec), 3); // n_dims
        assert_eq!(u32_at(&out, rec + 4), 5); // name_len
        assert_eq!(u32_at(&out, rec + 8), 0); // dtype F32
        assert_eq!(u32_at(&out, rec + 12), 4); // innermost first
        assert_eq!(u32_at(&out, rec + 16), 3);
        assert_eq!(u32_at(&out, rec + 20), 2);
        assert_eq!(&out[rec + 24..rec + 29], b"mlp.w");
        // First element follows the name immediately.
        assert_eq!(u32_at(&out, rec + 29), 0.0f32.to_bits());
    }

    #[test]
    fn test_bias_stays_f32_under_prefer_f16() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        b.write_vocabulary(&tiny_vocab()).expect("vocab");

        let bias = NamedTensor::new("ln.bias", vec![1, 4], vec![1.0; 4]).expect("tensor");
        b.write_tensor(bias).expect("bias write");
        let weight = NamedTensor::new("mlp.w", vec![2, 4], vec![1.0; 8]).expect("tensor");
        b.write_tensor(weight).expect("weight write");
        drop(b);

        let bias_rec = HEADER_SIZE + 2 * 5;
        assert_eq!(u32_at(&out, bias_rec), 1); // squeezed to rank 1
        assert_eq!(u32_at(&out, bias_rec + 8), 0); // F32 despite PreferF16

        let weight_rec = bias_rec + 12 + 4 + 7 + 4 * 4; // counts+dim+name+f32 data
        assert_eq!(u32_at(&out, weight_rec), 2);
        assert_eq!(u32_at(&out, weight_rec + 8), 1); // F16
    }

    #[test]
    fn test_f16_cast_on_write() {
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::PreferF16)
            .expect("builder");
        b.write_header().expect("header");
        b.write_vocabulary(&tiny_vocab()).expect("vocab");
        let t = NamedTensor::new("w", vec![2, 2], vec![1.0, -2.0, 0.5, 3.25]).expect("tensor");
        b.write_tensor(t).expect("tensor write");
        drop(b);

        let rec = HEADER_SIZE + 2 * 5;
        let data_off = rec + 12 + 2 * 4 + 1;
        let h = |i: usize| {
            f16::from_le_bytes([out[data_off + 2 * i], out[data_off + 2 * i + 1]]).to_f32()
        };
        assert_eq!(h(0), 1.0);
        assert_eq!(h(1), -2.0);
        assert_eq!(h(2), 0.5);
        assert_eq!(h(3), 3.25);
    }

    #[test]
    fn test_progress_callback_observes_phases() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let mut out = Vec::new();
        let mut b = ContainerBuilder::new(&mut out, &tiny_hparams(), PrecisionMode::ForceF32)
            .expect("builder")
            .with_progress(Box::new(move |p| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert!(p.bytes_written > 0);
            }));
        b.write_header().expect("header");
        b.write_vocabulary(&tiny_vocab()).expect("vocab");
        // Header + Vocabulary phases reported.
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_container_file_name() {
        assert_eq!(
            container_file_name("tiiuae/falcon-7b", PrecisionMode::PreferF16),
            "ggml-model-falcon-7b-f16.bin"
        );
        assert_eq!(
            container_file_name("gpt2", PrecisionMode::ForceF32),
            "ggml-model-gpt2-f32.bin"
        );
    }
}
