//! Named tensors and storage dtypes.
//!
//! A [`NamedTensor`] is what the checkpoint loader hands over: a name, a
//! semantic (framework-order) shape, and a flat row-major f32 buffer. The
//! storage dtype is chosen later, per record.

use crate::error::{EnvasarError, Result};

/// Substring identifying the fused query/key/value projection weight.
pub const FUSED_ATTENTION_MARKER: &str = "query_key_value";

/// Storage dtype of one tensor record.
///
/// Codes match the ggml tensor type constants (F32=0, F16=1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
}

impl DType {
    /// Dtype code written to the record.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
        }
    }

    /// Bytes per element in the record's data section.
    #[must_use]
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
        }
    }
}

/// Pipeline-facing classification of a checkpoint tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorClass {
    /// Fused query/key/value projection; needs the layout rewrite.
    Fused,
    /// Everything else; written as-is.
    Plain,
}

/// Classify a tensor by name.
///
/// This is the only place the fusion marker string is consulted; the rest
/// of the pipeline branches on the returned class.
#[must_use]
pub fn classify(name: &str) -> TensorClass {
    if name.contains(FUSED_ATTENTION_MARKER) {
        TensorClass::Fused
    } else {
        TensorClass::Plain
    }
}

/// One tensor as produced by the checkpoint loader.
///
/// The shape is semantic (creation order); the buffer is row-major in that
/// shape. Ownership moves into the builder for the duration of one record
/// write, then the buffer is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    /// Source tensor name, written verbatim into the record.
    pub name: String,
    /// Semantic shape (framework order, not storage order).
    pub shape: Vec<usize>,
    /// Flat row-major buffer matching `shape`.
    pub data: Vec<f32>,
}

impl NamedTensor {
    /// Create a tensor, checking that the buffer matches the shape.
    ///
    /// # Errors
    ///
    /// `Layout` when the element count implied by `shape` differs from
    /// `data.len()`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(EnvasarError::Layout {
                tensor: name,
                message: format!(
                    "shape {:?} implies {} elements, buffer has {}",
                    shape,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self { name, shape, data })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Semantic rank before squeezing.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Shape with all size-1 dimensions removed.
    ///
    /// Records store the squeezed shape, which may reduce rank relative to
    /// the source tensor. A shape that is entirely size-1 dimensions
    /// squeezes to `[1]` rather than rank 0, so the record stays readable.
    #[must_use]
    pub fn squeezed_shape(&self) -> Vec<usize> {
        let squeezed: Vec<usize> = self.shape.iter().copied().filter(|&d| d != 1).collect();
        if squeezed.is_empty() {
            vec![1]
        } else {
            squeezed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_codes_and_sizes() {
        assert_eq!(DType::F32.code(), 0);
        assert_eq!(DType::F16.code(), 1);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
    }

    #[test]
    fn test_classify_fused() {
        assert_eq!(
            classify("transformer.h.0.self_attention.query_key_value.weight"),
            TensorClass::Fused
        );
    }

    #[test]
    fn test_classify_plain() {
        assert_eq!(
            classify("transformer.h.0.mlp.dense_h_to_4h.weight"),
            TensorClass::Plain
        );
        assert_eq!(classify("transformer.word_embeddings.weight"), TensorClass::Plain);
    }

    #[test]
    fn test_new_checks_buffer_length() {
        let err = NamedTensor::new("w", vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(err.to_string().contains("implies 6 elements"));

        let ok = NamedTensor::new("w", vec![2, 3], vec![0.0; 6]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_squeeze_drops_unit_dims() {
        let t = NamedTensor::new("w", vec![1, 4, 1, 3], vec![0.0; 12]).expect("tensor");
        assert_eq!(t.squeezed_shape(), vec![4, 3]);
        assert_eq!(t.rank(), 4);
    }

    #[test]
    fn test_squeeze_bias_to_rank_one() {
        let t = NamedTensor::new("b", vec![1, 8], vec![0.0; 8]).expect("tensor");
        assert_eq!(t.squeezed_shape(), vec![8]);
    }

    #[test]
    fn test_squeeze_all_ones_keeps_rank_one() {
        let t = NamedTensor::new("s", vec![1, 1], vec![0.5]).expect("tensor");
        assert_eq!(t.squeezed_shape(), vec![1]);
    }

    #[test]
    fn test_squeeze_leaves_plain_shape_alone() {
        let t = NamedTensor::new("w", vec![4, 3], vec![0.0; 12]).expect("tensor");
        assert_eq!(t.squeezed_shape(), vec![4, 3]);
    }
}
