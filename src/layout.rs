//! Fused attention weight layout rewrite.
//!
//! Checkpoints in the multi-query lineage store the query/key/value
//! projection as one fused tensor with an interleaved group layout: for
//! each kv group, `n_head / n_head_kv` query sub-blocks followed by one
//! key and one value sub-block. The runtime wants the canonical layout —
//! all Q sub-blocks, then all K, then all V.
//!
//! The rewrite is pure index arithmetic over the flat buffer: rows of
//! `hidden_size` elements move in `head_dim`-row sub-blocks, nothing is
//! recomputed. [`interleave`] is the exact inverse of [`canonicalize`].

use crate::error::{EnvasarError, Result};
use crate::hparams::Hyperparameters;

/// Logical decomposition of the fused tensor's flat buffer.
///
/// View: `[n_head_kv, n_head/n_head_kv + 2, head_dim, hidden_size]`.
struct FusedView {
    groups: usize,
    queries_per_group: usize,
    /// Elements per sub-block: `head_dim * hidden_size`.
    block: usize,
}

impl FusedView {
    fn for_tensor(name: &str, len: usize, hparams: &Hyperparameters) -> Result<Self> {
        let groups = hparams.n_head_kv();
        let queries_per_group = hparams.queries_per_group();
        let block = hparams.head_dim() * hparams.hidden_size;
        let expected = groups * (queries_per_group + 2) * block;
        if len != expected {
            return Err(EnvasarError::Layout {
                tensor: name.to_string(),
                message: format!(
                    "buffer has {} elements, expected {} for [{}x{}x{}x{}] fused view",
                    len,
                    expected,
                    groups,
                    queries_per_group + 2,
                    hparams.head_dim(),
                    hparams.hidden_size
                ),
            });
        }
        Ok(Self {
            groups,
            queries_per_group,
            block,
        })
    }

    /// Canonical sub-block index for the interleaved position `(g, s)`.
    ///
    /// Q sub-blocks occupy `[0, n_head)`, K `[n_head, n_head+n_head_kv)`,
    /// V the final `n_head_kv`.
    fn canonical_index(&self, group: usize, sub: usize) -> usize {
        let n_head = self.groups * self.queries_per_group;
        if sub < self.queries_per_group {
            group * self.queries_per_group + sub
        } else if sub == self.queries_per_group {
            n_head + group
        } else {
            n_head + self.groups + group
        }
    }
}

/// Rewrite a fused attention buffer from interleaved-group layout to the
/// canonical Q|K|V layout.
///
/// Count-preserving pure reindexing; with a single kv group (the
/// no-grouping default) the permutation is the identity. Allocates one
/// temporary buffer of the tensor's size.
///
/// # Errors
///
/// `Layout` when the buffer length does not match the
/// `[n_head_kv, n_head/n_head_kv + 2, head_dim, hidden_size]`
/// decomposition. Head-count divisibility is a hyperparameter invariant
/// checked by [`Hyperparameters::validate`] before any tensor is touched.
pub fn canonicalize(name: &str, data: &[f32], hparams: &Hyperparameters) -> Result<Vec<f32>> {
    let view = FusedView::for_tensor(name, data.len(), hparams)?;
    let mut out = vec![0.0f32; data.len()];

    for group in 0..view.groups {
        for sub in 0..view.queries_per_group + 2 {
            let src = (group * (view.queries_per_group + 2) + sub) * view.block;
            let dst = view.canonical_index(group, sub) * view.block;
            out[dst..dst + view.block].copy_from_slice(&data[src..src + view.block]);
        }
    }

    Ok(out)
}

/// Inverse of [`canonicalize`]: restore the checkpoint's interleaved
/// layout bit-for-bit.
///
/// # Errors
///
/// Same length check as [`canonicalize`].
pub fn interleave(name: &str, data: &[f32], hparams: &Hyperparameters) -> Result<Vec<f32>> {
    let view = FusedView::for_tensor(name, data.len(), hparams)?;
    let mut out = vec![0.0f32; data.len()];

    for group in 0..view.groups {
        for sub in 0..view.queries_per_group + 2 {
            let dst = (group * (view.queries_per_group + 2) + sub) * view.block;
            let src = view.canonical_index(group, sub) * view.block;
            out[dst..dst + view.block].copy_from_slice(&data[src..src + view.block]);
        }
    }

    Ok(out)
}
