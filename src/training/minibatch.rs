//! Minibatch index generation.

use crate::error::{Result, TrainError};
use crate::rng::PrngKey;

/// Shuffles `0..batch_size` with `key` and partitions the permutation into
/// `num_minibatches` equal, disjoint chunks.
pub fn minibatch_indices(
    key: PrngKey,
    batch_size: usize,
    num_minibatches: usize,
) -> Result<Vec<Vec<usize>>> {
    if num_minibatches == 0 || batch_size % num_minibatches != 0 {
        return Err(TrainError::InvalidConfig(format!(
            "cannot split {batch_size} transitions into {num_minibatches} equal minibatches"
        )));
    }
    let size = batch_size / num_minibatches;
    let permutation = key.permutation(batch_size);
    Ok(permutation.chunks(size).map(<[usize]>::to_vec).collect())
}
