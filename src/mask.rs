//! Length-to-mask conversion used for both text and latent sequences.

use ndarray::{s, Array3};

use crate::error::{Result, SynthesisError};

/// Builds a `(N, 1, max_len)` mask with `1.0` at `j < lengths[i]` and `0.0`
/// elsewhere. `max_len` defaults to the largest length.
pub fn length_to_mask(lengths: &[i64], max_len: Option<usize>) -> Result<Array3<f32>> {
    if let Some(&bad) = lengths.iter().find(|&&len| len < 0) {
        return Err(SynthesisError::InvalidLength(bad));
    }

    let bsz = lengths.len();
    let max_len = max_len.unwrap_or_else(|| lengths.iter().copied().max().unwrap_or(0) as usize);

    let mut mask = Array3::<f32>::zeros((bsz, 1, max_len));
    for (i, &len) in lengths.iter().enumerate() {
        let valid = (len as usize).min(max_len);
        mask.slice_mut(s![i, 0, ..valid]).fill(1.0);
    }
    Ok(mask)
}

/// Convenience wrapper for unsigned lengths, padded to the batch maximum.
pub fn get_text_mask(text_ids_lengths: &[usize]) -> Result<Array3<f32>> {
    let lengths: Vec<i64> = text_ids_lengths.iter().map(|&len| len as i64).collect();
    length_to_mask(&lengths, None)
}
