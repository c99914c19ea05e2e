//! Conversions between nested numeric data, flat buffers and `ndarray` arrays.
//!
//! All conversions are row-major with the outermost dimension first
//! (batch, then channel/feature, then time). Inference sessions are sensitive
//! to both shape and element order, so nothing here reorders data.

use ndarray::{Array, Array2, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};

/// Arbitrarily nested numeric JSON array, e.g. `[[[0.1, 0.2], [0.3, 0.4]]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedArray {
    Scalar(f32),
    List(Vec<NestedArray>),
}

impl NestedArray {
    /// Collects every scalar depth-first into a single buffer.
    pub fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<f32>) {
        match self {
            NestedArray::Scalar(v) => out.push(*v),
            NestedArray::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }

    /// Shape of a rectangular nesting, or `None` if sibling lists differ in
    /// length or depth.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            NestedArray::Scalar(_) => Some(Vec::new()),
            NestedArray::List(items) => {
                let mut inner: Option<Vec<usize>> = None;
                for item in items {
                    let s = item.shape()?;
                    match &inner {
                        Some(prev) if *prev != s => return None,
                        Some(_) => {}
                        None => inner = Some(s),
                    }
                }
                let mut shape = vec![items.len()];
                shape.extend(inner.unwrap_or_default());
                Some(shape)
            }
        }
    }

    /// Inverse of [`NestedArray::flatten`] for a given shape.
    pub fn from_flat(data: &[f32], shape: &[usize]) -> Result<Self> {
        check_len(data.len(), shape)?;
        Ok(Self::build(data, shape))
    }

    fn build(data: &[f32], shape: &[usize]) -> Self {
        match shape.split_first() {
            None => NestedArray::Scalar(data[0]),
            Some((&n, rest)) => {
                let stride: usize = rest.iter().product();
                NestedArray::List(
                    (0..n)
                        .map(|i| Self::build(&data[i * stride..(i + 1) * stride], rest))
                        .collect(),
                )
            }
        }
    }
}

fn check_len(len: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(SynthesisError::malformed(format!(
            "shape {shape:?} needs {expected} values but {len} were given"
        )));
    }
    Ok(())
}

/// Builds a dynamic-rank array from a flat buffer and an explicit shape.
pub fn array_from_flat(data: Vec<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    check_len(data.len(), shape)?;
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| SynthesisError::malformed(format!("shape error: {e}")))
}

/// Packs equally long id rows into a `(rows, cols)` matrix.
pub fn rows_to_array2(rows: &[Vec<i64>]) -> Result<Array2<i64>> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().find(|r| r.len() != cols) {
        return Err(SynthesisError::malformed(format!(
            "ragged id rows: expected {cols} columns, found {}",
            row.len()
        )));
    }
    let flat: Vec<i64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Array2::from_shape_vec((rows.len(), cols), flat)
        .map_err(|e| SynthesisError::malformed(format!("shape error: {e}")))
}

/// Splits an array into its shape (as `i64`, the form inference runtimes take)
/// and a row-major copy of its elements.
pub fn to_shape_and_data<T, D>(array: &Array<T, D>) -> (Vec<i64>, Vec<T>)
where
    T: Clone,
    D: Dimension,
{
    let shape = array.shape().iter().map(|&d| d as i64).collect();
    let data = array.iter().cloned().collect();
    (shape, data)
}

/// Converts a runtime-reported shape back into `usize` dimensions.
pub fn dims_from_i64(shape: &[i64]) -> Result<Vec<usize>> {
    shape
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                SynthesisError::malformed(format!("dynamic dimension {d} in output shape {shape:?}"))
            })
        })
        .collect()
}
