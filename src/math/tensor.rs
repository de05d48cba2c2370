use ndarray::{concatenate, stack, Array1, Array2, ArrayD, ArrayView2, Axis, IxDyn};

use crate::error::{Error, Result};

/// Stacks equally shaped examples along a new leading batch axis.
///
/// `empty_shape` is the per-example shape used when `items` is empty, so an
/// empty batch still has the right rank.
pub fn stack_examples<A: Clone + Default>(items: &[ArrayD<A>], empty_shape: &[usize]) -> Result<ArrayD<A>> {
    if items.is_empty() {
        let mut shape = vec![0];
        shape.extend_from_slice(empty_shape);
        return Ok(ArrayD::default(IxDyn(&shape)));
    }
    let views: Vec<_> = items.iter().map(|item| item.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

/// Concatenates chunks along their leading axis.
pub fn concat_rows<A: Clone + Default>(chunks: &[ArrayD<A>], empty_shape: &[usize]) -> Result<ArrayD<A>> {
    if chunks.is_empty() {
        let mut shape = vec![0];
        shape.extend_from_slice(empty_shape);
        return Ok(ArrayD::default(IxDyn(&shape)));
    }
    let views: Vec<_> = chunks.iter().map(|chunk| chunk.view()).collect();
    Ok(concatenate(Axis(0), &views)?)
}

/// Merges the two leading axes: `(a, b, ...) -> (a * b, ...)`.
pub fn merge_leading<A: Clone>(array: ArrayD<A>) -> Result<ArrayD<A>> {
    let shape = array.shape().to_vec();
    if shape.len() < 2 {
        return Err(Error::contract(format!("cannot merge leading axes of shape {shape:?}")));
    }
    let mut merged = vec![shape[0] * shape[1]];
    merged.extend_from_slice(&shape[2..]);
    Ok(array.as_standard_layout().into_owned().into_shape_with_order(IxDyn(&merged))?)
}

/// Row-wise numerically stable softmax.
pub fn softmax_rows(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// One-hot rows; labels outside `0..num_classes` give an all-zero row.
pub fn one_hot(labels: &Array1<i64>, num_classes: usize) -> Array2<f32> {
    let mut target = Array2::zeros((labels.len(), num_classes));
    for (row, &label) in labels.iter().enumerate() {
        if label >= 0 && (label as usize) < num_classes {
            target[[row, label as usize]] = 1.0;
        }
    }
    target
}

pub fn argmax_rows(values: ArrayView2<f32>) -> Array1<i64> {
    values
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i as i64)
                .unwrap_or(0)
        })
        .collect()
}

/// Indices of the `k` largest entries, in descending order of value.
pub fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(k);
    order
}
