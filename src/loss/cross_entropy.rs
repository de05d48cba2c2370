use ndarray::{Array2, Array3, Axis};

/// Categorical cross-entropy over crop-averaged softmax probabilities.
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// Computes the scalar batch loss:
    ///   L = -(1/b) * sum_i sum_c target[i, c] * ln(prob[i, c] + eps)
    ///
    /// which equals `-mean(target * ln(prob + eps)) * num_classes`.
    /// An empty batch has zero loss.
    pub fn loss(prob: &Array2<f32>, target: &Array2<f32>) -> f64 {
        let rows = prob.nrows();
        if rows == 0 {
            return 0.0;
        }
        let total: f64 = prob
            .iter()
            .zip(target.iter())
            .map(|(&p, &t)| -(t as f64) * (p as f64 + EPS).ln())
            .sum();
        total / rows as f64
    }

    /// Gradient of [`loss`](Self::loss) with respect to the logits of every
    /// crop, given the per-crop softmax `crop_probs` `(b, K, C)` whose crop
    /// mean is `prob` `(b, C)`. Rows come out crop-major within each example,
    /// matching the order the crops were fed in: shape `(b * K, C)`.
    pub fn derivative(crop_probs: &Array3<f32>, prob: &Array2<f32>, target: &Array2<f32>) -> Array2<f32> {
        let (rows, crops, classes) = crop_probs.dim();
        let mut d_logits = Array2::zeros((rows * crops, classes));
        if rows == 0 {
            return d_logits;
        }
        let scale = 1.0 / (rows as f64 * crops as f64);
        for i in 0..rows {
            // dL/dp_k for every crop k, identical across crops.
            let d_prob: Vec<f64> = (0..classes)
                .map(|c| -(target[[i, c]] as f64) * scale / (prob[[i, c]] as f64 + EPS))
                .collect();
            for (k, p) in crop_probs.index_axis(Axis(0), i).outer_iter().enumerate() {
                let dot: f64 = p.iter().zip(&d_prob).map(|(&p, &g)| p as f64 * g).sum();
                let mut row = d_logits.row_mut(i * crops + k);
                for c in 0..classes {
                    row[c] = (p[c] as f64 * (d_prob[c] - dot)) as f32;
                }
            }
        }
        d_logits
    }
}
