use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{IntoValue, Value};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::tensor::{argmax_rows, one_hot};

/// Loss, accuracy and per-class breakdown of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub loss: f64,
    pub acc: f64,
    /// Argmax class of every example.
    pub pred: Vec<i64>,
    /// 1.0 where the prediction matches the label.
    pub correct: Vec<f32>,
    /// Share of the batch labeled with each class.
    pub target_frac: Vec<f32>,
    /// Share of the batch correctly predicted as each class.
    pub correct_frac: Vec<f32>,
}

/// Statistics of `prob` against integer `labels`; `regularization` is added
/// to the cross-entropy term of the loss.
pub fn make_stat(prob: &Array2<f32>, labels: &Array1<i64>, regularization: f64) -> Stats {
    let (rows, num_classes) = prob.dim();
    let target = one_hot(labels, num_classes);
    let pred = argmax_rows(prob.view());
    let correct: Array1<f32> = pred
        .iter()
        .zip(labels.iter())
        .map(|(p, l)| if p == l { 1.0 } else { 0.0 })
        .collect();

    let (target_frac, correct_frac, acc) = if rows == 0 {
        (vec![0.0; num_classes], vec![0.0; num_classes], 0.0)
    } else {
        let target_frac = target.mean_axis(Axis(0)).map(|m| m.to_vec()).unwrap_or_default();
        let hits = &target * &correct.view().insert_axis(Axis(1));
        let correct_frac = hits.mean_axis(Axis(0)).map(|m| m.to_vec()).unwrap_or_default();
        (target_frac, correct_frac, correct.mean().unwrap_or(0.0) as f64)
    };

    Stats {
        loss: CrossEntropyLoss::loss(prob, &target) + regularization,
        acc,
        pred: pred.to_vec(),
        correct: correct.to_vec(),
        target_frac,
        correct_frac,
    }
}

impl IntoValue for Stats {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Record(serde_json::to_value(self)?))
    }
}

/// What one optimizer step reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub loss: f64,
    pub acc: f64,
    pub learning_rate: f64,
    pub global_step: u64,
}

impl IntoValue for TrainReport {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Record(serde_json::to_value(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn accuracy_and_fractions() {
        let prob = arr2(&[[0.9f32, 0.1], [0.8, 0.2], [0.3, 0.7], [0.6, 0.4]]);
        let labels = arr1(&[0i64, 1, 1, 1]);
        let stats = make_stat(&prob, &labels, 0.0);
        assert_eq!(stats.pred, vec![0, 0, 1, 0]);
        assert_abs_diff_eq!(stats.acc, 0.5);
        assert_eq!(stats.target_frac, vec![0.25, 0.75]);
        assert_eq!(stats.correct_frac, vec![0.25, 0.25]);
        let expected = -((0.9f64).ln() + (0.2f64).ln() + (0.7f64).ln() + (0.4f64).ln()) / 4.0;
        assert_abs_diff_eq!(stats.loss, expected, epsilon = 1e-5);
    }
}
