use candle_core::Tensor;
use snafu::{ensure, ResultExt};

use crate::error::BoxedError;
use crate::metrics::sparse_categorical::{
    flatten_labels, AccuracyError, ClassCountsSnafu, LabelOutOfRangeSnafu, PredictionShapeSnafu,
};
use crate::metrics::{Metric, SparseCategoricalAccuracy};

/// Sparse categorical accuracy that gives every class in a batch the
/// same total weight.
///
/// Each sample is weighted by the reciprocal of the number of samples of
/// its gold class within the batch. On imbalanced data this approximates
/// the mean of the per-class recalls, so that a classifier cannot score
/// well by only predicting the majority class.
///
/// The weights are computed per batch, results accumulated over batches
/// with different class distributions are not the recall average over
/// the full dataset.
#[derive(Clone, Debug)]
pub struct BalancedSparseCategoricalAccuracy {
    inner: SparseCategoricalAccuracy,
}

impl BalancedSparseCategoricalAccuracy {
    /// Create the metric with the default name.
    pub fn new() -> Self {
        Self::with_name("balanced_sparse_categorical_accuracy")
    }

    /// Create the metric with the given name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: SparseCategoricalAccuracy::with_name(name),
        }
    }

    /// Accumulate the balanced accuracy over a batch.
    ///
    /// * `y_true` - Gold class identifiers.
    ///   *Shape:* `(batch_size,)` or `(batch_size, 1)`
    /// * `y_pred` - Class scores.
    ///   *Shape:* `(batch_size, n_classes)`
    pub fn update(&mut self, y_true: &Tensor, y_pred: &Tensor) -> Result<(), AccuracyError> {
        ensure!(
            y_pred.rank() >= 2,
            PredictionShapeSnafu {
                shape: y_pred.dims().to_vec()
            }
        );
        let n_classes = y_pred.dims()[y_pred.rank() - 1];

        let labels = flatten_labels(y_true, y_pred)?;
        let weights = class_balanced_weights(&labels, n_classes)?;
        self.inner.update(&labels, y_pred, Some(&weights))
    }
}

impl Default for BalancedSparseCategoricalAccuracy {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for BalancedSparseCategoricalAccuracy {
    fn name(&self) -> &str {
        self.inner.name()
    }

    /// Accumulate the balanced accuracy over a batch.
    ///
    /// The sample weights are replaced by the class-balancing weights,
    /// `sample_weight` is ignored.
    fn update_state(
        &mut self,
        y_true: &Tensor,
        y_pred: &Tensor,
        sample_weight: Option<&Tensor>,
    ) -> Result<(), BoxedError> {
        if sample_weight.is_some() {
            log::debug!(
                "{} ignores sample weights, using class-balancing weights",
                self.name()
            );
        }
        Ok(self.update(y_true, y_pred)?)
    }

    fn result(&self) -> f64 {
        self.inner.result()
    }

    fn reset_state(&mut self) {
        self.inner.reset_state()
    }
}

/// Weight each label by the reciprocal of its count in the batch.
fn class_balanced_weights(labels: &Tensor, n_classes: usize) -> Result<Tensor, AccuracyError> {
    let labels_vec = labels.to_vec1::<u32>().context(ClassCountsSnafu)?;

    let mut counts = vec![0usize; n_classes];
    for &label in &labels_vec {
        ensure!(
            (label as usize) < n_classes,
            LabelOutOfRangeSnafu { label, n_classes }
        );
        counts[label as usize] += 1;
    }

    let weights = labels_vec
        .iter()
        .map(|&label| reciprocal_no_nan(counts[label as usize]))
        .collect::<Vec<_>>();

    Tensor::from_vec(weights, labels_vec.len(), labels.device()).context(ClassCountsSnafu)
}

fn reciprocal_no_nan(count: usize) -> f32 {
    if count == 0 {
        0.0
    } else {
        1.0 / count as f32
    }
}
