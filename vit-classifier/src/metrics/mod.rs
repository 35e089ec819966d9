//! Streaming classification metrics.
use candle_core::Tensor;

mod balanced;
pub use balanced::BalancedSparseCategoricalAccuracy;

mod sparse_categorical;
pub use sparse_categorical::{AccuracyError, SparseCategoricalAccuracy};

use crate::error::BoxedError;

/// Trait for metrics that are accumulated over batches.
pub trait Metric {
    /// Name of the metric.
    fn name(&self) -> &str;

    /// Accumulate the metric over a batch.
    ///
    /// * `y_true` - Gold class identifiers.
    ///   *Shape:* `(batch_size,)` or `(batch_size, 1)`
    /// * `y_pred` - Class scores.
    ///   *Shape:* `(batch_size, n_classes)`
    /// * `sample_weight` - Optional weight of each sample.
    ///   *Shape:* `(batch_size,)`
    fn update_state(
        &mut self,
        y_true: &Tensor,
        y_pred: &Tensor,
        sample_weight: Option<&Tensor>,
    ) -> Result<(), BoxedError>;

    /// Metric value over all batches since the last reset.
    fn result(&self) -> f64;

    /// Clear the accumulated state.
    fn reset_state(&mut self);
}
