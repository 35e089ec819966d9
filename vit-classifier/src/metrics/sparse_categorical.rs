use candle_core::{DType, Tensor, D};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::metrics::Metric;

/// Accuracy metric errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AccuracyError {
    #[snafu(display("Cannot accumulate correct predictions"))]
    Accumulate { source: candle_core::Error },

    #[snafu(display("Cannot get predicted classes"))]
    ArgMax { source: candle_core::Error },

    #[snafu(display("Cannot count labels per class"))]
    ClassCounts { source: candle_core::Error },

    #[snafu(display("Cannot convert gold labels to class identifiers"))]
    Labels { source: candle_core::Error },

    #[snafu(display("Got {n_labels} gold labels for {n_predictions} predictions"))]
    LabelCount {
        n_labels: usize,
        n_predictions: usize,
    },

    #[snafu(display("Label {label} is not a class identifier, there are {n_classes} classes"))]
    LabelOutOfRange { label: u32, n_classes: usize },

    #[snafu(display("Predictions must have a class dimension, got shape {shape:?}"))]
    PredictionShape { shape: Vec<usize> },

    #[snafu(display("Got {n_weights} sample weights for {n_predictions} predictions"))]
    WeightCount {
        n_predictions: usize,
        n_weights: usize,
    },

    #[snafu(display("Cannot convert sample weights"))]
    Weights { source: candle_core::Error },
}

/// Flatten gold labels to a vector of class identifiers.
///
/// When the labels have the same rank as the predictions, the trailing
/// unit axis of the labels is removed first.
pub(crate) fn flatten_labels(y_true: &Tensor, y_pred: &Tensor) -> Result<Tensor, AccuracyError> {
    let y_true = if y_true.rank() == y_pred.rank() {
        y_true.squeeze(D::Minus1).context(LabelsSnafu)?
    } else {
        y_true.clone()
    };

    y_true
        .flatten_all()
        .and_then(|labels| labels.to_dtype(DType::U32))
        .context(LabelsSnafu)
}

/// Weighted accuracy of sparse class predictions.
///
/// A prediction is correct when the class with the highest score is the
/// gold class. The metric accumulates the sum of the weights of correct
/// predictions and the sum of all weights, the result is their ratio.
#[derive(Clone, Debug)]
pub struct SparseCategoricalAccuracy {
    count: f64,
    name: String,
    total: f64,
}

impl SparseCategoricalAccuracy {
    /// Create the metric with the default name.
    pub fn new() -> Self {
        Self::with_name("sparse_categorical_accuracy")
    }

    /// Create the metric with the given name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            count: 0.0,
            name: name.into(),
            total: 0.0,
        }
    }

    /// Sum of the weights of all accumulated samples.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Sum of the weights of correctly classified samples.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Accumulate the accuracy over a batch.
    ///
    /// Samples have unit weight when `sample_weight` is `None`.
    pub fn update(
        &mut self,
        y_true: &Tensor,
        y_pred: &Tensor,
        sample_weight: Option<&Tensor>,
    ) -> Result<(), AccuracyError> {
        ensure!(
            y_pred.rank() >= 2,
            PredictionShapeSnafu {
                shape: y_pred.dims().to_vec()
            }
        );

        let dims = y_pred.dims();
        let n_predictions = dims[..dims.len() - 1].iter().product::<usize>();

        let labels = flatten_labels(y_true, y_pred)?;
        ensure!(
            labels.elem_count() == n_predictions,
            LabelCountSnafu {
                n_labels: labels.elem_count(),
                n_predictions
            }
        );

        if n_predictions == 0 {
            return Ok(());
        }

        let predictions = y_pred
            .argmax(D::Minus1)
            .and_then(|predictions| predictions.flatten_all())
            .context(ArgMaxSnafu)?;

        let weights = match sample_weight {
            Some(weights) => {
                let weights = weights
                    .flatten_all()
                    .and_then(|weights| weights.to_dtype(DType::F32))
                    .context(WeightsSnafu)?;
                ensure!(
                    weights.elem_count() == n_predictions,
                    WeightCountSnafu {
                        n_predictions,
                        n_weights: weights.elem_count()
                    }
                );
                weights
            }
            None => {
                Tensor::ones(n_predictions, DType::F32, y_pred.device()).context(WeightsSnafu)?
            }
        };

        let correct = predictions
            .eq(&labels)
            .and_then(|correct| correct.to_dtype(DType::F32))
            .and_then(|correct| correct * &weights)
            .and_then(|correct| correct.sum_all())
            .and_then(|correct| correct.to_scalar::<f32>())
            .context(AccumulateSnafu)?;
        let count = weights
            .sum_all()
            .and_then(|count| count.to_scalar::<f32>())
            .context(AccumulateSnafu)?;

        self.total += correct as f64;
        self.count += count as f64;

        Ok(())
    }
}

impl Default for SparseCategoricalAccuracy {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for SparseCategoricalAccuracy {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_state(
        &mut self,
        y_true: &Tensor,
        y_pred: &Tensor,
        sample_weight: Option<&Tensor>,
    ) -> Result<(), BoxedError> {
        Ok(self.update(y_true, y_pred, sample_weight)?)
    }

    fn result(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.total / self.count
        }
    }

    fn reset_state(&mut self) {
        self.count = 0.0;
        self.total = 0.0;
    }
}
