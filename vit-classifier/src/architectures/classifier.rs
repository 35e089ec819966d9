use std::fmt::Debug;

use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

use crate::architectures::{BuildArchitecture, EncoderOutput, LayerOutputs};
use crate::error::BoxedError;

/// Image classifier output.
pub struct ClassifierOutput {
    encoder_output: EncoderOutput,
    logits: Tensor,
}

impl ClassifierOutput {
    /// Create a classifier output.
    pub fn new(encoder_output: EncoderOutput, logits: Tensor) -> Self {
        Self {
            encoder_output,
            logits,
        }
    }

    /// Unnormalized class scores.
    ///
    /// *Shape:* `(batch_size, n_classes)`
    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    /// Output of the encoder that the classifier head was applied to.
    pub fn encoder_output(&self) -> &EncoderOutput {
        &self.encoder_output
    }
}

impl LayerOutputs for ClassifierOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        self.encoder_output.layer_outputs()
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.encoder_output.embedding_layer_output()
    }
}

/// Trait for image classifiers.
pub trait ImageClassifier {
    /// Classify a batch of images.
    ///
    /// * `images` - Input images.
    ///   *Shape:* `(batch_size, height, width, channels)`
    /// * `train` - Whether to train the layer.
    fn forward_t(&self, images: &Tensor, train: bool) -> Result<ClassifierOutput, BoxedError>;

    /// Predict the most likely class of each image.
    ///
    /// Returns: class identifiers as `u32`.
    /// *Shape:* `(batch_size,)`
    fn predict(&self, images: &Tensor) -> Result<Tensor, BoxedError> {
        let output = self.forward_t(images, false)?;
        Ok(output.logits().argmax(D::Minus1)?)
    }
}

/// Trait for building image classifiers.
pub trait BuildImageClassifier: Debug {
    /// Classifier type.
    type ImageClassifier: ImageClassifier;

    /// Build an image classifier.
    fn build(&self, vb: VarBuilder) -> Result<Self::ImageClassifier, BoxedError>;
}

impl<C> BuildImageClassifier for C
where
    C: BuildArchitecture + Debug,
    C::Architecture: ImageClassifier,
{
    type ImageClassifier = C::Architecture;

    fn build(&self, vb: VarBuilder) -> Result<Self::ImageClassifier, BoxedError> {
        BuildArchitecture::build(self, vb)
    }
}
