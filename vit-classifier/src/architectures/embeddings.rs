use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Trait for image embedding layers.
pub trait Embeddings {
    /// Embed a batch of images as a sequence of hidden representations.
    ///
    /// * `images` - Input images.
    ///   *Shape:* `(batch_size, height, width, channels)`
    /// * `train` - Whether to train the layer.
    ///
    /// Returns: embeddings.
    /// *Shape:* `(batch_size, seq_len, width)`
    fn forward(&self, images: &Tensor, train: bool) -> Result<Tensor, BoxedError>;
}

/// Trait for building embedding layers.
pub trait BuildEmbeddings: Debug {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError>;
}
