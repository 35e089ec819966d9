//! Traits for model architectures.
use candle_nn::VarBuilder;

mod classifier;
pub use classifier::{BuildImageClassifier, ClassifierOutput, ImageClassifier};

mod embeddings;
pub use embeddings::{BuildEmbeddings, Embeddings};

mod encoder;
pub use encoder::{BuildEncoder, BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput};

mod output;
pub use output::LayerOutputs;

use crate::error::BoxedError;

/// Trait for building model architectures.
pub trait BuildArchitecture {
    /// The architecture to build.
    type Architecture;

    /// Build the architecture.
    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError>;
}
