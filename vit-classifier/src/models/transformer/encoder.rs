//! Transformer encoder.
use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildArchitecture, BuildEmbeddings, Embeddings};
use crate::architectures::{BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput};
use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;
use crate::layers::embeddings::PatchEncoderConfig;
use crate::layers::identity::Identity;
use crate::layers::transformer::TransformerLayerConfig;

/// Transformer encoder configuration.
#[derive(Debug)]
pub struct TransformerEncoderConfig {
    embeddings: Box<dyn BuildEmbeddings>,
    layer: Box<dyn BuildEncoderLayer>,
    n_hidden_layers: usize,
    output_layer_norm: Box<dyn BuildModule>,
}

impl TransformerEncoderConfig {
    /// Encoder embeddings.
    ///
    /// Default: `PatchEncoderConfig::default()`
    pub fn embeddings(mut self, embeddings: Box<dyn BuildEmbeddings>) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Encoder layer.
    ///
    /// Default: `TransformerLayerConfig::default()`
    pub fn layer(mut self, layer: Box<dyn BuildEncoderLayer>) -> Self {
        self.layer = layer;
        self
    }

    /// Number of hidden layers.
    ///
    /// Default: `1`
    pub fn n_hidden_layers(mut self, n_hidden_layers: usize) -> Self {
        self.n_hidden_layers = n_hidden_layers;
        self
    }

    /// Output layer normalization module.
    ///
    /// Default: `Identity`
    pub fn output_layer_norm(mut self, output_layer_norm: Box<dyn BuildModule>) -> Self {
        self.output_layer_norm = output_layer_norm;
        self
    }
}

impl BuildArchitecture for TransformerEncoderConfig {
    type Architecture = TransformerEncoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let embeddings = self
            .embeddings
            .build(vb.push_prefix("embeddings"))
            .context(BuildEmbeddingsSnafu)?;

        let layers = (0..self.n_hidden_layers)
            .map(|n| {
                self.layer
                    .build_encoder_layer(vb.push_prefix(format!("layer_{n}")))
                    .context(BuildTransformerLayerSnafu { n })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformerEncoder {
            embeddings,
            layers,
            output_layer_norm: self
                .output_layer_norm
                .build(vb.push_prefix("output_layer_norm"))
                .context(BuildLayerNormSnafu)?,
        })
    }
}

impl Default for TransformerEncoderConfig {
    fn default() -> Self {
        Self {
            embeddings: Box::<PatchEncoderConfig>::default(),
            layer: Box::<TransformerLayerConfig>::default(),
            n_hidden_layers: 1,
            output_layer_norm: Box::new(Identity),
        }
    }
}

/// Transformer encoder errors.
#[derive(Debug, Snafu)]
pub enum TransformerEncoderError {
    #[snafu(display("Cannot build embeddings"))]
    BuildEmbeddings { source: BoxedError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot build transformer layer {n}"))]
    BuildTransformerLayer { source: BoxedError, n: usize },

    #[snafu(display("Cannot apply embeddings"))]
    Embedding { source: BoxedError },

    #[snafu(display("Cannot apply layer norm"))]
    LayerNorm { source: candle_core::Error },

    #[snafu(display("Cannot apply transformer layer {n}"))]
    TransformerLayer { source: BoxedError, n: usize },
}

/// Image encoder using the transformer architecture.
pub struct TransformerEncoder {
    embeddings: Box<dyn Embeddings>,
    layers: Vec<Box<dyn EncoderLayer>>,
    output_layer_norm: Box<dyn ModuleT>,
}

impl Encoder for TransformerEncoder {
    fn forward_t(&self, images: &Tensor, train: bool) -> Result<EncoderOutput, BoxedError> {
        let embeddings = self
            .embeddings
            .forward(images, train)
            .context(EmbeddingSnafu)?;

        let mut layer_output = embeddings;
        let mut layer_outputs = Vec::with_capacity(self.layers.len() + 1);
        layer_outputs.push(layer_output.clone());

        for (n, layer) in self.layers.iter().enumerate() {
            let next_layer_output = layer
                .forward_t(&layer_output, train)
                .context(TransformerLayerSnafu { n })?;

            layer_outputs.push(next_layer_output.clone());
            layer_output = next_layer_output;
        }

        if let Some(last) = layer_outputs.last_mut() {
            *last = self
                .output_layer_norm
                .forward_t(last, train)
                .context(LayerNormSnafu)?;
        }

        Ok(EncoderOutput::new(layer_outputs))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::TransformerEncoderConfig;
    use crate::architectures::{BuildEncoder, Encoder, LayerOutputs};
    use crate::layers::attention::SelfAttentionConfig;
    use crate::layers::embeddings::PatchEncoderConfig;
    use crate::layers::feedforward::DenseStackConfig;
    use crate::layers::layer_norm::LayerNormConfig;
    use crate::layers::patches::PatchesConfig;
    use crate::layers::transformer::TransformerLayerConfig;
    use crate::util::device::tests::test_devices;

    #[test]
    #[report]
    fn encoder_returns_embedding_and_layer_outputs() -> Result<(), Whatever> {
        for device in test_devices() {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let layer_norm = LayerNormConfig::default().size(8);
            let encoder = TransformerEncoderConfig::default()
                .embeddings(Box::new(
                    PatchEncoderConfig::default()
                        .embedding_width(8)
                        .n_channels(3)
                        .n_patches(9)
                        .patches(PatchesConfig::default().patch_size(4)),
                ))
                .layer(Box::new(
                    TransformerLayerConfig::default()
                        .attention(
                            SelfAttentionConfig::default()
                                .head_width(8)
                                .hidden_width(8)
                                .layer_norm(Box::new(layer_norm.clone())),
                        )
                        .feedforward(
                            DenseStackConfig::default()
                                .input_width(8)
                                .layer_norm(Box::new(layer_norm.clone()))
                                .units(vec![16, 8]),
                        ),
                ))
                .n_hidden_layers(3)
                .output_layer_norm(Box::new(layer_norm))
                .build(vb)
                .map_err(|e| Whatever::with_source(e, "Cannot build encoder".to_string()))?;

            let images = Tensor::rand(0f32, 255., (2, 12, 12, 3), &device)
                .whatever_context("Cannot create images")?;
            let output = encoder
                .forward_t(&images, false)
                .map_err(|e| Whatever::with_source(e, "Cannot encode images".to_string()))?;

            assert_eq!(output.layer_outputs().len(), 4);
            for layer_output in output.layer_outputs() {
                assert_eq!(layer_output.dims(), &[2, 9, 8]);
            }
        }

        Ok(())
    }
}
