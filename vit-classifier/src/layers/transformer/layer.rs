//! Transformer building blocks.
use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildEncoderLayer, EncoderLayer};
use crate::error::BoxedError;
use crate::layers::attention::{SelfAttention, SelfAttentionConfig, SelfAttentionError};
use crate::layers::feedforward::{DenseStack, DenseStackConfig, DenseStackError};

/// Transformer layer configuration.
#[derive(Debug, Default)]
pub struct TransformerLayerConfig {
    attention: SelfAttentionConfig,
    feedforward: DenseStackConfig,
}

impl TransformerLayerConfig {
    /// Attention configuration.
    ///
    /// The input layer norm of the attention configuration normalizes
    /// the layer input before attention.
    ///
    /// Default: `SelfAttentionConfig::default()`
    pub fn attention(mut self, attention: SelfAttentionConfig) -> Self {
        self.attention = attention;
        self
    }

    /// Feed-forward configuration.
    ///
    /// The output width of the feed-forward block must be equal to the
    /// hidden width for the residual connection.
    ///
    /// Default: `DenseStackConfig::default()`
    pub fn feedforward(mut self, feedforward: DenseStackConfig) -> Self {
        self.feedforward = feedforward;
        self
    }

    /// Build a transformer layer.
    pub fn build(&self, vb: VarBuilder) -> Result<TransformerLayer, TransformerLayerError> {
        Ok(TransformerLayer {
            ffn: self
                .feedforward
                .build(vb.push_prefix("ffn"))
                .context(BuildFeedForwardSnafu)?,
            mha: self
                .attention
                .build(vb.push_prefix("attention"))
                .context(BuildSelfAttentionSnafu)?,
        })
    }
}

impl BuildEncoderLayer for TransformerLayerConfig {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError> {
        Ok(Box::new(self.build(vb)?))
    }
}

/// Errors for transformer layers.
#[derive(Debug, Snafu)]
pub enum TransformerLayerError {
    #[snafu(display("Cannot build feed-forward layer"))]
    BuildFeedForward { source: DenseStackError },

    #[snafu(display("Cannot build self-attention layer"))]
    BuildSelfAttention { source: SelfAttentionError },

    #[snafu(display("Cannot apply point-wise feed-forward layer"))]
    FeedForward { source: candle_core::Error },

    #[snafu(display("Cannot apply residual connection"))]
    Residual { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention"))]
    SelfAttention { source: SelfAttentionError },
}

/// Pre-normalization transformer encoder layer.
///
/// The input of the attention and feed-forward blocks is normalized, the
/// residual stream itself is not:
///
/// ```text
/// h = x + attention(norm(x))
/// y = h + ffn(norm(h))
/// ```
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762) and
/// [Xiong et al. (2020)](https://arxiv.org/abs/2002.04745).
pub struct TransformerLayer {
    ffn: DenseStack,
    mha: SelfAttention,
}

impl TransformerLayer {
    /// Apply the transformer layer to the given hidden representations.
    ///
    /// * `input` - Hidden representations to apply the layer to.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `train` - Whether to train the layer.
    ///
    /// Returns layer output.
    /// *Shape:* ``(batch_size, seq_len, width)``
    pub fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor, TransformerLayerError> {
        let attn_out = self
            .mha
            .forward_t(input, train)
            .context(SelfAttentionSnafu)?;

        let residual = (attn_out + input).context(ResidualSnafu)?;

        let ffn_out = self
            .ffn
            .forward_t(&residual, train)
            .context(FeedForwardSnafu)?;

        (ffn_out + residual).context(ResidualSnafu)
    }
}

impl EncoderLayer for TransformerLayer {
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, BoxedError> {
        Ok(self.forward(input, train)?)
    }
}
