use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{AttentionScorer, BuildAttentionScorer, SDPAConfig};
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Self-attention configuration.
#[derive(Debug)]
pub struct SelfAttentionConfig {
    attention_scorer: Box<dyn BuildAttentionScorer>,
    dropout: Box<dyn BuildModule>,
    head_width: usize,
    hidden_width: usize,
    layer_norm: Box<dyn BuildModule>,
    n_heads: usize,
}

impl SelfAttentionConfig {
    /// Attention scorer.
    ///
    /// Default: `SDPAConfig::default()`.
    pub fn attention_scorer(mut self, attention_scorer: Box<dyn BuildAttentionScorer>) -> Self {
        self.attention_scorer = attention_scorer;
        self
    }

    /// Dropout to apply after attention.
    ///
    /// Default: `Identity`.
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the query and key of a single head.
    ///
    /// The head width does not have to divide the hidden width, the
    /// concatenated heads are projected back to the hidden width.
    ///
    /// Default: `32`.
    pub fn head_width(mut self, head_width: usize) -> Self {
        self.head_width = head_width;
        self
    }

    /// Hidden width of the transformer.
    ///
    /// Default: `32`.
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Layer norm applied to the input.
    ///
    /// Default: `Identity`.
    pub fn layer_norm(mut self, layer_norm: Box<dyn BuildModule>) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `2`.
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Build a self-attention module.
    pub fn build(&self, vb: VarBuilder) -> Result<SelfAttention, SelfAttentionError> {
        ensure!(
            self.n_heads > 0 && self.head_width > 0,
            InvalidHeadsSnafu {
                head_width: self.head_width,
                n_heads: self.n_heads,
            }
        );

        let hidden_width = self.hidden_width;
        let all_heads_width = self.n_heads * self.head_width;

        Ok(SelfAttention {
            attention_scorer: self
                .attention_scorer
                .build(vb.clone())
                .context(BuildAttentionScorerSnafu)?,
            dropout: self
                .dropout
                .build(vb.push_prefix("dropout"))
                .context(BuildDropoutSnafu)?,
            layer_norm: self
                .layer_norm
                .build(vb.push_prefix("layer_norm"))
                .context(BuildLayerNormSnafu)?,
            n_heads: self.n_heads,
            output: linear(all_heads_width, hidden_width, vb.push_prefix("output"))
                .context(SelfAttentionConstructionSnafu)?,
            query: linear(hidden_width, all_heads_width, vb.push_prefix("query"))
                .context(SelfAttentionConstructionSnafu)?,
            key: linear(hidden_width, all_heads_width, vb.push_prefix("key"))
                .context(SelfAttentionConstructionSnafu)?,
            value: linear(hidden_width, all_heads_width, vb.push_prefix("value"))
                .context(SelfAttentionConstructionSnafu)?,
        })
    }
}

impl Default for SelfAttentionConfig {
    fn default() -> Self {
        Self {
            attention_scorer: Box::<SDPAConfig>::default(),
            dropout: Box::new(Identity),
            head_width: 32,
            hidden_width: 32,
            layer_norm: Box::new(Identity),
            n_heads: 2,
        }
    }
}

/// Errors for self-attention.
#[derive(Debug, Snafu)]
pub enum SelfAttentionError {
    #[snafu(display("Cannot apply attention scorer"))]
    AttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build attention scorer"))]
    BuildAttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot combine heads"))]
    CombineHeads { source: candle_core::Error },

    #[snafu(display(
        "Number of heads ({n_heads}) and head width ({head_width}) must be larger than zero"
    ))]
    InvalidHeads { head_width: usize, n_heads: usize },

    #[snafu(display("Cannot apply layer norm"))]
    LayerNorm { source: candle_core::Error },

    #[snafu(display("Cannot apply output layer"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot calculate key, query, or value"))]
    Qkv { source: candle_core::Error },

    #[snafu(display("Cannot construct layer"))]
    SelfAttentionConstruction { source: candle_core::Error },

    #[snafu(display("Cannot split heads"))]
    SplitHeads { source: candle_core::Error },
}

/// Transformer multi-head self-attention layer.
///
/// Every sequence element attends to every sequence element, there is
/// no masking.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct SelfAttention {
    attention_scorer: Box<dyn AttentionScorer>,
    dropout: Box<dyn ModuleT>,
    layer_norm: Box<dyn ModuleT>,
    n_heads: usize,
    output: Linear,
    query: Linear,
    key: Linear,
    value: Linear,
}

impl SelfAttention {
    /// Apply self-attention to the input.
    ///
    /// * `input` - Input tensor.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `train` - Whether the model is trained.
    ///
    /// Returns: Hidden representations after attention.
    /// *Shape:* `(batch_size, seq_len, width)`
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, SelfAttentionError> {
        let input = self
            .layer_norm
            .forward_t(input, train)
            .context(LayerNormSnafu)?;

        let query = self
            .query
            .forward(&input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let key = self
            .key
            .forward(&input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let value = self
            .value
            .forward(&input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;

        let attn = self
            .attention_scorer
            .forward(&query, &key, &value, train)
            .context(AttentionScorerSnafu)?
            .combine_heads()?;

        self.output
            .forward(&attn)
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(OutputSnafu)
    }
}

trait CombineHeads {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError>;
}

impl CombineHeads for Tensor {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, n_heads, seq_len, head_width) =
            self.dims4().context(CombineHeadsSnafu)?;
        self.transpose(1, 2)
            .and_then(|heads| heads.reshape((batch_size, seq_len, n_heads * head_width)))
            .context(CombineHeadsSnafu)
    }
}

trait SplitHeads {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError>;
}

impl SplitHeads for Tensor {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, seq_len, all_heads_width) = self.dims3().context(SplitHeadsSnafu)?;
        let head_width = all_heads_width / n_heads;
        self.reshape((batch_size, seq_len, n_heads, head_width))
            .and_then(|heads| heads.transpose(1, 2))
            .context(SplitHeadsSnafu)
    }
}
