use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder, VarMap};
use snafu::{ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, BuildEncoder, ClassifierOutput, Encoder, ImageClassifier,
};
use crate::error::BoxedError;
use crate::layers::attention::{SDPAConfig, SelfAttentionConfig};
use crate::layers::build_module::BuildModule;
use crate::layers::dropout::DropoutConfig;
use crate::layers::embeddings::PatchEncoderConfig;
use crate::layers::feedforward::{DenseStack, DenseStackConfig, DenseStackError};
use crate::layers::layer_norm::LayerNormConfig;
use crate::layers::patches::PatchesConfig;
use crate::layers::transformer::TransformerLayerConfig;
use crate::models::transformer::{TransformerEncoder, TransformerEncoderConfig};
use crate::models::vit::{ViTConfig, ViTConfigError};

/// ViT classifier configuration.
#[derive(Debug)]
pub struct ViTClassifierConfig {
    encoder: TransformerEncoderConfig,
    head: DenseStackConfig,
    head_dropout: Box<dyn BuildModule>,
    n_classes: usize,
}

impl ViTClassifierConfig {
    /// Image encoder.
    ///
    /// The output layer norm of the encoder normalizes the patch
    /// representations before they are flattened.
    ///
    /// Default: `TransformerEncoderConfig::default()`
    pub fn encoder(mut self, encoder: TransformerEncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    /// Classifier head applied to the flattened patch representations.
    ///
    /// The input width must be the number of patches times the hidden
    /// width of the encoder.
    ///
    /// Default: `DenseStackConfig::default().input_width(4608).units(vec![2048, 1024])`
    pub fn head(mut self, head: DenseStackConfig) -> Self {
        self.head = head;
        self
    }

    /// Dropout applied to the flattened patch representations.
    ///
    /// Default: `DropoutConfig::default().p(0.5)`
    pub fn head_dropout(mut self, head_dropout: Box<dyn BuildModule>) -> Self {
        self.head_dropout = head_dropout;
        self
    }

    /// Number of output classes.
    ///
    /// Default: `2`
    pub fn n_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = n_classes;
        self
    }
}

impl Default for ViTClassifierConfig {
    fn default() -> Self {
        Self {
            encoder: TransformerEncoderConfig::default(),
            head: DenseStackConfig::default()
                .input_width(144 * 32)
                .units(vec![2048, 1024]),
            head_dropout: Box::new(DropoutConfig::default().p(0.5)),
            n_classes: 2,
        }
    }
}

impl TryFrom<ViTConfig> for ViTClassifierConfig {
    type Error = BoxedError;

    fn try_from(config: ViTConfig) -> Result<Self, Self::Error> {
        config.validate().context(InvalidConfigSnafu)?;

        let (discarded_rows, discarded_cols) = config.discarded_pixels();
        if discarded_rows > 0 || discarded_cols > 0 {
            log::warn!(
                "Image size {}x{} is not divisible by patch size {}, {} bottom rows and {} right columns are discarded",
                config.input_shape[0],
                config.input_shape[1],
                config.patch_size,
                discarded_rows,
                discarded_cols
            );
        }

        let [_, _, channels] = config.input_shape;
        let hidden_width = config.embedding_dim;
        let n_patches = config.n_patches();

        let layer_norm = LayerNormConfig::default()
            .eps(config.layer_norm_eps)
            .size(hidden_width);

        let embeddings = PatchEncoderConfig::default()
            .embedding_width(hidden_width)
            .n_channels(channels)
            .n_patches(n_patches)
            .patches(PatchesConfig::default().patch_size(config.patch_size));

        let attention = SelfAttentionConfig::default()
            .attention_scorer(Box::new(SDPAConfig::default().dropout(Box::new(
                DropoutConfig::default().p(config.attention_dropout),
            ))))
            .head_width(hidden_width)
            .hidden_width(hidden_width)
            .layer_norm(Box::new(layer_norm.clone()))
            .n_heads(config.n_heads);

        let feedforward = DenseStackConfig::default()
            .activation(Box::new(config.activation))
            .dropout(Box::new(
                DropoutConfig::default().p(config.transformer_dropout),
            ))
            .input_width(hidden_width)
            .layer_norm(Box::new(layer_norm.clone()))
            .units(config.transformer_units);

        let encoder = TransformerEncoderConfig::default()
            .embeddings(Box::new(embeddings))
            .layer(Box::new(
                TransformerLayerConfig::default()
                    .attention(attention)
                    .feedforward(feedforward),
            ))
            .n_hidden_layers(config.n_transformers)
            .output_layer_norm(Box::new(layer_norm));

        let head = DenseStackConfig::default()
            .activation(Box::new(config.activation))
            .dropout(Box::new(DropoutConfig::default().p(config.mlp_dropout)))
            .input_width(n_patches * hidden_width)
            .units(config.mlp_units);

        Ok(Self::default()
            .encoder(encoder)
            .head(head)
            .head_dropout(Box::new(DropoutConfig::default().p(config.head_dropout)))
            .n_classes(config.n_classes))
    }
}

impl BuildArchitecture for ViTClassifierConfig {
    type Architecture = ViTClassifier;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        Ok(ViTClassifier {
            encoder: BuildEncoder::build(&self.encoder, vb.push_prefix("encoder"))
                .context(BuildEncoderSnafu)?,
            head: self
                .head
                .build(vb.push_prefix("head"))
                .context(BuildHeadSnafu)?,
            head_dropout: self
                .head_dropout
                .build(vb.push_prefix("head_dropout"))
                .context(BuildHeadDropoutSnafu)?,
            logits: linear(
                self.head.output_width(),
                self.n_classes,
                vb.push_prefix("logits"),
            )
            .context(BuildLogitsSnafu)?,
        })
    }
}

/// ViT classifier errors.
#[derive(Debug, Snafu)]
pub enum ViTClassifierError {
    #[snafu(display("Cannot build ViT classifier"))]
    BuildClassifier { source: BoxedError },

    #[snafu(display("Cannot build encoder"))]
    BuildEncoder { source: BoxedError },

    #[snafu(display("Cannot build classifier head"))]
    BuildHead { source: DenseStackError },

    #[snafu(display("Cannot build classifier head dropout"))]
    BuildHeadDropout { source: BoxedError },

    #[snafu(display("Cannot build logits layer"))]
    BuildLogits { source: candle_core::Error },

    #[snafu(display("Cannot convert configuration"))]
    ConvertConfig { source: BoxedError },

    #[snafu(display("Cannot encode images"))]
    Encode { source: BoxedError },

    #[snafu(display("Cannot flatten patch representations"))]
    Flatten { source: candle_core::Error },

    #[snafu(display("Cannot apply classifier head"))]
    Head { source: candle_core::Error },

    #[snafu(display("Invalid ViT configuration"))]
    InvalidConfig { source: ViTConfigError },

    #[snafu(display("Cannot compute logits"))]
    Logits { source: candle_core::Error },

    #[snafu(display("Encoder did not return any outputs"))]
    MissingEncoderOutput,
}

/// Vision Transformer image classifier (Dosovitskiy et al., 2020).
///
/// Images are split into patches which are encoded by a transformer
/// encoder. The normalized patch representations are flattened and
/// classified by a dense classifier head.
///
/// See [An Image is Worth 16x16 Words: Transformers for Image Recognition at Scale](https://arxiv.org/abs/2010.11929).
pub struct ViTClassifier {
    encoder: TransformerEncoder,
    head: DenseStack,
    head_dropout: Box<dyn ModuleT>,
    logits: Linear,
}

impl ViTClassifier {
    /// Construct a randomly initialized classifier.
    ///
    /// Returns the classifier together with the variables that hold its
    /// parameters, so that they can be trained or saved.
    ///
    /// * `config` - Classifier configuration.
    /// * `device` - Device to place the parameters on.
    pub fn init(
        config: ViTConfig,
        device: &Device,
    ) -> Result<(ViTClassifier, VarMap), ViTClassifierError> {
        log::info!(
            "Initializing ViT classifier with {} patches, {} transformer layers, {} classes",
            config.n_patches(),
            config.n_transformers,
            config.n_classes
        );

        let classifier_config =
            ViTClassifierConfig::try_from(config).context(ConvertConfigSnafu)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let classifier = BuildArchitecture::build(&classifier_config, vb)
            .context(BuildClassifierSnafu)?;

        Ok((classifier, varmap))
    }

    /// Classify a batch of images.
    ///
    /// * `images` - Input images.
    ///   *Shape:* `(batch_size, height, width, channels)`
    /// * `train` - Whether to train the classifier.
    pub fn forward(
        &self,
        images: &Tensor,
        train: bool,
    ) -> Result<ClassifierOutput, ViTClassifierError> {
        let encoder_output = self
            .encoder
            .forward_t(images, train)
            .context(EncodeSnafu)?;

        let features = encoder_output
            .last_layer_output()
            .ok_or(ViTClassifierError::MissingEncoderOutput)?
            .flatten_from(1)
            .context(FlattenSnafu)?;

        let features = self
            .head_dropout
            .forward_t(&features, train)
            .and_then(|features| self.head.forward_t(&features, train))
            .context(HeadSnafu)?;

        let logits = self.logits.forward(&features).context(LogitsSnafu)?;

        Ok(ClassifierOutput::new(encoder_output, logits))
    }
}

impl ImageClassifier for ViTClassifier {
    fn forward_t(&self, images: &Tensor, train: bool) -> Result<ClassifierOutput, BoxedError> {
        Ok(self.forward(images, train)?)
    }
}
