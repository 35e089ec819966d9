use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ensure, ResultExt, Snafu};

use crate::layers::activation::Activation;

/// ViT configuration errors.
#[derive(Debug, Snafu)]
pub enum ViTConfigError {
    #[snafu(display("Cannot deserialize configuration"))]
    Deserialize { source: serde_json::Error },

    #[snafu(display("Dropout probability `{name}` must be in [0, 1), was {p}"))]
    InvalidDropout { name: &'static str, p: f32 },

    #[snafu(display("Input shape must be [height, width, channels] with non-zero sizes, was {input_shape:?}"))]
    InvalidInputShape { input_shape: [usize; 3] },

    #[snafu(display("Layer norm epsilon must be positive, was {eps}"))]
    InvalidLayerNormEps { eps: f64 },

    #[snafu(display("`{name}` must be larger than zero"))]
    NotPositive { name: &'static str },

    #[snafu(display("Configuration overrides must be a JSON object"))]
    OverridesNotAnObject,

    #[snafu(display(
        "Patch size {patch_size} does not fit in image of size {height}x{width}"
    ))]
    PatchTooLarge {
        height: usize,
        patch_size: usize,
        width: usize,
    },

    #[snafu(display("Cannot serialize configuration"))]
    Serialize { source: serde_json::Error },

    #[snafu(display(
        "Last transformer unit ({last_unit:?}) must be equal to the embedding dimension ({embedding_dim})"
    ))]
    TransformerUnits {
        embedding_dim: usize,
        last_unit: Option<usize>,
    },
}

fn default_activation() -> Activation {
    Activation::Gelu
}

fn default_attention_dropout() -> f32 {
    0.1
}

fn default_embedding_dim() -> usize {
    32
}

fn default_head_dropout() -> f32 {
    0.5
}

fn default_layer_norm_eps() -> f64 {
    1e-6
}

fn default_mlp_dropout() -> f32 {
    0.1
}

fn default_mlp_units() -> Vec<usize> {
    vec![2048, 1024]
}

fn default_n_heads() -> usize {
    2
}

fn default_n_transformers() -> usize {
    1
}

fn default_patch_size() -> usize {
    6
}

fn default_transformer_dropout() -> f32 {
    0.1
}

fn default_transformer_units() -> Vec<usize> {
    vec![64, 32]
}

/// Vision Transformer classifier configuration.
///
/// This is the serializable configuration that is stored as `config.json`
/// alongside a checkpoint. All hyperparameters except the input shape and
/// the number of classes have defaults.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ViTConfig {
    /// Activation of the transformer and classifier head MLPs.
    #[serde(default = "default_activation")]
    pub activation: Activation,

    /// Dropout probability of the attention probabilities.
    #[serde(default = "default_attention_dropout")]
    pub attention_dropout: f32,

    /// Width of the patch embeddings and of the transformer hidden
    /// representations.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Dropout probability of the flattened features before the head MLP.
    #[serde(default = "default_head_dropout")]
    pub head_dropout: f32,

    /// Shape of a single image: `[height, width, channels]`.
    pub input_shape: [usize; 3],

    /// Epsilon of all layer norms.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Dropout probability after every classifier head dense layer.
    #[serde(default = "default_mlp_dropout")]
    pub mlp_dropout: f32,

    /// Widths of the classifier head dense layers.
    #[serde(default = "default_mlp_units")]
    pub mlp_units: Vec<usize>,

    /// Number of output classes.
    pub n_classes: usize,

    /// Number of attention heads.
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,

    /// Number of transformer layers.
    #[serde(default = "default_n_transformers")]
    pub n_transformers: usize,

    /// Width and height of the square image patches.
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,

    /// Dropout probability after every transformer dense layer.
    #[serde(default = "default_transformer_dropout")]
    pub transformer_dropout: f32,

    /// Widths of the transformer dense layers. The last width must be
    /// equal to the embedding dimension.
    #[serde(default = "default_transformer_units")]
    pub transformer_units: Vec<usize>,
}

impl ViTConfig {
    /// Create a configuration with default hyperparameters.
    ///
    /// * `input_shape` - Image shape `[height, width, channels]`.
    /// * `n_classes` - Number of output classes.
    pub fn new(input_shape: [usize; 3], n_classes: usize) -> Self {
        Self {
            activation: default_activation(),
            attention_dropout: default_attention_dropout(),
            embedding_dim: default_embedding_dim(),
            head_dropout: default_head_dropout(),
            input_shape,
            layer_norm_eps: default_layer_norm_eps(),
            mlp_dropout: default_mlp_dropout(),
            mlp_units: default_mlp_units(),
            n_classes,
            n_heads: default_n_heads(),
            n_transformers: default_n_transformers(),
            patch_size: default_patch_size(),
            transformer_dropout: default_transformer_dropout(),
            transformer_units: default_transformer_units(),
        }
    }

    /// Create a configuration with some hyperparameters overridden.
    ///
    /// `overrides` is a partial configuration as a JSON object. Its keys
    /// replace the defaults, unknown keys are rejected. The input shape
    /// and number of classes are always taken from the arguments, even
    /// when present in `overrides`.
    pub fn with_overrides(
        input_shape: [usize; 3],
        n_classes: usize,
        overrides: &Value,
    ) -> Result<Self, ViTConfigError> {
        let overrides = overrides
            .as_object()
            .ok_or(ViTConfigError::OverridesNotAnObject)?;

        let mut merged = serde_json::to_value(Self::new(input_shape, n_classes))
            .context(SerializeSnafu)?;
        if let Value::Object(merged) = &mut merged {
            merge_overrides(merged, overrides);
        }

        serde_json::from_value(merged).context(DeserializeSnafu)
    }

    /// Number of patches per image.
    ///
    /// Trailing rows and columns that do not fill a whole patch are not
    /// counted.
    pub fn n_patches(&self) -> usize {
        let [height, width, _] = self.input_shape;
        (height / self.patch_size) * (width / self.patch_size)
    }

    /// Number of trailing pixel rows and columns that do not fill a whole
    /// patch and are discarded.
    pub fn discarded_pixels(&self) -> (usize, usize) {
        let [height, width, _] = self.input_shape;
        (
            height.checked_rem(self.patch_size).unwrap_or(0),
            width.checked_rem(self.patch_size).unwrap_or(0),
        )
    }

    /// Check that the hyperparameters describe a valid model.
    pub fn validate(&self) -> Result<(), ViTConfigError> {
        let [height, width, channels] = self.input_shape;
        ensure!(
            height > 0 && width > 0 && channels > 0,
            InvalidInputShapeSnafu {
                input_shape: self.input_shape
            }
        );
        ensure!(self.n_classes > 0, NotPositiveSnafu { name: "n_classes" });
        ensure!(self.patch_size > 0, NotPositiveSnafu { name: "patch_size" });
        ensure!(
            self.patch_size <= height && self.patch_size <= width,
            PatchTooLargeSnafu {
                height,
                patch_size: self.patch_size,
                width
            }
        );
        ensure!(
            self.embedding_dim > 0,
            NotPositiveSnafu {
                name: "embedding_dim"
            }
        );
        ensure!(self.n_heads > 0, NotPositiveSnafu { name: "n_heads" });
        ensure!(
            self.transformer_units.last() == Some(&self.embedding_dim),
            TransformerUnitsSnafu {
                embedding_dim: self.embedding_dim,
                last_unit: self.transformer_units.last().copied(),
            }
        );
        ensure!(
            self.transformer_units
                .iter()
                .chain(&self.mlp_units)
                .all(|&units| units > 0),
            NotPositiveSnafu { name: "units" }
        );
        ensure!(
            self.layer_norm_eps > 0.0,
            InvalidLayerNormEpsSnafu {
                eps: self.layer_norm_eps
            }
        );

        for (name, p) in [
            ("attention_dropout", self.attention_dropout),
            ("head_dropout", self.head_dropout),
            ("mlp_dropout", self.mlp_dropout),
            ("transformer_dropout", self.transformer_dropout),
        ] {
            ensure!((0.0..1.0).contains(&p), InvalidDropoutSnafu { name, p });
        }

        Ok(())
    }
}

fn merge_overrides(config: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        if key == "input_shape" || key == "n_classes" {
            log::debug!("Ignoring `{}` in configuration overrides", key);
            continue;
        }
        config.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use snafu::{report, ResultExt, Whatever};

    use super::{ViTConfig, ViTConfigError};
    use crate::layers::activation::Activation;

    #[test]
    fn new_config_uses_defaults() {
        let config = ViTConfig::new([72, 72, 3], 4);
        assert_eq!(config.patch_size, 6);
        assert_eq!(config.embedding_dim, 32);
        assert_eq!(config.n_heads, 2);
        assert_eq!(config.n_transformers, 1);
        assert_eq!(config.transformer_units, vec![64, 32]);
        assert_eq!(config.transformer_dropout, 0.1);
        assert_eq!(config.mlp_units, vec![2048, 1024]);
        assert_eq!(config.mlp_dropout, 0.1);
        assert_eq!(config.head_dropout, 0.5);
        assert_eq!(config.activation, Activation::Gelu);
        assert_eq!(config.n_patches(), 144);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[report]
    fn overrides_replace_defaults() -> Result<(), Whatever> {
        let config = ViTConfig::with_overrides(
            [32, 32, 1],
            2,
            &json!({"patch_size": 4, "n_transformers": 3, "mlp_units": [16]}),
        )
        .whatever_context("Cannot apply overrides")?;

        assert_eq!(config.patch_size, 4);
        assert_eq!(config.n_transformers, 3);
        assert_eq!(config.mlp_units, vec![16]);
        assert_eq!(config.embedding_dim, 32);
        assert_eq!(config.n_patches(), 64);

        Ok(())
    }

    #[test]
    #[report]
    fn overrides_do_not_replace_input_shape_or_classes() -> Result<(), Whatever> {
        let config = ViTConfig::with_overrides(
            [32, 32, 1],
            2,
            &json!({"input_shape": [8, 8, 3], "n_classes": 10}),
        )
        .whatever_context("Cannot apply overrides")?;

        assert_eq!(config.input_shape, [32, 32, 1]);
        assert_eq!(config.n_classes, 2);

        Ok(())
    }

    #[test]
    fn overrides_reject_unknown_keys() {
        assert!(matches!(
            ViTConfig::with_overrides([32, 32, 1], 2, &json!({"n_layers": 3})),
            Err(ViTConfigError::Deserialize { .. })
        ));
    }

    #[test]
    fn overrides_must_be_an_object() {
        assert!(matches!(
            ViTConfig::with_overrides([32, 32, 1], 2, &json!([1, 2])),
            Err(ViTConfigError::OverridesNotAnObject)
        ));
    }

    #[test]
    #[report]
    fn config_deserializes_with_defaults() -> Result<(), Whatever> {
        let config: ViTConfig = serde_json::from_value(json!({
            "input_shape": [28, 28, 1],
            "n_classes": 3,
            "activation": "gelu_approximate",
        }))
        .whatever_context("Cannot deserialize config")?;

        assert_eq!(config.activation, Activation::GeluApproximate);
        assert_eq!(config.patch_size, 6);
        assert_eq!(config.n_patches(), 16);

        Ok(())
    }

    #[test]
    fn discarded_pixels_are_patch_size_remainders() {
        assert_eq!(ViTConfig::new([72, 72, 3], 4).discarded_pixels(), (0, 0));
        // 28 = 4 * 6 + 4
        assert_eq!(ViTConfig::new([28, 30, 1], 4).discarded_pixels(), (4, 0));

        let mut config = ViTConfig::new([28, 28, 1], 4);
        config.patch_size = 0;
        assert_eq!(config.discarded_pixels(), (0, 0));
    }

    #[test]
    fn validate_rejects_mismatched_transformer_units() {
        let mut config = ViTConfig::new([72, 72, 3], 4);
        config.transformer_units = vec![64, 16];
        assert!(matches!(
            config.validate(),
            Err(ViTConfigError::TransformerUnits {
                embedding_dim: 32,
                last_unit: Some(16)
            })
        ));
    }

    #[test]
    fn validate_rejects_oversized_patches() {
        let mut config = ViTConfig::new([4, 8, 3], 2);
        config.patch_size = 6;
        assert!(matches!(
            config.validate(),
            Err(ViTConfigError::PatchTooLarge { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_dropout() {
        let mut config = ViTConfig::new([72, 72, 3], 4);
        config.head_dropout = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ViTConfigError::InvalidDropout {
                name: "head_dropout",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_zero_classes() {
        assert!(matches!(
            ViTConfig::new([72, 72, 3], 0).validate(),
            Err(ViTConfigError::NotPositive { name: "n_classes" })
        ));
    }
}
