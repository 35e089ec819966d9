use candle_core::{Module, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::architectures::{BuildEmbeddings, Embeddings};
use crate::error::BoxedError;
use crate::layers::patches::{Patches, PatchesConfig, PatchesError};

/// Patch encoder configuration.
#[derive(Clone, Debug)]
pub struct PatchEncoderConfig {
    embedding_width: usize,
    n_channels: usize,
    n_patches: usize,
    patches: PatchesConfig,
}

impl PatchEncoderConfig {
    /// Width of the patch embeddings.
    ///
    /// Default: `32`
    pub fn embedding_width(mut self, embedding_width: usize) -> Self {
        self.embedding_width = embedding_width;
        self
    }

    /// Number of image channels.
    ///
    /// Default: `3`
    pub fn n_channels(mut self, n_channels: usize) -> Self {
        self.n_channels = n_channels;
        self
    }

    /// Number of patches per image, this is also the number of
    /// position embeddings.
    ///
    /// Default: `144`
    pub fn n_patches(mut self, n_patches: usize) -> Self {
        self.n_patches = n_patches;
        self
    }

    /// Patch extraction.
    ///
    /// Default: `PatchesConfig::default()`
    pub fn patches(mut self, patches: PatchesConfig) -> Self {
        self.patches = patches;
        self
    }
}

impl Default for PatchEncoderConfig {
    fn default() -> Self {
        Self {
            embedding_width: 32,
            n_channels: 3,
            n_patches: 144,
            patches: PatchesConfig::default(),
        }
    }
}

impl BuildEmbeddings for PatchEncoderConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError> {
        let patches = self.patches.build().context(BuildPatchesSnafu)?;
        let patch_width = patches.patch_width(self.n_channels);

        let projection = linear(
            patch_width,
            self.embedding_width,
            vb.push_prefix("projection"),
        )
        .context(ConstructionSnafu)?;

        let position_embeddings = embedding(
            self.n_patches,
            self.embedding_width,
            vb.push_prefix("position_embeddings"),
        )
        .context(ConstructionSnafu)?;

        Ok(Box::new(PatchEncoder {
            n_patches: self.n_patches,
            patches,
            position_embeddings,
            projection,
        }))
    }
}

/// Patch encoder errors.
#[derive(Debug, Snafu)]
pub enum PatchEncoderError {
    #[snafu(display("Cannot build patch extractor"))]
    BuildPatches { source: PatchesError },

    #[snafu(display("Cannot construct patch encoder"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot extract patches"))]
    ExtractPatches { source: PatchesError },

    #[snafu(display("Expected {expected} patches, got {got}"))]
    PatchCount { expected: usize, got: usize },

    #[snafu(display("Cannot lookup position embeddings"))]
    PositionEmbeddings { source: candle_core::Error },

    #[snafu(display("Cannot project patches to embedding width"))]
    Projection { source: candle_core::Error },
}

/// Patch encoder.
///
/// Splits images into patches, projects each flattened patch to the
/// embedding width and adds a learned embedding for the patch position.
///
/// See [Dosovitskiy et al., 2020](https://arxiv.org/abs/2010.11929).
pub struct PatchEncoder {
    n_patches: usize,
    patches: Patches,
    position_embeddings: Embedding,
    projection: Linear,
}

impl PatchEncoder {
    /// Get position identifiers _[0..n_patches)_.
    fn positions(&self, device: &candle_core::Device) -> Result<Tensor, PatchEncoderError> {
        Tensor::arange(0u32, self.n_patches as u32, device).context(PositionEmbeddingsSnafu)
    }
}

impl Embeddings for PatchEncoder {
    fn forward(&self, images: &Tensor, _train: bool) -> Result<Tensor, BoxedError> {
        let patches = self
            .patches
            .forward(images)
            .context(ExtractPatchesSnafu)?;

        let (_, n_patches, _) = patches.dims3().context(ProjectionSnafu)?;
        ensure!(
            n_patches == self.n_patches,
            PatchCountSnafu {
                expected: self.n_patches,
                got: n_patches
            }
        );

        let projected = self
            .projection
            .forward(&patches)
            .context(ProjectionSnafu)?;

        let positions = self.positions(images.device())?;
        Ok(self
            .position_embeddings
            .forward(&positions)
            .and_then(|position_embeddings| projected.broadcast_add(&position_embeddings))
            .context(PositionEmbeddingsSnafu)?)
    }
}
