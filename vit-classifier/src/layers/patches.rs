//! Image patch extraction.
use candle_core::Tensor;
use snafu::{ensure, ResultExt, Snafu};

/// Patch extraction errors.
#[derive(Debug, Snafu)]
pub enum PatchesError {
    #[snafu(display("Images must have shape (batch_size, height, width, channels)"))]
    ImageShape { source: candle_core::Error },

    #[snafu(display("Image of size {height}x{width} is smaller than patch size {patch_size}"))]
    ImageTooSmall {
        height: usize,
        patch_size: usize,
        width: usize,
    },

    #[snafu(display("Cannot split images into patches"))]
    SplitPatches { source: candle_core::Error },

    #[snafu(display("Patch size must be larger than zero"))]
    ZeroPatchSize,
}

/// Patch extraction configuration.
#[derive(Clone, Debug)]
pub struct PatchesConfig {
    patch_size: usize,
}

impl PatchesConfig {
    /// Width and height of a patch in pixels.
    ///
    /// Default: `6`
    pub fn patch_size(mut self, patch_size: usize) -> Self {
        self.patch_size = patch_size;
        self
    }

    /// Build the patch extractor.
    pub fn build(&self) -> Result<Patches, PatchesError> {
        ensure!(self.patch_size > 0, ZeroPatchSizeSnafu);
        Ok(Patches {
            patch_size: self.patch_size,
        })
    }
}

impl Default for PatchesConfig {
    fn default() -> Self {
        Self { patch_size: 6 }
    }
}

/// Splits images into a sequence of flattened, non-overlapping patches.
///
/// Patches are extracted with a stride equal to the patch size. Pixels
/// at the bottom and right edges that do not fill a complete patch are
/// discarded.
#[derive(Clone, Debug)]
pub struct Patches {
    patch_size: usize,
}

impl Patches {
    /// Patch size in pixels.
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Number of patches extracted from an image of the given size.
    pub fn n_patches(&self, height: usize, width: usize) -> usize {
        (height / self.patch_size) * (width / self.patch_size)
    }

    /// Width of a flattened patch.
    pub fn patch_width(&self, channels: usize) -> usize {
        self.patch_size * self.patch_size * channels
    }

    /// Extract patches.
    ///
    /// * `images` - Batch of images.
    ///   *Shape:* `(batch_size, height, width, channels)`
    ///
    /// Returns: flattened patches in row-major patch grid order. Within a
    /// patch, pixels are ordered by row, column, and channel.
    /// *Shape:* `(batch_size, n_patches, patch_size * patch_size * channels)`
    pub fn forward(&self, images: &Tensor) -> Result<Tensor, PatchesError> {
        let (batch_size, height, width, channels) = images.dims4().context(ImageShapeSnafu)?;
        let patch_size = self.patch_size;

        ensure!(
            height >= patch_size && width >= patch_size,
            ImageTooSmallSnafu {
                height,
                patch_size,
                width
            }
        );

        let n_rows = height / patch_size;
        let n_cols = width / patch_size;
        if n_rows * patch_size != height || n_cols * patch_size != width {
            log::debug!(
                "Image size {}x{} is not divisible by patch size {}, edge pixels are discarded",
                height,
                width,
                patch_size
            );
        }

        // (batch, rows * p, cols * p, c) -> (batch * rows, p, cols, p * c)
        // separates the patch grid rows from the pixel rows within a patch,
        // then swapping the middle axes groups the pixels of each patch.
        images
            .narrow(1, 0, n_rows * patch_size)
            .and_then(|xs| xs.narrow(2, 0, n_cols * patch_size))
            .and_then(|xs| xs.contiguous())
            .and_then(|xs| {
                xs.reshape((
                    batch_size * n_rows,
                    patch_size,
                    n_cols,
                    patch_size * channels,
                ))
            })
            .and_then(|xs| xs.transpose(1, 2))
            .and_then(|xs| xs.contiguous())
            .and_then(|xs| {
                xs.reshape((
                    batch_size,
                    n_rows * n_cols,
                    patch_size * patch_size * channels,
                ))
            })
            .context(SplitPatchesSnafu)
    }
}
