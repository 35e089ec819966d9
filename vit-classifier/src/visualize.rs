//! Image grids for inspecting a batch of labeled images.
use candle_core::{DType, Device, Tensor};
use rand::seq::SliceRandom;
use rand_core::SeedableRng;
use rand_pcg::Pcg32;
use snafu::{ensure, ResultExt, Snafu};

use crate::architectures::ImageClassifier;
use crate::error::BoxedError;

/// Image grid errors.
#[derive(Debug, Snafu)]
pub enum ImageGridError {
    #[snafu(display("Cannot compose grid canvas"))]
    Canvas { source: candle_core::Error },

    #[snafu(display("Grid must have at least one row and one column, got {rows}x{cols}"))]
    EmptyGrid { cols: usize, rows: usize },

    #[snafu(display("Images must have shape (batch_size, height, width, channels)"))]
    ImageShape { source: candle_core::Error },

    #[snafu(display("Padding must be a non-negative fraction of the image size, was {padding}"))]
    InvalidPadding { padding: f32 },

    #[snafu(display("Got {n_labels} labels for {n_images} images"))]
    LabelCount { n_images: usize, n_labels: usize },

    #[snafu(display("Cannot convert labels to class identifiers"))]
    Labels { source: candle_core::Error },

    #[snafu(display("Cannot predict image classes"))]
    Predict { source: BoxedError },

    #[snafu(display("Cannot select sampled images"))]
    Select { source: candle_core::Error },

    #[snafu(display("Class {label} has no name, there are {n_classes} class names"))]
    UnknownClass { label: u32, n_classes: usize },
}

/// Image grid configuration.
#[derive(Clone, Debug)]
pub struct ImageGridConfig {
    cols: usize,
    padding: f32,
    rows: usize,
}

impl ImageGridConfig {
    /// Number of grid columns.
    ///
    /// Default: `3`
    pub fn cols(mut self, cols: usize) -> Self {
        self.cols = cols;
        self
    }

    /// Space between grid cells as a fraction of the image height (between
    /// rows) and width (between columns).
    ///
    /// Default: `0.1`
    pub fn padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    /// Number of grid rows.
    ///
    /// Default: `3`
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Sample a grid from a batch of labeled images.
    ///
    /// The batch is shuffled and the first `rows * cols` images are placed
    /// in the grid in row-major order. When a classifier is given, the
    /// class of every sampled image is predicted and shown alongside its
    /// gold class.
    ///
    /// * `images` - Images with pixel values in `[0, 255]`.
    ///   *Shape:* `(batch_size, height, width, channels)`
    /// * `labels` - Gold class identifiers.
    ///   *Shape:* `(batch_size,)`
    /// * `class_names` - Name of each class identifier.
    /// * `classifier` - Classifier to predict the image classes with.
    /// * `seed` - Seed of the shuffle.
    pub fn sample(
        &self,
        images: &Tensor,
        labels: &Tensor,
        class_names: &[impl AsRef<str>],
        classifier: Option<&dyn ImageClassifier>,
        seed: u64,
    ) -> Result<ImageGrid, ImageGridError> {
        ensure!(
            self.rows > 0 && self.cols > 0,
            EmptyGridSnafu {
                cols: self.cols,
                rows: self.rows
            }
        );
        ensure!(
            self.padding >= 0.0 && self.padding.is_finite(),
            InvalidPaddingSnafu {
                padding: self.padding
            }
        );

        let (n_images, height, width, channels) = images.dims4().context(ImageShapeSnafu)?;
        let labels = labels
            .flatten_all()
            .and_then(|labels| labels.to_dtype(DType::U32))
            .and_then(|labels| labels.to_vec1::<u32>())
            .context(LabelsSnafu)?;
        ensure!(
            labels.len() == n_images,
            LabelCountSnafu {
                n_images,
                n_labels: labels.len()
            }
        );

        let order = sample_order(n_images, self.rows * self.cols, seed);

        log::debug!(
            "Sampled {} of {} images for a {}x{} grid",
            order.len(),
            n_images,
            self.rows,
            self.cols
        );

        let sampled = if order.is_empty() {
            Tensor::zeros((0, height, width, channels), DType::F32, images.device())
        } else {
            Tensor::from_iter(order.iter().map(|&idx| idx as u32), images.device())
                .and_then(|indices| images.index_select(&indices, 0))
                .and_then(|sampled| sampled.to_dtype(DType::F32))
        }
        .context(SelectSnafu)?;

        let predictions = match classifier {
            Some(classifier) if !order.is_empty() => Some(
                classifier
                    .predict(&sampled)
                    .context(PredictSnafu)?
                    .to_vec1::<u32>()
                    .context(LabelsSnafu)?,
            ),
            _ => None,
        };

        let class_name = |label: u32| {
            class_names
                .get(label as usize)
                .map(|name| name.as_ref().to_owned())
                .ok_or(ImageGridError::UnknownClass {
                    label,
                    n_classes: class_names.len(),
                })
        };

        let cells = order
            .iter()
            .enumerate()
            .map(|(cell_idx, &source_index)| {
                let true_label = class_name(labels[source_index])?;
                let predicted_label = predictions
                    .as_ref()
                    .map(|predictions| class_name(predictions[cell_idx]))
                    .transpose()?;
                Ok(GridCell::new(source_index, true_label, predicted_label))
            })
            .collect::<Result<Vec<_>, ImageGridError>>()?;

        let layout = Layout {
            channels,
            cols: self.cols,
            height,
            pad_height: (self.padding * height as f32).round() as usize,
            pad_width: (self.padding * width as f32).round() as usize,
            rows: self.rows,
            width,
        };
        let canvas = sampled
            .affine(1. / 255., 0.)
            .and_then(|scaled| layout.compose(&scaled))
            .context(CanvasSnafu)?;

        Ok(ImageGrid {
            canvas,
            cells,
            cols: self.cols,
            rows: self.rows,
        })
    }
}

impl Default for ImageGridConfig {
    fn default() -> Self {
        Self {
            cols: 3,
            padding: 0.1,
            rows: 3,
        }
    }
}

/// A single image in a grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridCell {
    predicted_label: Option<String>,
    source_index: usize,
    title: String,
    true_label: String,
}

impl GridCell {
    fn new(source_index: usize, true_label: String, predicted_label: Option<String>) -> Self {
        let title = match &predicted_label {
            Some(predicted_label) => format!("{true_label} (true) - {predicted_label} (pred)"),
            None => true_label.clone(),
        };

        GridCell {
            predicted_label,
            source_index,
            title,
            true_label,
        }
    }

    /// Whether the predicted class is the gold class.
    ///
    /// Returns `None` when the grid was sampled without a classifier.
    pub fn is_correct(&self) -> Option<bool> {
        self.predicted_label
            .as_ref()
            .map(|predicted_label| predicted_label == &self.true_label)
    }

    /// Name of the predicted class.
    pub fn predicted_label(&self) -> Option<&str> {
        self.predicted_label.as_deref()
    }

    /// Index of the image in the batch that the grid was sampled from.
    pub fn source_index(&self) -> usize {
        self.source_index
    }

    /// Cell title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Name of the gold class.
    pub fn true_label(&self) -> &str {
        &self.true_label
    }
}

/// Grid of sampled images.
pub struct ImageGrid {
    canvas: Tensor,
    cells: Vec<GridCell>,
    cols: usize,
    rows: usize,
}

impl ImageGrid {
    /// All images tiled into a single image with pixel values in `[0, 1]`.
    ///
    /// Padding and unused cells are white.
    ///
    /// *Shape:* `(rows * height + (rows - 1) * pad_height,
    /// cols * width + (cols - 1) * pad_width, channels)`
    pub fn canvas(&self) -> &Tensor {
        &self.canvas
    }

    /// Grid cells in row-major order.
    ///
    /// There are fewer cells than `rows * cols` when the batch is smaller
    /// than the grid.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Number of grid columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of grid rows.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

struct Layout {
    channels: usize,
    cols: usize,
    height: usize,
    pad_height: usize,
    pad_width: usize,
    rows: usize,
    width: usize,
}

impl Layout {
    fn compose(&self, images: &Tensor) -> Result<Tensor, candle_core::Error> {
        let device = images.device();
        let n_images = images.dim(0)?;
        let canvas_width = self.cols * self.width + (self.cols - 1) * self.pad_width;

        let mut rows = Vec::with_capacity(2 * self.rows - 1);
        for row in 0..self.rows {
            if row > 0 && self.pad_height > 0 {
                rows.push(self.blank(self.pad_height, canvas_width, device)?);
            }

            let mut cells = Vec::with_capacity(2 * self.cols - 1);
            for col in 0..self.cols {
                if col > 0 && self.pad_width > 0 {
                    cells.push(self.blank(self.height, self.pad_width, device)?);
                }

                let idx = row * self.cols + col;
                cells.push(if idx < n_images {
                    images.get(idx)?
                } else {
                    self.blank(self.height, self.width, device)?
                });
            }
            rows.push(Tensor::cat(&cells, 1)?);
        }

        Tensor::cat(&rows, 0)
    }

    fn blank(
        &self,
        height: usize,
        width: usize,
        device: &Device,
    ) -> Result<Tensor, candle_core::Error> {
        Tensor::ones((height, width, self.channels), DType::F32, device)
    }
}

/// Indices of at most `n_samples` images, in seeded random order.
fn sample_order(n_images: usize, n_samples: usize, seed: u64) -> Vec<usize> {
    let mut rng = Pcg32::seed_from_u64(seed);
    let mut order = (0..n_images).collect::<Vec<_>>();
    order.shuffle(&mut rng);
    order.truncate(n_samples);
    order
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use candle_core::{DType, Device, Tensor};
    use snafu::{report, ResultExt, Whatever};

    use super::{sample_order, ImageGridConfig, ImageGridError};
    use crate::architectures::{ClassifierOutput, EncoderOutput, ImageClassifier};
    use crate::error::BoxedError;

    const CLASS_NAMES: [&str; 2] = ["normal", "pneumonia"];

    /// Classifier that always predicts the same class.
    struct ConstantClassifier {
        class: usize,
        n_classes: usize,
    }

    impl ImageClassifier for ConstantClassifier {
        fn forward_t(&self, images: &Tensor, _train: bool) -> Result<ClassifierOutput, BoxedError> {
            let batch_size = images.dim(0)?;
            let mut logits = vec![0f32; batch_size * self.n_classes];
            for sample in 0..batch_size {
                logits[sample * self.n_classes + self.class] = 1.0;
            }
            let logits = Tensor::from_vec(logits, (batch_size, self.n_classes), images.device())?;
            Ok(ClassifierOutput::new(EncoderOutput::new(vec![]), logits))
        }
    }

    /// Classifier that predicts class 1 for images with a mean pixel
    /// value above 1 and class 0 otherwise.
    struct BrightnessClassifier;

    impl ImageClassifier for BrightnessClassifier {
        fn forward_t(&self, images: &Tensor, _train: bool) -> Result<ClassifierOutput, BoxedError> {
            let mean = images.flatten_from(1)?.mean_keepdim(1)?;
            let bright = mean.gt(&mean.ones_like()?)?.to_dtype(DType::F32)?;
            let logits = Tensor::cat(&[bright.affine(-1., 1.)?, bright], 1)?;
            Ok(ClassifierOutput::new(EncoderOutput::new(vec![]), logits))
        }
    }

    fn batch(n_images: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let images = Tensor::ones((n_images, 2, 2, 1), DType::F32, &device)
            .and_then(|images| images.affine(255., 0.))
            .unwrap();
        let labels = Tensor::from_iter((0..n_images as u32).map(|idx| idx % 2), &device).unwrap();
        (images, labels)
    }

    #[test]
    #[report]
    fn grid_titles_show_gold_class() -> Result<(), Whatever> {
        let (images, labels) = batch(4);
        let grid = ImageGridConfig::default()
            .rows(2)
            .cols(2)
            .sample(&images, &labels, &CLASS_NAMES, None, 42)
            .whatever_context("Cannot sample grid")?;

        assert_eq!(grid.cells().len(), 4);
        for cell in grid.cells() {
            let expected = CLASS_NAMES[cell.source_index() % 2];
            assert_eq!(cell.title(), expected);
            assert_eq!(cell.true_label(), expected);
            assert_eq!(cell.predicted_label(), None);
            assert_eq!(cell.is_correct(), None);
        }

        Ok(())
    }

    #[test]
    #[report]
    fn grid_titles_show_predictions() -> Result<(), Whatever> {
        let (images, labels) = batch(6);
        let classifier = ConstantClassifier {
            class: 1,
            n_classes: 2,
        };
        let grid = ImageGridConfig::default()
            .sample(&images, &labels, &CLASS_NAMES, Some(&classifier), 7)
            .whatever_context("Cannot sample grid")?;

        assert_eq!(grid.cells().len(), 6);
        for cell in grid.cells() {
            let expected = CLASS_NAMES[cell.source_index() % 2];
            assert_eq!(
                cell.title(),
                format!("{expected} (true) - pneumonia (pred)")
            );
            assert_eq!(cell.is_correct(), Some(expected == "pneumonia"));
        }

        Ok(())
    }

    #[test]
    #[report]
    fn grid_predicts_on_unscaled_pixels() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let images = Tensor::ones((1, 2, 2, 1), DType::F32, &device)
            .and_then(|images| images.affine(200., 0.))
            .whatever_context("Cannot create images")?;
        let labels = Tensor::new(&[1u32], &device).whatever_context("Cannot create labels")?;

        let grid = ImageGridConfig::default()
            .rows(1)
            .cols(1)
            .sample(&images, &labels, &["dark", "bright"], Some(&BrightnessClassifier), 0)
            .whatever_context("Cannot sample grid")?;

        assert_eq!(grid.cells()[0].title(), "bright (true) - bright (pred)");
        assert_eq!(grid.cells()[0].is_correct(), Some(true));

        let max = grid
            .canvas()
            .flatten_all()
            .and_then(|canvas| canvas.max(0))
            .and_then(|max| max.to_scalar::<f32>())
            .whatever_context("Cannot get canvas maximum")?;
        assert_relative_eq!(max, 200. / 255., epsilon = 1e-6);

        Ok(())
    }

    #[test]
    #[report]
    fn grid_sampling_is_seeded() -> Result<(), Whatever> {
        let (images, labels) = batch(20);
        let config = ImageGridConfig::default();
        let order = |seed| -> Result<Vec<usize>, Whatever> {
            Ok(config
                .sample(&images, &labels, &CLASS_NAMES, None, seed)
                .whatever_context("Cannot sample grid")?
                .cells()
                .iter()
                .map(|cell| cell.source_index())
                .collect())
        };

        let first = order(1)?;
        assert_eq!(first.len(), 9);
        assert_eq!(first, order(1)?);

        let mut unique = first.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 9);
        assert!(unique.iter().all(|&idx| idx < 20));

        Ok(())
    }

    #[test]
    fn sample_order_is_a_permutation() {
        let mut order = sample_order(50, 50, 3);
        assert_ne!(order, (0..50).collect::<Vec<_>>());
        assert_eq!(order, sample_order(50, 50, 3));
        order.sort_unstable();
        assert_eq!(order, (0..50).collect::<Vec<_>>());

        assert_eq!(sample_order(50, 9, 3), sample_order(50, 50, 3)[..9]);
        assert_eq!(sample_order(4, 9, 3).len(), 4);
    }

    #[test]
    #[report]
    fn canvas_tiles_scaled_images_with_padding() -> Result<(), Whatever> {
        let (images, labels) = batch(3);
        let grid = ImageGridConfig::default()
            .rows(2)
            .cols(2)
            .padding(0.5)
            .sample(&images, &labels, &CLASS_NAMES, None, 0)
            .whatever_context("Cannot sample grid")?;

        // Two 2x2 images per row and column, one pixel of padding.
        assert_eq!(grid.canvas().dims(), &[5, 5, 1]);
        let max = grid
            .canvas()
            .flatten_all()
            .and_then(|canvas| canvas.max(0))
            .and_then(|max| max.to_scalar::<f32>())
            .whatever_context("Cannot get canvas maximum")?;
        assert_eq!(max, 1.0);

        Ok(())
    }

    #[test]
    #[report]
    fn canvas_scales_pixel_values() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let images = Tensor::zeros((1, 3, 3, 3), DType::F32, &device)
            .whatever_context("Cannot create images")?;
        let labels = Tensor::new(&[0u32], &device).whatever_context("Cannot create labels")?;
        let grid = ImageGridConfig::default()
            .rows(1)
            .cols(1)
            .padding(0.)
            .sample(&images, &labels, &CLASS_NAMES, None, 0)
            .whatever_context("Cannot sample grid")?;

        assert_eq!(grid.canvas().dims(), &[3, 3, 3]);
        let sum = grid
            .canvas()
            .sum_all()
            .and_then(|sum| sum.to_scalar::<f32>())
            .whatever_context("Cannot sum canvas")?;
        assert_eq!(sum, 0.0);

        Ok(())
    }

    #[test]
    fn grid_rejects_unknown_classes() {
        let (images, labels) = batch(4);
        assert!(matches!(
            ImageGridConfig::default().sample(&images, &labels, &["normal"], None, 0),
            Err(ImageGridError::UnknownClass {
                label: 1,
                n_classes: 1
            })
        ));
    }

    #[test]
    fn grid_rejects_mismatched_labels() {
        let (images, _) = batch(4);
        let (_, labels) = batch(3);
        assert!(matches!(
            ImageGridConfig::default().sample(&images, &labels, &CLASS_NAMES, None, 0),
            Err(ImageGridError::LabelCount {
                n_images: 4,
                n_labels: 3
            })
        ));
    }

    #[test]
    fn grid_rejects_empty_layout() {
        let (images, labels) = batch(4);
        assert!(matches!(
            ImageGridConfig::default()
                .rows(0)
                .sample(&images, &labels, &CLASS_NAMES, None, 0),
            Err(ImageGridError::EmptyGrid { .. })
        ));
    }
}
