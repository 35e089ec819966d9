//! Vision Transformer classifier.
mod classifier;
pub use classifier::{ViTClassifier, ViTClassifierConfig, ViTClassifierError};

mod config;
pub use config::{ViTConfig, ViTConfigError};
