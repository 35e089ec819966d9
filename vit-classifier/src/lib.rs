//! Vision Transformer image classification.
//!
//! Models are constructed from builder-style configurations on top of
//! [candle](https://github.com/huggingface/candle) tensors. Besides the
//! classifier itself, this crate provides a class-balanced accuracy metric
//! for evaluation on imbalanced data and an image grid helper to inspect
//! predictions.
pub mod architectures;
pub mod error;
pub mod layers;
pub mod metrics;
pub mod models;
pub mod repository;
pub(crate) mod util;
pub mod visualize;
