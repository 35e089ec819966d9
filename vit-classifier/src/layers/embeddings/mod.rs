//! Embedding layers.
mod patch_encoder;
pub use patch_encoder::{PatchEncoder, PatchEncoderConfig, PatchEncoderError};
