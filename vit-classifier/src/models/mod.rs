mod checkpoint;
pub use checkpoint::{CheckpointError, LoadCheckpoint};

mod from_repo;
pub use from_repo::{FromRepo, FromRepoError};

pub mod transformer;

pub mod vit;
pub use vit::{ViTClassifier, ViTClassifierConfig, ViTConfig};
