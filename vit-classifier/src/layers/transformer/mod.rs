mod layer;
pub use layer::{TransformerLayer, TransformerLayerConfig, TransformerLayerError};
