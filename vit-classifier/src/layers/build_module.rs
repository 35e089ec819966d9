use std::fmt::Debug;

use candle_core::ModuleT;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Trait for configurations that can build a module.
///
/// Normalization, dropout and activation layers are configured through
/// this trait, so that a model configuration can swap them out (e.g. for
/// [`Identity`](crate::layers::identity::Identity)) without knowing the
/// concrete layer type.
pub trait BuildModule: Debug {
    /// Build a module.
    ///
    /// * `vb` - Variable builder for the module's parameters.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError>;
}
