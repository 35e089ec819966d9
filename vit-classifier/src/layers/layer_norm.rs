use candle_core::ModuleT;
use candle_nn::{layer_norm, LayerNormConfig as CandleLayerNormConfig, VarBuilder};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Layer norm configuration.
#[derive(Clone, Debug)]
pub struct LayerNormConfig {
    pub affine: bool,
    pub eps: f64,
    pub size: usize,
}

impl LayerNormConfig {
    /// Whether to use an affine transformation.
    ///
    /// Default: `true`
    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    /// Epsilon value.
    ///
    /// Default: `1e-6`
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Dimensionality of the layer.
    ///
    /// Default: `32`
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            affine: true,
            eps: 1e-6,
            size: 32,
        }
    }
}

impl BuildModule for LayerNormConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        Ok(Box::new(layer_norm(
            self.size,
            CandleLayerNormConfig {
                affine: self.affine,
                eps: self.eps,
                remove_mean: true,
            },
            vb,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use ndarray::array;
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::LayerNormConfig;
    use crate::layers::build_module::BuildModule;
    use crate::util::tests::assert_tensor_eq;

    #[test]
    #[report]
    fn layer_norm_normalizes_last_dimension() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer_norm = LayerNormConfig::default()
            .size(4)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build layer norm".to_string()))?;

        let input = Tensor::new(&[[1f32, 2., 3., 4.], [2., 2., 2., 2.]], &device)
            .whatever_context("Cannot create input")?;
        let output = layer_norm
            .forward_t(&input, false)
            .whatever_context("Cannot apply layer norm")?;

        assert_tensor_eq!(
            output,
            array![
                [-1.3416f32, -0.4472, 0.4472, 1.3416],
                [0.0, 0.0, 0.0, 0.0]
            ],
            epsilon = 1e-4
        );

        Ok(())
    }
}
