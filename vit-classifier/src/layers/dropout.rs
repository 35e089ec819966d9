use candle_core::ModuleT;
use candle_nn::{Dropout, VarBuilder};
use snafu::{ensure, Snafu};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Dropout errors.
#[derive(Debug, Snafu)]
pub enum DropoutError {
    #[snafu(display("Dropout probability must be in [0, 1), was {p}"))]
    InvalidProbability { p: f32 },
}

/// Dropout configuration.
#[derive(Clone, Debug, Default)]
pub struct DropoutConfig {
    p: f32,
}

impl DropoutConfig {
    /// Dropout probability.
    ///
    /// Default: `0.0`
    pub fn p(mut self, p: f32) -> Self {
        self.p = p;
        self
    }
}

impl BuildModule for DropoutConfig {
    fn build(&self, _vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        ensure!(
            (0.0..1.0).contains(&self.p),
            InvalidProbabilitySnafu { p: self.p }
        );
        Ok(Box::new(Dropout::new(self.p)))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use ndarray::array;
    use rstest::rstest;

    use super::DropoutConfig;
    use crate::layers::build_module::BuildModule;
    use crate::util::tests::assert_tensor_eq;

    #[rstest]
    #[case(-0.1)]
    #[case(1.0)]
    fn dropout_rejects_invalid_probability(#[case] p: f32) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(DropoutConfig::default().p(p).build(vb).is_err());
    }

    #[test]
    fn dropout_is_identity_during_inference() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let dropout = DropoutConfig::default().p(0.5).build(vb).unwrap();

        let input = Tensor::ones((2, 4), DType::F32, &device).unwrap();
        let output = dropout.forward_t(&input, false).unwrap();

        assert_tensor_eq!(output, array![[1f32, 1., 1., 1.], [1., 1., 1., 1.]]);
    }
}
