use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Dense stack configuration.
#[derive(Debug)]
pub struct DenseStackConfig {
    activation: Box<dyn BuildModule>,
    dropout: Box<dyn BuildModule>,
    input_width: usize,
    layer_norm: Box<dyn BuildModule>,
    units: Vec<usize>,
}

impl DenseStackConfig {
    /// Activation function applied after every dense layer.
    ///
    /// Default: `Activation::Gelu`
    pub fn activation(mut self, activation: Box<dyn BuildModule>) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout applied after every activation.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the stack input.
    ///
    /// Default: `32`
    pub fn input_width(mut self, input_width: usize) -> Self {
        self.input_width = input_width;
        self
    }

    /// Layer norm applied to the input.
    ///
    /// Default: `Identity`
    pub fn layer_norm(mut self, layer_norm: Box<dyn BuildModule>) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    /// Output widths of the dense layers.
    ///
    /// Default: `[64, 32]`
    pub fn units(mut self, units: Vec<usize>) -> Self {
        self.units = units;
        self
    }

    /// Width of the stack output.
    ///
    /// This is the width of the last dense layer, or the input width if
    /// the stack has no layers.
    pub fn output_width(&self) -> usize {
        self.units.last().copied().unwrap_or(self.input_width)
    }

    /// Build the dense stack.
    pub fn build(&self, vb: VarBuilder) -> Result<DenseStack, DenseStackError> {
        let mut in_width = self.input_width;
        let mut layers = Vec::with_capacity(self.units.len());
        for (n, &out_width) in self.units.iter().enumerate() {
            let layer_vb = vb.push_prefix(format!("dense_{n}"));
            layers.push(DenseLayer {
                linear: linear(in_width, out_width, layer_vb.clone())
                    .context(ConstructionSnafu)?,
                activation: self
                    .activation
                    .build(layer_vb.push_prefix("activation"))
                    .context(BuildActivationSnafu)?,
                dropout: self
                    .dropout
                    .build(layer_vb.push_prefix("dropout"))
                    .context(BuildDropoutSnafu)?,
            });
            in_width = out_width;
        }

        Ok(DenseStack {
            layer_norm: self
                .layer_norm
                .build(vb.push_prefix("layer_norm"))
                .context(BuildLayerNormSnafu)?,
            layers,
        })
    }
}

impl Default for DenseStackConfig {
    fn default() -> Self {
        Self {
            activation: Box::new(Activation::Gelu),
            dropout: Box::new(Identity),
            input_width: 32,
            layer_norm: Box::new(Identity),
            units: vec![64, 32],
        }
    }
}

/// Dense stack errors.
#[derive(Debug, Snafu)]
pub enum DenseStackError {
    #[snafu(display("Cannot build activation"))]
    BuildActivation { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot construct dense layer"))]
    Construction { source: candle_core::Error },
}

struct DenseLayer {
    activation: Box<dyn ModuleT>,
    dropout: Box<dyn ModuleT>,
    linear: Linear,
}

impl ModuleT for DenseLayer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
        let xs = self.linear.forward(xs)?;
        let xs = self.activation.forward_t(&xs, train)?;
        self.dropout.forward_t(&xs, train)
    }
}

/// Stack of dense layers.
///
/// Every layer applies the transformation `dropout(g(xW + b))`, where
/// `g` is a non-linear activation function. Since the transformation is
/// applied to the last dimension only, the stack is used both as the
/// point-wise feed-forward block of a transformer layer (_Vaswani et al.,
/// 2017_) and as a classification head.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
pub struct DenseStack {
    layer_norm: Box<dyn ModuleT>,
    layers: Vec<DenseLayer>,
}

impl ModuleT for DenseStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
        let mut xs = self.layer_norm.forward_t(xs, train)?;
        for layer in &self.layers {
            xs = layer.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use ndarray::array;
    use snafu::{report, ResultExt, Whatever};

    use super::DenseStackConfig;
    use crate::layers::activation::Activation;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::assert_tensor_eq;

    #[test]
    #[report]
    fn dense_stack_maps_to_last_unit_width() -> Result<(), Whatever> {
        for device in test_devices() {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let config = DenseStackConfig::default()
                .input_width(8)
                .units(vec![16, 4]);
            let stack = config.build(vb).whatever_context("Cannot build stack")?;

            let input = Tensor::rand(0f32, 1., (2, 3, 8), &device)
                .whatever_context("Cannot create input")?;
            let output = stack
                .forward_t(&input, false)
                .whatever_context("Cannot apply stack")?;

            assert_eq!(config.output_width(), 4);
            assert_eq!(output.dims(), &[2, 3, 4]);
        }

        Ok(())
    }

    #[test]
    #[report]
    fn empty_dense_stack_is_identity() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = DenseStackConfig::default().input_width(2).units(vec![]);
        let stack = config.build(vb).whatever_context("Cannot build stack")?;

        let input =
            Tensor::new(&[[1f32, -2.]], &device).whatever_context("Cannot create input")?;
        let output = stack
            .forward_t(&input, false)
            .whatever_context("Cannot apply stack")?;

        assert_eq!(config.output_width(), 2);
        assert_tensor_eq!(output, array![[1f32, -2.]]);

        Ok(())
    }

    #[test]
    #[report]
    fn dense_stack_applies_activation() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let stack = DenseStackConfig::default()
            .activation(Box::new(Activation::Relu))
            .input_width(4)
            .units(vec![8])
            .build(vb)
            .whatever_context("Cannot build stack")?;

        let input = Tensor::rand(-1f32, 1., (10, 4), &device)
            .whatever_context("Cannot create input")?;
        let min = stack
            .forward_t(&input, false)
            .and_then(|xs| xs.flatten_all())
            .and_then(|xs| xs.min(0))
            .and_then(|xs| xs.to_scalar::<f32>())
            .whatever_context("Cannot apply stack")?;

        assert!(min >= 0.0);

        Ok(())
    }

    #[test]
    #[report]
    fn dense_stack_layers_have_bias() -> Result<(), Whatever> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DenseStackConfig::default()
            .input_width(4)
            .units(vec![8, 2])
            .build(vb)
            .whatever_context("Cannot build stack")?;

        let mut names = varmap
            .data()
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            [
                "dense_0.bias",
                "dense_0.weight",
                "dense_1.bias",
                "dense_1.weight"
            ]
        );

        Ok(())
    }
}
