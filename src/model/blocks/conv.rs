use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation;

use crate::error::{NeckError, Result};
use crate::model::shape::FeatureShape;

/// Normalization and activation constants shared by every conv block of a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSettings {
    pub leaky_slope: f64,
    pub bn_epsilon: f64,
    pub bn_momentum: f64,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            leaky_slope: 0.1,
            bn_epsilon: 1e-3,
            bn_momentum: 0.01,
        }
    }
}

/// Conv2d (no bias) -> BatchNorm -> LeakyReLU.
///
/// Padding is `kernel_size / 2`, which keeps the spatial size at stride 1.
/// Channel counts and kernel size are read back from the weights, so they
/// always describe the parameters the block actually holds.
#[derive(Module, Debug)]
pub struct ConvBnLeaky<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    leaky_slope: f64,
    padding: usize,
    stride: usize,
}

impl<B: Backend> ConvBnLeaky<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        settings: &BlockSettings,
    ) -> Self {
        let padding = kernel_size / 2;

        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels)
                .with_epsilon(settings.bn_epsilon)
                .with_momentum(settings.bn_momentum)
                .init(device),
            leaky_slope: settings.leaky_slope,
            padding,
            stride,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        activation::leaky_relu(x, self.leaky_slope)
    }

    /// `[out_channels, in_channels, kernel_h, kernel_w]`
    fn weight_dims(&self) -> [usize; 4] {
        self.conv.weight.dims()
    }

    pub fn in_channels(&self) -> usize {
        self.weight_dims()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight_dims()[0]
    }

    pub fn kernel_size(&self) -> usize {
        self.weight_dims()[2]
    }

    fn norm_features(&self) -> usize {
        self.bn.gamma.dims()[0]
    }

    /// Shape this block produces from `input`, or a channel mismatch naming `layer`.
    pub fn output_shape(&self, layer: &str, input: FeatureShape) -> Result<FeatureShape> {
        let [out_channels, in_channels, kernel_h, kernel_w] = self.weight_dims();

        if input.channels != in_channels {
            return Err(NeckError::ChannelMismatch {
                layer: layer.to_string(),
                expected: in_channels,
                actual: input.channels,
            });
        }
        if self.norm_features() != out_channels {
            return Err(NeckError::ChannelMismatch {
                layer: format!("{layer}.bn"),
                expected: out_channels,
                actual: self.norm_features(),
            });
        }

        let out = |size: usize, kernel: usize| {
            (size + 2 * self.padding).saturating_sub(kernel) / self.stride + 1
        };

        Ok(FeatureShape {
            height: out(input.height, kernel_h),
            width: out(input.width, kernel_w),
            channels: out_channels,
        })
    }

    /// Conv weights, BN scale and BN offset.
    pub fn trainable_params(&self) -> usize {
        self.weight_dims().iter().product::<usize>() + 2 * self.norm_features()
    }

    /// BN running mean and variance.
    pub fn non_trainable_params(&self) -> usize {
        2 * self.norm_features()
    }
}
