use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use crate::model::shape::FeatureShape;

/// Nearest-neighbour upsampling by an integer factor.
#[derive(Module, Debug, Clone)]
pub struct NearestUpsample {
    factor: usize,
}

impl NearestUpsample {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    /// `[B, C, H, W] -> [B, C, H * factor, W * factor]`
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let size = [height * self.factor, width * self.factor];

        interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
    }

    pub fn output_shape(&self, input: FeatureShape) -> FeatureShape {
        input.upsampled(self.factor)
    }
}
