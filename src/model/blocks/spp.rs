use burn::prelude::*;
use burn::tensor::module::max_pool2d;

use crate::model::shape::FeatureShape;

/// Window sizes of the parallel max pools, smallest first.
pub const SPP_WINDOWS: [usize; 3] = [5, 9, 13];

/// Window and padding of a stride-1 "same" max pool along an axis of `size`.
///
/// A window wider than `2 * size - 1` already covers the whole axis from every
/// position, so it is clamped to that. The result is unchanged and the padding
/// never exceeds the map.
fn clamped_window(window: usize, size: usize) -> (usize, usize) {
    let window = window.min(2 * size - 1);
    (window, window / 2)
}

fn same_max_pool<B: Backend>(x: Tensor<B, 4>, window: usize) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (window_h, pad_h) = clamped_window(window, height);
    let (window_w, pad_w) = clamped_window(window, width);

    max_pool2d(
        x,
        [window_h, window_w],
        [1, 1],
        [pad_h, pad_w],
        [1, 1],
        false,
    )
}

/// Spatial pyramid pooling: three stride-1 max pools over the same map,
/// concatenated with it along channels.
///
/// Output channel order is `[pool_13, pool_9, pool_5, input]`. Pretrained
/// weights of the following 1x1 conv depend on this order.
#[derive(Module, Debug, Clone)]
pub struct SpatialPyramidPooling {
    small: usize,
    medium: usize,
    large: usize,
}

impl SpatialPyramidPooling {
    pub fn new() -> Self {
        let [small, medium, large] = SPP_WINDOWS;
        Self {
            small,
            medium,
            large,
        }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let p5 = same_max_pool(x.clone(), self.small);
        let p9 = same_max_pool(x.clone(), self.medium);
        let p13 = same_max_pool(x.clone(), self.large);

        Tensor::cat(vec![p13, p9, p5, x], 1)
    }

    pub fn output_shape(&self, input: FeatureShape) -> FeatureShape {
        input.with_channels(input.channels * (SPP_WINDOWS.len() + 1))
    }
}

impl Default for SpatialPyramidPooling {
    fn default() -> Self {
        Self::new()
    }
}
