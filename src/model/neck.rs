use burn::prelude::*;

use crate::error::Result;
use crate::model::blocks::{
    BlockSettings, ConvBnLeaky, NearestUpsample, SpatialPyramidPooling, SPP_WINDOWS,
};
use crate::model::shape::FeatureShape;
use crate::model::summary::{GraphTrace, ModelSummary, SymbolicTensor};

pub const MODEL_NAME: &str = "YOLOv4_neck";
pub const INPUT_NAMES: [&str; 3] = ["input_1", "input_2", "input_3"];
pub const OUTPUT_NAMES: [&str; 3] = ["output_1", "output_2", "output_3"];

/// Channel depth of output_1, output_2, output_3. Fixed whatever the inputs are.
pub const OUTPUT_CHANNELS: [usize; 3] = [512, 256, 128];

/// Coarsest scale: conv stack, spatial pyramid pooling, conv stack.
#[derive(Module, Debug)]
pub struct SppStage<B: Backend> {
    conv_1: ConvBnLeaky<B>,
    conv_2: ConvBnLeaky<B>,
    conv_3: ConvBnLeaky<B>,
    spp: SpatialPyramidPooling,
    conv_4: ConvBnLeaky<B>,
    conv_5: ConvBnLeaky<B>,
    conv_6: ConvBnLeaky<B>,
}

impl<B: Backend> SppStage<B> {
    pub fn new(device: &B::Device, in_channels: usize, settings: &BlockSettings) -> Self {
        let narrow = OUTPUT_CHANNELS[0];
        let wide = narrow * 2;
        let pooled = narrow * (SPP_WINDOWS.len() + 1);

        Self {
            conv_1: ConvBnLeaky::new(device, in_channels, narrow, 1, 1, settings),
            conv_2: ConvBnLeaky::new(device, narrow, wide, 3, 1, settings),
            conv_3: ConvBnLeaky::new(device, wide, narrow, 1, 1, settings),
            spp: SpatialPyramidPooling::new(),
            conv_4: ConvBnLeaky::new(device, pooled, narrow, 1, 1, settings),
            conv_5: ConvBnLeaky::new(device, narrow, wide, 3, 1, settings),
            conv_6: ConvBnLeaky::new(device, wide, narrow, 1, 1, settings),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_1.forward(x);
        let x = self.conv_2.forward(x);
        let x = self.conv_3.forward(x);
        let x = self.spp.forward(x);
        let x = self.conv_4.forward(x);
        let x = self.conv_5.forward(x);
        self.conv_6.forward(x)
    }

    pub fn trace(&self, trace: &mut GraphTrace, x: &SymbolicTensor) -> Result<SymbolicTensor> {
        let x = trace.conv("spp.conv_1", &self.conv_1, x)?;
        let x = trace.conv("spp.conv_2", &self.conv_2, &x)?;
        let x = trace.conv("spp.conv_3", &self.conv_3, &x)?;

        // largest window first, matching SpatialPyramidPooling::forward
        let pools: Vec<SymbolicTensor> = SPP_WINDOWS
            .iter()
            .rev()
            .map(|window| trace.max_pool(&format!("spp.pool_{window}"), *window, &x))
            .collect();
        let mut branches: Vec<&SymbolicTensor> = pools.iter().collect();
        branches.push(&x);
        let x = trace.concat("spp.concat", &branches)?;

        let x = trace.conv("spp.conv_4", &self.conv_4, &x)?;
        let x = trace.conv("spp.conv_5", &self.conv_5, &x)?;
        trace.conv("spp.conv_6", &self.conv_6, &x)
    }
}

/// One top-down fusion step: a coarser map is projected, upsampled 2x and
/// joined with a projected backbone map, then refined by five conv blocks.
#[derive(Module, Debug)]
pub struct PanStage<B: Backend> {
    reduce: ConvBnLeaky<B>,
    upsample: NearestUpsample,
    lateral: ConvBnLeaky<B>,
    convs: Vec<ConvBnLeaky<B>>,
}

impl<B: Backend> PanStage<B> {
    pub fn new(
        device: &B::Device,
        coarse_channels: usize,
        lateral_channels: usize,
        filters: usize,
        settings: &BlockSettings,
    ) -> Self {
        // (filters, kernel) alternating 1x1 / 3x3
        let plan = [
            (filters, 1),
            (filters * 2, 3),
            (filters, 1),
            (filters * 2, 3),
            (filters, 1),
        ];

        let mut in_channels = filters * 2;
        let mut convs = Vec::with_capacity(plan.len());
        for (out_channels, kernel_size) in plan {
            convs.push(ConvBnLeaky::new(
                device,
                in_channels,
                out_channels,
                kernel_size,
                1,
                settings,
            ));
            in_channels = out_channels;
        }

        Self {
            reduce: ConvBnLeaky::new(device, coarse_channels, filters, 1, 1, settings),
            upsample: NearestUpsample::new(2),
            lateral: ConvBnLeaky::new(device, lateral_channels, filters, 1, 1, settings),
            convs,
        }
    }

    pub fn forward(&self, coarse: Tensor<B, 4>, lateral: Tensor<B, 4>) -> Tensor<B, 4> {
        let upsampled = self.upsample.forward(self.reduce.forward(coarse));
        let lateral = self.lateral.forward(lateral);

        let x = Tensor::cat(vec![lateral, upsampled], 1);
        self.convs.iter().fold(x, |x, conv| conv.forward(x))
    }

    pub fn trace(
        &self,
        prefix: &str,
        trace: &mut GraphTrace,
        coarse: &SymbolicTensor,
        lateral: &SymbolicTensor,
    ) -> Result<SymbolicTensor> {
        let reduced = trace.conv(&format!("{prefix}.reduce"), &self.reduce, coarse)?;
        let upsampled = trace.upsample(&format!("{prefix}.upsample"), &self.upsample, &reduced);
        let lateral = trace.conv(&format!("{prefix}.lateral"), &self.lateral, lateral)?;

        let mut x = trace.concat(&format!("{prefix}.concat"), &[&lateral, &upsampled])?;
        for (i, conv) in self.convs.iter().enumerate() {
            x = trace.conv(&format!("{prefix}.conv_{}", i + 1), conv, &x)?;
        }
        Ok(x)
    }
}

/// YOLOv4 neck: SPP on the coarsest backbone map, then two PAN fusion steps
/// towards the finer maps.
///
/// Inputs and outputs are ordered coarse to fine. The module itself is
/// resolution agnostic; see [`crate::NeckModel`] for the shape-checked
/// artifact with a fixed signature.
#[derive(Module, Debug)]
pub struct Neck<B: Backend> {
    spp: SppStage<B>,
    pan_mid: PanStage<B>,
    pan_fine: PanStage<B>,
}

impl<B: Backend> Neck<B> {
    /// `input_channels` are the backbone depths, coarse to fine.
    pub fn new(device: &B::Device, input_channels: [usize; 3], settings: &BlockSettings) -> Self {
        let [coarse, mid, fine] = input_channels;
        let [out_1, out_2, out_3] = OUTPUT_CHANNELS;

        Self {
            spp: SppStage::new(device, coarse, settings),
            pan_mid: PanStage::new(device, out_1, mid, out_2, settings),
            pan_fine: PanStage::new(device, out_2, fine, out_3, settings),
        }
    }

    /// Returns (output_1, output_2, output_3)
    /// output_1: 512 channels at the input_1 resolution
    /// output_2: 256 channels at the input_2 resolution
    /// output_3: 128 channels at the input_3 resolution
    pub fn forward(
        &self,
        input_1: Tensor<B, 4>, // [B, C1, H, W]
        input_2: Tensor<B, 4>, // [B, C2, 2H, 2W]
        input_3: Tensor<B, 4>, // [B, C3, 4H, 4W]
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        let output_1 = self.spp.forward(input_1);
        log::debug!("output_1: shape={:?}", output_1.dims());

        let output_2 = self.pan_mid.forward(output_1.clone(), input_2);
        log::debug!("output_2: shape={:?}", output_2.dims());

        let output_3 = self.pan_fine.forward(output_2.clone(), input_3);
        log::debug!("output_3: shape={:?}", output_3.dims());

        (output_1, output_2, output_3)
    }

    /// Propagates `input_shapes` through the graph, failing on the first
    /// layer that cannot accept its inputs.
    pub fn trace(&self, input_shapes: [FeatureShape; 3]) -> Result<ModelSummary> {
        let mut trace = GraphTrace::new();
        let [name_1, name_2, name_3] = INPUT_NAMES;
        let [shape_1, shape_2, shape_3] = input_shapes;

        let input_1 = trace.input(name_1, shape_1);
        let input_2 = trace.input(name_2, shape_2);
        let input_3 = trace.input(name_3, shape_3);

        let output_1 = self.spp.trace(&mut trace, &input_1)?;
        let output_2 = self.pan_mid.trace("pan_mid", &mut trace, &output_1, &input_2)?;
        let output_3 = self.pan_fine.trace("pan_fine", &mut trace, &output_2, &input_3)?;

        let [out_1, out_2, out_3] = OUTPUT_NAMES;
        Ok(trace.finish(
            MODEL_NAME,
            &[(name_1, &input_1), (name_2, &input_2), (name_3, &input_3)],
            &[(out_1, &output_1), (out_2, &output_2), (out_3, &output_3)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NeckError;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn shape(h: usize, w: usize, c: usize) -> FeatureShape {
        FeatureShape::new(h, w, c).unwrap()
    }

    fn canonical() -> [FeatureShape; 3] {
        [shape(13, 13, 1024), shape(26, 26, 512), shape(52, 52, 256)]
    }

    #[test]
    fn test_trace_canonical_shapes() {
        let device = Default::default();
        let neck = Neck::<TestBackend>::new(&device, [1024, 512, 256], &BlockSettings::default());

        let summary = neck.trace(canonical()).unwrap();
        assert_eq!(
            summary.signature.output_shapes(),
            vec![shape(13, 13, 512), shape(26, 26, 256), shape(52, 52, 128)]
        );
        assert_eq!(summary.layer("spp.concat").unwrap().output_shape, shape(13, 13, 2048));
        assert_eq!(
            summary.layer("spp.concat").unwrap().inbound,
            vec!["spp.pool_13", "spp.pool_9", "spp.pool_5", "spp.conv_3"]
        );
        assert_eq!(
            summary.layer("pan_mid.concat").unwrap().inbound,
            vec!["pan_mid.lateral", "pan_mid.upsample"]
        );
        assert_eq!(summary.signature.outputs[2].layer, "pan_fine.conv_5");
    }

    #[test]
    fn test_pan_kernels_alternate() {
        let device = Default::default();
        let neck = Neck::<TestBackend>::new(&device, [1024, 512, 256], &BlockSettings::default());

        let kernels: Vec<usize> = neck.pan_fine.convs.iter().map(|c| c.kernel_size()).collect();
        let filters: Vec<usize> = neck.pan_fine.convs.iter().map(|c| c.out_channels()).collect();
        assert_eq!(kernels, vec![1, 3, 1, 3, 1]);
        assert_eq!(filters, vec![128, 256, 128, 256, 128]);
    }

    #[test]
    fn test_trace_rejects_misaligned_resolutions() {
        let device = Default::default();
        let neck = Neck::<TestBackend>::new(&device, [1024, 512, 256], &BlockSettings::default());

        let err = neck
            .trace([shape(13, 13, 1024), shape(24, 24, 512), shape(52, 52, 256)])
            .unwrap_err();
        assert!(matches!(err, NeckError::SpatialMismatch { ref layer, .. } if layer == "pan_mid.concat"));

        let err = neck
            .trace([shape(13, 13, 1024), shape(26, 26, 512), shape(26, 26, 256)])
            .unwrap_err();
        assert!(matches!(err, NeckError::SpatialMismatch { ref layer, .. } if layer == "pan_fine.concat"));
    }

    #[test]
    fn test_trace_rejects_wrong_backbone_depth() {
        let device = Default::default();
        let neck = Neck::<TestBackend>::new(&device, [1024, 512, 256], &BlockSettings::default());

        let err = neck
            .trace([shape(13, 13, 2048), shape(26, 26, 512), shape(52, 52, 256)])
            .unwrap_err();
        assert!(matches!(
            err,
            NeckError::ChannelMismatch { expected: 1024, actual: 2048, .. }
        ));
    }

    #[test]
    fn test_forward_matches_trace() {
        let device = Default::default();
        let shapes = [shape(2, 2, 32), shape(4, 4, 16), shape(8, 8, 8)];
        let neck = Neck::<TestBackend>::new(&device, [32, 16, 8], &BlockSettings::default());

        let [s1, s2, s3] = shapes;
        let input = |s: FeatureShape| Tensor::<TestBackend, 4>::random(s.to_nchw(1), Distribution::Default, &device);
        let (o1, o2, o3) = neck.forward(input(s1), input(s2), input(s3));

        let traced = neck.trace(shapes).unwrap().signature.output_shapes();
        let actual: Vec<FeatureShape> = [o1.dims(), o2.dims(), o3.dims()]
            .into_iter()
            .map(FeatureShape::from_nchw)
            .collect();
        assert_eq!(actual, traced);
        assert_eq!(o3.dims(), [1, 128, 8, 8]);
    }
}
