use std::path::PathBuf;

use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};

use crate::config::NeckConfig;
use crate::error::{NeckError, Result};
use crate::model::neck::Neck;
use crate::model::shape::FeatureShape;
use crate::model::summary::{ModelSignature, ModelSummary};

/// A neck built for a fixed set of input shapes.
///
/// Holds the `burn` module together with the signature and layer summary
/// computed when it was built. Every build creates fresh parameters.
#[derive(Debug)]
pub struct NeckModel<B: Backend> {
    neck: Neck<B>,
    summary: ModelSummary,
}

/// Builds the YOLOv4 neck for three backbone shapes with default block settings.
///
/// For CSPDarknet53 and a 416x416 image the shapes are
/// `[(13, 13, 1024), (26, 26, 512), (52, 52, 256)]`.
pub fn yolov4_neck<B: Backend>(
    device: &B::Device,
    input_shapes: &[FeatureShape],
) -> Result<NeckModel<B>> {
    let config = NeckConfig::default().with_input_shapes(input_shapes.to_vec());
    NeckModel::build(device, &config)
}

impl<B: Backend> NeckModel<B> {
    pub fn build(device: &B::Device, config: &NeckConfig) -> Result<Self> {
        let input_shapes: [FeatureShape; 3] = config
            .input_shapes
            .as_slice()
            .try_into()
            .map_err(|_| NeckError::InputCount(config.input_shapes.len()))?;

        let channels = input_shapes.map(|shape| shape.channels);
        let neck = Neck::new(device, channels, &config.block_settings());
        let summary = neck.trace(input_shapes)?;

        log::info!("{} init:", summary.signature.name);
        for slot in summary.signature.inputs.iter().chain(&summary.signature.outputs) {
            log::info!("  {} = {}", slot.name, slot.shape);
        }
        log::info!(
            "  params = {} ({} trainable)",
            summary.total_params(),
            summary.trainable_params()
        );

        Ok(Self { neck, summary })
    }

    pub fn forward(
        &self,
        input_1: Tensor<B, 4>,
        input_2: Tensor<B, 4>,
        input_3: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        self.neck.forward(input_1, input_2, input_3)
    }

    pub fn signature(&self) -> &ModelSignature {
        &self.summary.signature
    }

    pub fn summary(&self) -> &ModelSummary {
        &self.summary
    }

    pub fn neck(&self) -> &Neck<B> {
        &self.neck
    }

    pub fn into_neck(self) -> Neck<B> {
        self.neck
    }

    /// Writes the parameters to `path` (the recorder appends `.bin`).
    pub fn save_weights(&self, path: impl Into<PathBuf>) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.neck
            .clone()
            .save_file(path, &recorder)
            .map_err(|err| NeckError::Record(err.to_string()))
    }

    /// Replaces the parameters with a record written by [`Self::save_weights`].
    ///
    /// Fails if the record was saved from a neck with different input depths.
    pub fn load_weights(self, path: impl Into<PathBuf>, device: &B::Device) -> Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let neck = self
            .neck
            .load_file(path, &recorder, device)
            .map_err(|err| NeckError::Record(err.to_string()))?;

        // the record may hold weights for other backbone depths
        let input_shapes: [FeatureShape; 3] = self
            .summary
            .signature
            .input_shapes()
            .try_into()
            .map_err(|shapes: Vec<FeatureShape>| NeckError::InputCount(shapes.len()))?;
        let loaded = neck
            .trace(input_shapes)
            .map_err(|err| NeckError::Record(format!("record does not fit the neck: {err}")))?;
        if loaded != self.summary {
            return Err(NeckError::Record(
                "record layer shapes differ from the neck's".to_string(),
            ));
        }

        Ok(Self {
            neck,
            summary: self.summary,
        })
    }
}
