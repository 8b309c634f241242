//! Construction-time shape inference and the structural summary it produces.
//!
//! `burn` modules only know channel counts, so spatial compatibility of the
//! graph is checked here by walking the layers in `forward` order with
//! symbolic tensors.

use std::fmt;

use burn::prelude::*;
use serde::Serialize;

use crate::error::{NeckError, Result};
use crate::model::blocks::{ConvBnLeaky, NearestUpsample};
use crate::model::shape::FeatureShape;

/// A graph node seen during tracing: which layer produced it and its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicTensor {
    pub layer: String,
    pub shape: FeatureShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    pub output_shape: FeatureShape,
    pub inbound: Vec<String>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl LayerSummary {
    pub fn params(&self) -> usize {
        self.trainable_params + self.non_trainable_params
    }
}

/// A named input or output of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorSlot {
    pub name: String,
    pub layer: String,
    pub shape: FeatureShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSignature {
    pub name: String,
    pub inputs: Vec<TensorSlot>,
    pub outputs: Vec<TensorSlot>,
}

impl ModelSignature {
    pub fn input_shapes(&self) -> Vec<FeatureShape> {
        self.inputs.iter().map(|slot| slot.shape).collect()
    }

    pub fn output_shapes(&self) -> Vec<FeatureShape> {
        self.outputs.iter().map(|slot| slot.shape).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub signature: ModelSignature,
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn layer(&self, name: &str) -> Option<&LayerSummary> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.trainable_params).sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.non_trainable_params).sum()
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params() + self.non_trainable_params()
    }
}

const RULE_WIDTH: usize = 100;

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: \"{}\"", self.signature.name)?;
        writeln!(f, "{}", "_".repeat(RULE_WIDTH))?;
        writeln!(
            f,
            "{:<36}{:<20}{:>12}   {}",
            "Layer (type)", "Output Shape", "Param #", "Connected to"
        )?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;

        for layer in &self.layers {
            writeln!(
                f,
                "{:<36}{:<20}{:>12}   {}",
                format!("{} ({})", layer.name, layer.kind),
                layer.output_shape.to_string(),
                layer.params(),
                layer.inbound.join(", ")
            )?;
        }

        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Trainable params: {}", self.trainable_params())?;
        writeln!(f, "Non-trainable params: {}", self.non_trainable_params())?;
        for slot in &self.signature.outputs {
            writeln!(f, "{} <- {}: {}", slot.name, slot.layer, slot.shape)?;
        }
        write!(f, "{}", "_".repeat(RULE_WIDTH))
    }
}

/// Records layers in evaluation order while propagating shapes.
#[derive(Debug, Default)]
pub struct GraphTrace {
    layers: Vec<LayerSummary>,
}

impl GraphTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        name: &str,
        kind: &str,
        output_shape: FeatureShape,
        inbound: &[&SymbolicTensor],
        params: (usize, usize),
    ) -> SymbolicTensor {
        log::trace!("{name} ({kind}) -> {output_shape}");
        self.layers.push(LayerSummary {
            name: name.to_string(),
            kind: kind.to_string(),
            output_shape,
            inbound: inbound.iter().map(|t| t.layer.clone()).collect(),
            trainable_params: params.0,
            non_trainable_params: params.1,
        });

        SymbolicTensor {
            layer: name.to_string(),
            shape: output_shape,
        }
    }

    pub fn input(&mut self, name: &str, shape: FeatureShape) -> SymbolicTensor {
        self.push(name, "Input", shape, &[], (0, 0))
    }

    pub fn conv<B: Backend>(
        &mut self,
        name: &str,
        block: &ConvBnLeaky<B>,
        x: &SymbolicTensor,
    ) -> Result<SymbolicTensor> {
        let shape = block.output_shape(name, x.shape)?;
        let params = (block.trainable_params(), block.non_trainable_params());
        Ok(self.push(name, "ConvBnLeaky", shape, &[x], params))
    }

    /// Stride-1 max pool with same padding, so the shape is unchanged.
    pub fn max_pool(&mut self, name: &str, window: usize, x: &SymbolicTensor) -> SymbolicTensor {
        let kind = format!("MaxPool{window}x{window}");
        self.push(name, &kind, x.shape, &[x], (0, 0))
    }

    pub fn upsample(
        &mut self,
        name: &str,
        upsample: &NearestUpsample,
        x: &SymbolicTensor,
    ) -> SymbolicTensor {
        self.push(name, "Upsample", upsample.output_shape(x.shape), &[x], (0, 0))
    }

    /// Channel-axis concatenation. Every input must share the same spatial size.
    pub fn concat(&mut self, name: &str, xs: &[&SymbolicTensor]) -> Result<SymbolicTensor> {
        let Some((first, rest)) = xs.split_first() else {
            return Err(NeckError::EmptyConcat(name.to_string()));
        };

        let mut channels = first.shape.channels;
        for x in rest {
            if x.shape.spatial() != first.shape.spatial() {
                return Err(NeckError::SpatialMismatch {
                    layer: name.to_string(),
                    left: first.shape,
                    right: x.shape,
                });
            }
            channels += x.shape.channels;
        }

        Ok(self.push(
            name,
            "Concatenate",
            first.shape.with_channels(channels),
            xs,
            (0, 0),
        ))
    }

    pub fn finish(
        self,
        name: &str,
        inputs: &[(&str, &SymbolicTensor)],
        outputs: &[(&str, &SymbolicTensor)],
    ) -> ModelSummary {
        let slots = |tensors: &[(&str, &SymbolicTensor)]| {
            tensors
                .iter()
                .map(|(slot, tensor)| TensorSlot {
                    name: slot.to_string(),
                    layer: tensor.layer.clone(),
                    shape: tensor.shape,
                })
                .collect()
        };

        ModelSummary {
            signature: ModelSignature {
                name: name.to_string(),
                inputs: slots(inputs),
                outputs: slots(outputs),
            },
            layers: self.layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::blocks::BlockSettings;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn shape(h: usize, w: usize, c: usize) -> FeatureShape {
        FeatureShape::new(h, w, c).unwrap()
    }

    #[test]
    fn test_concat_sums_channels() {
        let mut trace = GraphTrace::new();
        let a = trace.input("a", shape(26, 26, 256));
        let b = trace.input("b", shape(26, 26, 256));

        let cat = trace.concat("cat", &[&a, &b]).unwrap();
        assert_eq!(cat.shape, shape(26, 26, 512));
        assert_eq!(cat.layer, "cat");
    }

    #[test]
    fn test_concat_rejects_spatial_mismatch() {
        let mut trace = GraphTrace::new();
        let a = trace.input("a", shape(26, 26, 256));
        let b = trace.input("b", shape(24, 24, 256));

        let err = trace.concat("cat", &[&a, &b]).unwrap_err();
        assert!(matches!(err, NeckError::SpatialMismatch { ref layer, .. } if layer == "cat"));
    }

    #[test]
    fn test_concat_of_nothing() {
        let mut trace = GraphTrace::new();

        let err = trace.concat("spp.concat", &[]).unwrap_err();
        assert!(matches!(err, NeckError::EmptyConcat(ref layer) if layer == "spp.concat"));
        assert_eq!(err.to_string(), "layer `spp.concat` has nothing to concatenate");
    }

    #[test]
    fn test_summary_rows_and_totals() {
        let device = Default::default();
        let block = ConvBnLeaky::<TestBackend>::new(&device, 16, 8, 3, 1, &BlockSettings::default());

        let mut trace = GraphTrace::new();
        let x = trace.input("input_1", shape(4, 4, 16));
        let y = trace.conv("conv", &block, &x).unwrap();
        let up = trace.upsample("up", &NearestUpsample::new(2), &y);
        let summary = trace.finish("tiny", &[("input_1", &x)], &[("output_1", &up)]);

        assert_eq!(summary.layers.len(), 3);
        assert_eq!(summary.layer("up").unwrap().inbound, vec!["conv".to_string()]);
        assert_eq!(summary.trainable_params(), 3 * 3 * 16 * 8 + 2 * 8);
        assert_eq!(summary.non_trainable_params(), 2 * 8);
        assert_eq!(summary.signature.output_shapes(), vec![shape(8, 8, 8)]);

        let rendered = summary.to_string();
        assert!(rendered.starts_with("Model: \"tiny\""));
        assert!(rendered.contains("conv (ConvBnLeaky)"));
        assert!(rendered.contains(&format!("Total params: {}", summary.total_params())));
    }
}
