use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::blocks::BlockSettings;
use crate::model::shape::FeatureShape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeckConfig {
    /// Backbone output shapes, coarse to fine.
    pub input_shapes: Vec<FeatureShape>,

    // Conv blocks
    pub leaky_slope: f64,
    pub bn_epsilon: f64,
    pub bn_momentum: f64,
}

impl NeckConfig {
    /// CSPDarknet53 outputs for a 416x416 image.
    pub fn canonical_shapes() -> Vec<FeatureShape> {
        vec![
            FeatureShape { height: 13, width: 13, channels: 1024 },
            FeatureShape { height: 26, width: 26, channels: 512 },
            FeatureShape { height: 52, width: 52, channels: 256 },
        ]
    }

    pub fn with_input_shapes(mut self, input_shapes: Vec<FeatureShape>) -> Self {
        self.input_shapes = input_shapes;
        self
    }

    pub fn block_settings(&self) -> BlockSettings {
        BlockSettings {
            leaky_slope: self.leaky_slope,
            bn_epsilon: self.bn_epsilon,
            bn_momentum: self.bn_momentum,
        }
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NeckConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

impl Default for NeckConfig {
    fn default() -> Self {
        let settings = BlockSettings::default();
        Self {
            input_shapes: Self::canonical_shapes(),
            leaky_slope: settings.leaky_slope,
            bn_epsilon: settings.bn_epsilon,
            bn_momentum: settings.bn_momentum,
        }
    }
}
