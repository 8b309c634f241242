use thiserror::Error;

use crate::model::shape::FeatureShape;

pub type Result<T> = std::result::Result<T, NeckError>;

#[derive(Debug, Error)]
pub enum NeckError {
    #[error("expected exactly 3 input shapes, got {0}")]
    InputCount(usize),

    #[error("shape must reduce to (height, width, channels) after dropping placeholders, got {0} dims")]
    Rank(usize),

    #[error("invalid shape descriptor `{0}`, expected HxWxC")]
    ParseShape(String),

    #[error("layer `{0}` has nothing to concatenate")]
    EmptyConcat(String),

    #[error("layer `{layer}` expects {expected} input channels, got {actual}")]
    ChannelMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("layer `{layer}` cannot concatenate {left} with {right}: spatial sizes differ")]
    SpatialMismatch {
        layer: String,
        left: FeatureShape,
        right: FeatureShape,
    },

    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("weight record: {0}")]
    Record(String),
}
