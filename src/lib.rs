pub mod config;
pub mod error;
pub mod model;

// Re-exports for convenience
pub use config::NeckConfig;
pub use error::{NeckError, Result};
pub use model::{yolov4_neck, FeatureShape, ModelSignature, ModelSummary, Neck, NeckModel};
