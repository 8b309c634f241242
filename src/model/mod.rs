pub mod blocks;
pub mod builder;
pub mod neck;
pub mod shape;
pub mod summary;

pub use builder::{yolov4_neck, NeckModel};
pub use neck::{Neck, PanStage, SppStage};
pub use shape::FeatureShape;
pub use summary::{ModelSignature, ModelSummary};
