pub mod conv;
pub mod spp;
pub mod upsample;

pub use conv::{BlockSettings, ConvBnLeaky};
pub use spp::{SpatialPyramidPooling, SPP_WINDOWS};
pub use upsample::NearestUpsample;
