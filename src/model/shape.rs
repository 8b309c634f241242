use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NeckError, Result};

/// Spatial size and channel depth of one feature map, `(height, width, channels)`.
///
/// Tensors themselves are laid out `[batch, channels, height, width]`; this type
/// only describes the per-sample part, the way the backbone reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<usize>>", into = "[usize; 3]")]
pub struct FeatureShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl FeatureShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Result<Self> {
        Self::from_dims([Some(height), Some(width), Some(channels)])
    }

    /// Builds a shape from a raw dimension list, dropping placeholders first.
    ///
    /// `None` and `0` are placeholders (an unknown batch axis, for instance), so
    /// `[None, 13, 13, 1024]` and `[13, 13, 1024]` describe the same map.
    pub fn from_dims<I>(dims: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        let dims: Vec<usize> = dims.into_iter().flatten().filter(|d| *d > 0).collect();
        match dims[..] {
            [height, width, channels] => Ok(Self {
                height,
                width,
                channels,
            }),
            _ => Err(NeckError::Rank(dims.len())),
        }
    }

    pub fn spatial(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn with_channels(&self, channels: usize) -> Self {
        Self { channels, ..*self }
    }

    pub fn upsampled(&self, factor: usize) -> Self {
        Self {
            height: self.height * factor,
            width: self.width * factor,
            channels: self.channels,
        }
    }

    /// Tensor dims for a batch of maps with this shape.
    pub fn to_nchw(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }

    pub fn from_nchw(dims: [usize; 4]) -> Self {
        let [_, channels, height, width] = dims;
        Self {
            height,
            width,
            channels,
        }
    }
}

impl TryFrom<Vec<Option<usize>>> for FeatureShape {
    type Error = NeckError;

    fn try_from(dims: Vec<Option<usize>>) -> Result<Self> {
        Self::from_dims(dims)
    }
}

impl TryFrom<(usize, usize, usize)> for FeatureShape {
    type Error = NeckError;

    fn try_from((height, width, channels): (usize, usize, usize)) -> Result<Self> {
        Self::new(height, width, channels)
    }
}

impl From<FeatureShape> for [usize; 3] {
    fn from(shape: FeatureShape) -> Self {
        [shape.height, shape.width, shape.channels]
    }
}

/// Parses `HxWxC`. `?` or `_` mark a placeholder dim, e.g. `?x13x13x1024`.
impl FromStr for FeatureShape {
    type Err = NeckError;

    fn from_str(s: &str) -> Result<Self> {
        let dims = s
            .trim()
            .split(['x', 'X'])
            .map(|part| match part.trim() {
                "?" | "_" => Ok(None),
                n => n
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| NeckError::ParseShape(s.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_dims(dims)
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_dropped() {
        let shape = FeatureShape::from_dims([None, Some(13), Some(13), Some(1024)]).unwrap();
        assert_eq!(shape, FeatureShape::new(13, 13, 1024).unwrap());

        let shape = FeatureShape::from_dims([Some(0), Some(26), Some(26), Some(512)]).unwrap();
        assert_eq!(shape.spatial(), (26, 26));
        assert_eq!(shape.channels, 512);
    }

    #[test]
    fn test_wrong_rank_is_rejected() {
        assert!(matches!(
            FeatureShape::from_dims([Some(13), Some(13)]),
            Err(NeckError::Rank(2))
        ));
        assert!(matches!(
            FeatureShape::new(13, 13, 0),
            Err(NeckError::Rank(2))
        ));
        assert!(matches!(
            FeatureShape::from_dims([Some(1), Some(13), Some(13), Some(1024)]),
            Err(NeckError::Rank(4))
        ));
    }

    #[test]
    fn test_parse() {
        let shape: FeatureShape = "52x52x256".parse().unwrap();
        assert_eq!(shape, FeatureShape::new(52, 52, 256).unwrap());

        let shape: FeatureShape = "?x13x13x1024".parse().unwrap();
        assert_eq!(shape.to_string(), "(13, 13, 1024)");

        assert!(matches!(
            "13x13xabc".parse::<FeatureShape>(),
            Err(NeckError::ParseShape(_))
        ));
    }

    #[test]
    fn test_nchw_layout() {
        let shape = FeatureShape::new(26, 26, 512).unwrap();
        assert_eq!(shape.to_nchw(2), [2, 512, 26, 26]);
        assert_eq!(FeatureShape::from_nchw([2, 512, 26, 26]), shape);
        assert_eq!(shape.upsampled(2).spatial(), (52, 52));
    }

    #[test]
    fn test_serde_as_list() {
        let shape: FeatureShape = serde_yaml::from_str("[~, 13, 13, 1024]").unwrap();
        assert_eq!(shape, FeatureShape::new(13, 13, 1024).unwrap());
        assert_eq!(serde_json::to_string(&shape).unwrap(), "[13,13,1024]");
    }
}
