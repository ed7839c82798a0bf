//! Video processing amplifier controls

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CaptureError, Result};

/// Image controls a capture device may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoProcAmpProperty {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    ColorEnable,
    WhiteBalance,
    BacklightCompensation,
    Gain,
}

impl VideoProcAmpProperty {
    /// Numeric identifier used by backends
    pub fn id(&self) -> i32 {
        match self {
            Self::Brightness => 0,
            Self::Contrast => 1,
            Self::Hue => 2,
            Self::Saturation => 3,
            Self::Sharpness => 4,
            Self::Gamma => 5,
            Self::ColorEnable => 6,
            Self::WhiteBalance => 7,
            Self::BacklightCompensation => 8,
            Self::Gain => 9,
        }
    }

    /// Look up a property by its numeric identifier
    pub fn from_id(id: i32) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.id() == id)
            .ok_or(CaptureError::PropertyUnsupported(id))
    }

    pub fn all() -> &'static [VideoProcAmpProperty] {
        &[
            Self::Brightness,
            Self::Contrast,
            Self::Hue,
            Self::Saturation,
            Self::Sharpness,
            Self::Gamma,
            Self::ColorEnable,
            Self::WhiteBalance,
            Self::BacklightCompensation,
            Self::Gain,
        ]
    }
}

impl fmt::Display for VideoProcAmpProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Brightness => "brightness",
            Self::Contrast => "contrast",
            Self::Hue => "hue",
            Self::Saturation => "saturation",
            Self::Sharpness => "sharpness",
            Self::Gamma => "gamma",
            Self::ColorEnable => "color_enable",
            Self::WhiteBalance => "white_balance",
            Self::BacklightCompensation => "backlight_compensation",
            Self::Gain => "gain",
        };
        write!(f, "{}", name)
    }
}

/// Control mode bits for a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PropertyFlags(pub u32);

impl PropertyFlags {
    pub const AUTO: PropertyFlags = PropertyFlags(0x1);
    pub const MANUAL: PropertyFlags = PropertyFlags(0x2);

    pub fn contains(&self, other: PropertyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PropertyFlags {
    type Output = PropertyFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PropertyFlags(self.0 | rhs.0)
    }
}

/// Current value of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: i32,
    pub flags: PropertyFlags,
}

/// Supported range of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
    /// Modes the property supports
    pub flags: PropertyFlags,
}

impl PropertyRange {
    /// Check whether a value lies on the range's grid
    pub fn contains(&self, value: i32) -> bool {
        if value < self.min || value > self.max {
            return false;
        }
        self.step <= 1 || (value - self.min) % self.step == 0
    }
}
