//! Static description of a camera and the controls it exposes

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What a client learns about the camera before streaming from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescription {
    pub id: Arc<str>,
    pub vendor_flags: u32,
    /// Opaque characteristics blob
    pub metadata: Vec<u8>,
}

/// Adjustable camera controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraParam {
    Brightness,
    Contrast,
    AutoGain,
    Gain,
    AutoWhiteBalance,
    WhiteBalanceTemperature,
    Sharpness,
    AutoExposure,
    AbsoluteExposure,
    AbsoluteFocus,
    AutoFocus,
    AbsoluteZoom,
}

/// Valid range of one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRange {
    pub param: CameraParam,
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl ControlRange {
    /// Range reported for controls the camera doesn't have
    pub const UNSUPPORTED: (i32, i32, i32) = (0, 0, 0);

    pub fn as_tuple(&self) -> (i32, i32, i32) {
        (self.min, self.max, self.step)
    }
}
