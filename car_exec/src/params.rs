//! # Car Executable Parameters
//!
//! All parameters of the car executable, loaded from `car_exec.toml`. Every table and field is
//! optional and falls back on its default.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{
    ctrl_loop::CtrlParams,
    perception::{CameraParams, VisionParams},
    serial_link::LinkParams,
    tm_reader::TmParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CarExecParams {
    /// Serial connection to the microcontroller
    pub link: LinkParams,

    /// Telemetry reader
    pub telemetry: TmParams,

    /// Control loop timings and policy
    pub ctrl: CtrlParams,

    pub camera: CameraParams,

    pub vision: VisionParams,
}
