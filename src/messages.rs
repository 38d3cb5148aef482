// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::srv1::{CaptureMode, Frame, IrReadings, VelocityState};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct VelocityCommand {
    pub linear: f64,  // m/s
    pub angular: f64, // rad/s
}

// Camera resolution change from scripts -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraCommand {
    pub mode: CaptureMode,
}

// Velocity the robot actually acknowledged, runtime -> consumers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Odometry {
    pub linear: f64,
    pub angular: f64,
}

impl From<VelocityState> for Odometry {
    fn from(state: VelocityState) -> Self {
        Self {
            linear: state.linear,
            angular: state.angular,
        }
    }
}

/// Bounce IR readings with their estimated distances (cm)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IrState {
    pub readings: IrReadings,
    pub distances_cm: [f64; 4],
}

impl From<IrReadings> for IrState {
    fn from(readings: IrReadings) -> Self {
        Self {
            readings,
            distances_cm: readings.distances(),
        }
    }
}

/// Metadata for the frame published alongside it on the JPEG topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameInfo {
    pub mode: CaptureMode,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub declared_size: u32,
    pub received: usize,
    pub complete: bool,
    pub sequence: u64,
}

impl FrameInfo {
    pub fn new(mode: CaptureMode, frame: &Frame) -> Self {
        let (width, height) = mode.dimensions().unzip();
        Self {
            mode,
            width,
            height,
            declared_size: frame.declared_size(),
            received: frame.received(),
            complete: frame.is_complete(),
            sequence: frame.captures(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// A motor or sensor exchange failed this cycle
    Fault,
}
