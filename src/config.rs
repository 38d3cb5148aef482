// Timeouts, topics, robot configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Runtime loop period; the camera alone needs most of a cycle
pub const CYCLE_PERIOD: Duration = Duration::from_millis(200);

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(1000);

// Zenoh topics
pub const TOPIC_CMD_VEL: &str = "srv1/cmd/vel"; // velocity commands
pub const TOPIC_CMD_CAMERA: &str = "srv1/cmd/camera"; // capture mode changes
pub const TOPIC_ODOM: &str = "srv1/state/odom"; // achieved velocity
pub const TOPIC_IR: &str = "srv1/state/ir"; // bounce IR readings
pub const TOPIC_CAMERA: &str = "srv1/state/camera"; // frame metadata
pub const TOPIC_CAMERA_JPEG: &str = "srv1/state/camera/jpeg"; // raw frame bytes
pub const TOPIC_HEALTH: &str = "srv1/state/health"; // health status

// Serial port of the radio link to the robot
pub const ROBOT_PORT: &str = "/dev/ttyUSB0";

/// Per-exchange deadlines and limits for the SRV-1 link.
///
/// The defaults were measured on the physical platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wait for "#M" after a motor command
    pub motor_ack_timeout: Duration,
    /// Wait for the echo of an image mode change
    pub mode_ack_timeout: Duration,
    /// Wait for the 10-byte capture header
    pub capture_header_timeout: Duration,
    /// Wait for the whole JPEG payload (capture + transfer)
    pub frame_timeout: Duration,
    /// Wait for the 46-byte bounce IR reply
    pub ir_timeout: Duration,
    /// Wait for the version line at startup
    pub handshake_timeout: Duration,
    /// Capture requests per cycle before giving up
    pub capture_attempts: u32,
    /// Sleep between polls of an idle link
    pub poll_interval: Duration,
    /// Longest version line accepted
    pub max_version_len: usize,
    /// Largest frame the driver will allocate for
    pub max_frame_bytes: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            motor_ack_timeout: Duration::from_millis(250),
            mode_ack_timeout: Duration::from_millis(500),
            capture_header_timeout: Duration::from_millis(500),
            frame_timeout: Duration::from_millis(1500),
            ir_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(2),
            capture_attempts: 10,
            poll_interval: Duration::from_millis(1),
            max_version_len: 256,
            max_frame_bytes: 1 << 20,
        }
    }
}
