// Driver for the Surveyor SRV-1 tracked robot
//
// Provides:
// - Deadline-bounded serial transport
// - SRV-1 command protocol (motor, image mode, capture, bounce IR, version)
// - Differential-drive motion model (velocity <-> wheel codes)
// - Camera mode negotiation and JPEG frame assembly
// - Bounce IR readings
// - High-level device API

pub mod camera;
mod driver;
pub mod error;
pub mod ir;
pub mod kinematics;
pub mod protocol;
pub mod transport;

pub use camera::{Capture, CaptureMode, CaptureState, Frame};
pub use driver::{SensorCycle, SensorStatus, Surveyor, VelocityState};
pub use error::{Result, SurveyorError};
pub use ir::IrReadings;
pub use kinematics::{MotionLimit, MotionPlan, WheelCodes};
pub use transport::{SerialLink, TimedTransport};
