// High-level driver for the Surveyor SRV-1
//
// Combines the motion model, camera and IR adapters over a single serial link
// to provide a simple API for driving the robot and reading its sensors.
// Not reentrant: one caller issues every call in order.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use super::camera::{Camera, Capture, CaptureMode, CaptureState, Frame};
use super::error::{Result, SurveyorError};
use super::ir::{self, IrReadings};
use super::kinematics::{self, MotionLimit, MotionPlan};
use super::protocol::{self, BAUD_RATE};
use super::transport::{SerialLink, TimedTransport};
use crate::config::DriverConfig;

/// Velocity achieved by the last acknowledged motor command
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityState {
    /// m/s, forward positive
    pub linear: f64,
    /// rad/s, counter-clockwise positive
    pub angular: f64,
}

/// What happened to one sensor during a [`Surveyor::read_sensors`] cycle
#[derive(Debug)]
pub enum SensorStatus<T> {
    /// Sensor disabled this cycle
    Skipped,
    Updated(T),
    /// Non-fatal failure; the previous reading is kept
    Failed(SurveyorError),
}

impl<T> SensorStatus<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, SensorStatus::Failed(_))
    }
}

/// Result of one sensor cycle
#[derive(Debug)]
pub struct SensorCycle {
    pub camera: SensorStatus<Capture>,
    pub ir: SensorStatus<IrReadings>,
}

/// Driver for one SRV-1 robot on one serial port
pub struct Surveyor<L: SerialLink = Box<dyn SerialPort>> {
    port: String,
    transport: Option<TimedTransport<L>>,
    config: DriverConfig,
    version: Option<String>,
    velocity: VelocityState,
    camera: Camera,
    ir: IrReadings,
    ir_enabled: bool,
}

impl Surveyor {
    /// Open the serial link with default timings. Call [`init`](Self::init)
    /// before anything else.
    pub fn open(port: &str) -> Result<Self> {
        Self::open_with_config(port, DriverConfig::default())
    }

    /// Open the serial link: raw 8N1 at 115200 baud, stale input discarded
    /// before and after configuring.
    pub fn open_with_config(port: &str, config: DriverConfig) -> Result<Self> {
        info!("Opening connection to SRV-1 on {}", port);
        let mut link = serialport::new(port, BAUD_RATE)
            .timeout(config.poll_interval)
            .open()?;

        link.clear(ClearBuffer::Input)?;
        link.set_baud_rate(BAUD_RATE)?;
        link.set_data_bits(DataBits::Eight)?;
        link.set_parity(Parity::None)?;
        link.set_stop_bits(StopBits::One)?;
        link.set_flow_control(FlowControl::None)?;
        link.clear(ClearBuffer::Input)?;

        Ok(Self::with_link(port, link, config))
    }
}

impl<L: SerialLink> Surveyor<L> {
    /// Wrap an already-open link
    pub fn with_link(port: &str, link: L, config: DriverConfig) -> Self {
        let transport = TimedTransport::new(link, config.poll_interval);
        Self {
            port: port.to_string(),
            transport: Some(transport),
            config,
            version: None,
            velocity: VelocityState::default(),
            camera: Camera::new(),
            ir: IrReadings::default(),
            ir_enabled: false,
        }
    }

    fn transport(&mut self) -> Result<&mut TimedTransport<L>> {
        self.transport.as_mut().ok_or(SurveyorError::NotConnected)
    }

    /// Check that the robot answers by asking for its firmware version.
    pub fn init(&mut self) -> Result<()> {
        let max_len = self.config.max_version_len;
        let timeout = self.config.handshake_timeout;
        let version = protocol::query_version(self.transport()?, max_len, timeout)?;

        info!("SRV-1 on {} ready: {}", self.port, version);
        self.version = Some(version);
        Ok(())
    }

    /// Drop whatever is waiting on the line and repeat the version handshake.
    pub fn reset_comms(&mut self) -> Result<()> {
        let flushed = self.transport()?.flush_input()?;
        debug!("Reset comms: flushed {} bytes", flushed);
        self.init()
    }

    /// Stop the motors and release the port.
    ///
    /// Safe to call repeatedly and after I/O failures; a failed stop command
    /// is logged, not returned.
    pub fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        info!("Closing connection to SRV-1 on {}", self.port);
        if let Err(e) = protocol::set_motors(&mut transport, 0, 0, self.config.motor_ack_timeout) {
            warn!("Failed to stop motors on close: {}", e);
        }
        self.velocity = VelocityState::default();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Drive at `linear` m/s and `angular` rad/s until the next command.
    ///
    /// Forward velocity takes precedence over rotation. Requests the platform
    /// cannot meet are logged and reported in the returned plan; the command
    /// is still sent with the nearest reachable codes.
    pub fn set_speed(&mut self, linear: f64, angular: f64) -> Result<MotionPlan> {
        let plan = kinematics::plan(linear, angular);
        for limit in &plan.limits {
            match limit {
                MotionLimit::OutOfRange { requested, clamped } => {
                    warn!("Speed {} m/s out of range, clamped to code {}", requested, clamped)
                }
                MotionLimit::Unattainable {
                    requested,
                    achieved,
                } => warn!(
                    "Can't achieve {:.3} rad/s rotation, got {:.3}",
                    requested, achieved
                ),
            }
        }
        debug!(
            "set_speed({:.3}, {:.3}) -> wheels {:?} ({:.3} m/s, {:.3} rad/s)",
            linear, angular, plan.wheels, plan.linear, plan.angular
        );

        let timeout = self.config.motor_ack_timeout;
        protocol::set_motors(self.transport()?, plan.wheels.left, plan.wheels.right, timeout)?;

        self.velocity = VelocityState {
            linear: plan.linear,
            angular: plan.angular,
        };
        Ok(plan)
    }

    /// Stop both wheels
    pub fn stop(&mut self) -> Result<()> {
        self.set_speed(0.0, 0.0).map(|_| ())
    }

    /// Choose the image size. Takes effect on the next capture, once the
    /// robot confirms it.
    pub fn set_desired_capture_mode(&mut self, mode: CaptureMode) {
        self.camera.set_desired_mode(mode);
    }

    pub fn set_ir_enabled(&mut self, enabled: bool) {
        self.ir_enabled = enabled;
    }

    /// Run one capture cycle on its own.
    pub fn capture_image(&mut self) -> Result<Capture> {
        let transport = self.transport.as_mut().ok_or(SurveyorError::NotConnected)?;
        self.camera.capture(transport, &self.config)
    }

    /// Query the IR beacons on their own. Readings are only replaced on success.
    pub fn query_ir(&mut self) -> Result<IrReadings> {
        let timeout = self.config.ir_timeout;
        let readings = ir::query(self.transport()?, timeout)?;
        self.ir = readings;
        Ok(readings)
    }

    /// Refresh every enabled sensor once; meant to be called once per cycle.
    ///
    /// Only fatal errors are returned. Per-sensor failures are logged and
    /// reported in the cycle, and the caller can simply try again next cycle.
    pub fn read_sensors(&mut self) -> Result<SensorCycle> {
        let camera = match self.capture_image() {
            Ok(Capture::Disabled) => SensorStatus::Skipped,
            Ok(capture) => SensorStatus::Updated(capture),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Image capture failed: {}", e);
                SensorStatus::Failed(e)
            }
        };

        let ir = if self.ir_enabled {
            match self.query_ir() {
                Ok(readings) => SensorStatus::Updated(readings),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("IR query failed: {}", e);
                    SensorStatus::Failed(e)
                }
            }
        } else {
            SensorStatus::Skipped
        };

        Ok(SensorCycle { camera, ir })
    }

    // === State snapshot ===

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Firmware version reported at [`init`](Self::init)
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn velocity(&self) -> VelocityState {
        self.velocity
    }

    pub fn capture_state(&self) -> CaptureState {
        self.camera.state()
    }

    /// The latest frame. Use [`Frame::to_vec`] to keep its bytes.
    pub fn frame(&self) -> &Frame {
        self.camera.frame()
    }

    pub fn ir_readings(&self) -> IrReadings {
        self.ir
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl<L: SerialLink> Drop for Surveyor<L> {
    fn drop(&mut self) {
        // Never leave the robot driving after the driver goes away
        self.close();
    }
}
