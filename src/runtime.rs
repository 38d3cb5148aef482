// 5 Hz loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. if teleop crashes and stops sending commands, the robot is stopped instead of driving on
//
// Serial exchanges block, so they run under block_in_place to keep the
// zenoh tasks on other worker threads moving.

use std::time::{Duration, Instant};
use tokio::task::block_in_place;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, CYCLE_PERIOD, DriverConfig, ROBOT_PORT, TOPIC_CAMERA, TOPIC_CAMERA_JPEG,
    TOPIC_CMD_CAMERA, TOPIC_CMD_VEL, TOPIC_HEALTH, TOPIC_IR, TOPIC_ODOM,
};
use crate::messages::{CameraCommand, FrameInfo, IrState, Odometry, RuntimeHealth, VelocityCommand};
use crate::srv1::{CaptureMode, SensorStatus, Surveyor};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the runtime needs to bring up the robot
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: String,
    pub capture_mode: CaptureMode,
    pub ir_enabled: bool,
    pub cycle_period: Duration,
    pub driver: DriverConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: ROBOT_PORT.to_string(),
            capture_mode: CaptureMode::Off,
            ir_enabled: false,
            cycle_period: CYCLE_PERIOD,
            driver: DriverConfig::default(),
        }
    }
}

pub struct Runtime {
    latest_cmd: Option<VelocityCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    // Last velocity the robot acknowledged; None forces a resend
    sent: Option<VelocityCommand>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            sent: None,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: VelocityCommand) {
        info!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Velocity to drive at based on watchdog state
    fn compute_velocity(&mut self) -> VelocityCommand {
        self.velocity_at(Instant::now())
    }

    fn velocity_at(&mut self, now: Instant) -> VelocityCommand {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            VelocityCommand::default()
        } else if let Some(cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            cmd
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            VelocityCommand::default()
        }
    }

    /// Only talk to the motors when the target changes
    fn needs_send(&self, target: &VelocityCommand) -> bool {
        self.sent.as_ref() != Some(target)
    }

    fn mark_sent(&mut self, target: VelocityCommand) {
        self.sent = Some(target);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    info!("Connecting to SRV-1 on {}...", config.port);
    let mut robot = Surveyor::open_with_config(&config.port, config.driver.clone())?;
    robot.init()?;
    robot.set_desired_capture_mode(config.capture_mode);
    robot.set_ir_enabled(config.ir_enabled);

    let result = drive(&mut robot, &config).await;

    // Stop the robot whether the loop ended cleanly or not
    robot.close();
    result
}

async fn drive(robot: &mut Surveyor, config: &RuntimeConfig) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_vel = session.declare_subscriber(TOPIC_CMD_VEL).await?;
    let sub_camera = session.declare_subscriber(TOPIC_CMD_CAMERA).await?;
    let pub_odom = session.declare_publisher(TOPIC_ODOM).await?;
    let pub_ir = session.declare_publisher(TOPIC_IR).await?;
    let pub_camera = session.declare_publisher(TOPIC_CAMERA).await?;
    let pub_jpeg = session.declare_publisher(TOPIC_CAMERA_JPEG).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(config.cycle_period);
    // A slow capture delays the next cycle instead of bunching them up
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {}ms cycle, {}ms watchdog timeout, camera {}, IR {}",
        config.cycle_period.as_millis(),
        CMD_TIMEOUT.as_millis(),
        config.capture_mode,
        if config.ir_enabled { "on" } else { "off" }
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_VEL, TOPIC_CMD_CAMERA);
    info!(
        "Publishing to: {}, {}, {}, {}, {}",
        TOPIC_ODOM, TOPIC_IR, TOPIC_CAMERA, TOPIC_CAMERA_JPEG, TOPIC_HEALTH
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_vel.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<VelocityCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse velocity command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_camera.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<CameraCommand>(&payload) {
                Ok(cmd) => {
                    info!("Camera mode requested: {}", cmd.mode);
                    robot.set_desired_capture_mode(cmd.mode);
                }
                Err(e) => warn!("Failed to parse camera command: {}", e),
            }
        }

        // 2. Compute target (includes watchdog logic) and send it if it changed
        let target = runtime.compute_velocity();
        let mut fault = false;
        if runtime.needs_send(&target) {
            match block_in_place(|| robot.set_speed(target.linear, target.angular)) {
                Ok(_) => runtime.mark_sent(target),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    // Not marked sent, so the next cycle retries
                    warn!("Motor command failed: {}", e);
                    fault = true;
                }
            }
        }

        // 3. One sensor cycle
        let cycle = block_in_place(|| robot.read_sensors())?;
        fault |= cycle.camera.is_failed() || cycle.ir.is_failed();

        // 4. Publish state
        let odom = Odometry::from(robot.velocity());
        pub_odom.put(serde_json::to_string(&odom)?).await?;

        if let SensorStatus::Updated(_) = cycle.camera {
            let info = FrameInfo::new(robot.capture_state().confirmed(), robot.frame());
            pub_camera.put(serde_json::to_string(&info)?).await?;
            pub_jpeg.put(robot.frame().to_vec()).await?;
        }

        if let SensorStatus::Updated(readings) = cycle.ir {
            pub_ir.put(serde_json::to_string(&IrState::from(readings))?).await?;
        }

        // 5. Publish health
        let health = if fault {
            RuntimeHealth::Fault
        } else {
            runtime.health()
        };
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}
