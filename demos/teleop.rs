// Keyboard teleop: W/S drive, A/D rotate, R/F speed, C camera size, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use surveyor_zenoh_runtime::config::{TOPIC_CMD_CAMERA, TOPIC_CMD_VEL};
use surveyor_zenoh_runtime::messages::{CameraCommand, VelocityCommand};
use surveyor_zenoh_runtime::srv1::CaptureMode;

const SPEEDS: [f64; 3] = [0.05, 0.15, 0.3]; // m/s
const TURN_SPEEDS: [f64; 3] = [0.3, 0.8, 1.5]; // rad/s
const CAMERA_MODES: [CaptureMode; 4] = [
    CaptureMode::Off,
    CaptureMode::Small,
    CaptureMode::Medium,
    CaptureMode::Large,
];
const INPUT_TIMEOUT_MS: u64 = 300; // Reset velocities after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_vel = session.declare_publisher(TOPIC_CMD_VEL).await?;
    let pub_camera = session.declare_publisher(TOPIC_CMD_CAMERA).await?;

    info!("Controls: W/S=drive, A/D=rotate, R/F=speed, C=camera size, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_vel, &pub_camera).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    pub_vel: &zenoh::pubsub::Publisher<'_>,
    pub_camera: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut camera_idx: usize = 0;

    // Persistent velocity state
    let mut linear = 0.0;
    let mut angular = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 50ms timeout; the runtime itself only cycles at 5Hz
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        linear = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        linear = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation (counter-clockwise positive)
                    KeyCode::Char('a') if pressed => {
                        angular = TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        angular = -TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Camera size, cycles off -> small -> medium -> large
                    KeyCode::Char('c') if kind == KeyEventKind::Press => {
                        camera_idx = (camera_idx + 1) % CAMERA_MODES.len();
                        let cmd = CameraCommand {
                            mode: CAMERA_MODES[camera_idx],
                        };
                        info!("Camera: {}", cmd.mode);
                        pub_camera.put(serde_json::to_string(&cmd)?).await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            linear = 0.0;
            angular = 0.0;
        }

        let cmd = VelocityCommand { linear, angular };
        pub_vel.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
