use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use surveyor_zenoh_runtime::config::{CYCLE_PERIOD, DriverConfig, ROBOT_PORT};
use surveyor_zenoh_runtime::runtime::{self, RuntimeConfig};
use surveyor_zenoh_runtime::srv1::CaptureMode;

#[derive(Parser, Debug)]
#[command(name = "surveyor-zenoh-runtime")]
#[command(about = "Zenoh runtime for the Surveyor SRV-1 robot")]
struct Args {
    /// Serial port of the robot's radio link
    #[arg(short, long, default_value = ROBOT_PORT)]
    port: String,

    /// Image size: off, 80x64, 160x128 or 320x240
    #[arg(long, default_value = "off")]
    image_size: CaptureMode,

    /// Poll the bounce IR beacons every cycle
    #[arg(long)]
    ir: bool,

    /// Loop period in milliseconds
    #[arg(long, default_value_t = CYCLE_PERIOD.as_millis() as u64)]
    cycle_ms: u64,

    /// Deadline for a whole JPEG payload in milliseconds
    #[arg(long)]
    frame_timeout_ms: Option<u64>,

    /// Capture requests per cycle before giving up on a frame
    #[arg(long)]
    capture_attempts: Option<u32>,
}

impl Args {
    fn into_config(self) -> RuntimeConfig {
        let mut driver = DriverConfig::default();
        if let Some(ms) = self.frame_timeout_ms {
            driver.frame_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.capture_attempts {
            driver.capture_attempts = attempts;
        }

        RuntimeConfig {
            port: self.port,
            capture_mode: self.image_size,
            ir_enabled: self.ir,
            cycle_period: Duration::from_millis(self.cycle_ms),
            driver,
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let config = Args::parse().into_config();

    if let Err(e) = runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
