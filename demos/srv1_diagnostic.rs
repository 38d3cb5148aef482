// SRV-1 diagnostic: checks the link without moving the robot
//
// Handshakes, reads the bounce IR beacons and grabs one small frame.
// The only motor command sent is the stop issued when the port is closed.
//
// Usage: cargo run --example srv1_diagnostic -- [port] [image size]
// Example: cargo run --example srv1_diagnostic -- /dev/ttyUSB0 160x128

use std::fs;
use surveyor_zenoh_runtime::config::ROBOT_PORT;
use surveyor_zenoh_runtime::srv1::{Capture, CaptureMode, Surveyor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Get port and image size from args or use defaults
    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| ROBOT_PORT.to_string());
    let mode: CaptureMode = match args.next() {
        Some(size) => size.parse()?,
        None => CaptureMode::Small,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           SRV-1 Link Diagnostic (NO MOTION)                  ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut robot = match Surveyor::open(&port) {
        Ok(robot) => {
            println!("  ✓ Serial port opened successfully");
            robot
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the radio dongle is plugged in");
            println!("  - Check you have permission to open the port (dialout group)");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Version handshake...");
    match robot.init() {
        Ok(()) => println!("  ✓ {}", robot.version().unwrap_or("(empty version)")),
        Err(e) => {
            println!("  ✗ {}", e);
            println!("  - Is the robot powered on and in range?");
            return Err(e.into());
        }
    }
    println!();

    println!("Step 3: Bounce IR...");
    match robot.query_ir() {
        Ok(readings) => {
            let names = ["Front", "Left", "Back", "Right"];
            for ((name, raw), cm) in names
                .iter()
                .zip(readings.as_array())
                .zip(readings.distances())
            {
                println!("    {:<6} {:>4} (~{:.1} cm)", name, raw, cm);
            }
        }
        Err(e) => println!("  ✗ {}", e),
    }
    println!();

    println!("Step 4: Capturing one {} frame...", mode);
    robot.set_desired_capture_mode(mode);
    match robot.capture_image() {
        Ok(Capture::Frame {
            declared_size,
            received,
        }) => {
            println!("  ✓ {} of {} bytes", received, declared_size);
            if robot.frame().is_complete() {
                fs::write("srv1_frame.jpg", robot.frame().to_vec())?;
                println!("    Saved to srv1_frame.jpg");
            }
        }
        Ok(Capture::Disabled) => println!("  - Camera off, nothing captured"),
        Err(e) => println!("  ✗ {}", e),
    }
    println!();

    robot.close();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Next step: Run 'cargo run' and drive with 'cargo run --example teleop'");

    Ok(())
}
