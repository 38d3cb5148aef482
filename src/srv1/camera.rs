// Camera: capture mode negotiation and JPEG frame assembly
//
// The requested mode is only trusted once the robot has echoed it back.
// Frames arrive as a 10-byte header declaring the payload size, followed by
// the payload itself; nothing inside the JPEG is inspected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::error::{Result, SurveyorError};
use super::protocol;
use super::transport::{SerialLink, TimedTransport};
use crate::config::DriverConfig;

/// Image resolution class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Off,
    Small,
    Medium,
    Large,
}

impl CaptureMode {
    /// Byte sent to select this mode
    pub fn code(self) -> u8 {
        match self {
            CaptureMode::Off => b'Z',
            CaptureMode::Small => b'a',
            CaptureMode::Medium => b'b',
            CaptureMode::Large => b'c',
        }
    }

    /// (width, height) in pixels
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            CaptureMode::Off => None,
            CaptureMode::Small => Some((80, 64)),
            CaptureMode::Medium => Some((160, 128)),
            CaptureMode::Large => Some((320, 240)),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureMode::Off => "off",
            CaptureMode::Small => "small",
            CaptureMode::Medium => "medium",
            CaptureMode::Large => "large",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capture mode '{0}' (expected off, small, medium, large, 80x64, 160x128 or 320x240)")]
pub struct ParseCaptureModeError(String);

impl FromStr for CaptureMode {
    type Err = ParseCaptureModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(CaptureMode::Off),
            "small" | "80x64" => Ok(CaptureMode::Small),
            "medium" | "160x128" => Ok(CaptureMode::Medium),
            "large" | "320x240" => Ok(CaptureMode::Large),
            _ => Err(ParseCaptureModeError(s.to_string())),
        }
    }
}

/// Where the camera stands between what was asked for and what the robot
/// has acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Off,
    /// `desired` differs from what the robot last confirmed
    Pending {
        desired: CaptureMode,
        confirmed: CaptureMode,
    },
    Confirmed(CaptureMode),
}

impl CaptureState {
    pub fn desired(self) -> CaptureMode {
        match self {
            CaptureState::Off => CaptureMode::Off,
            CaptureState::Pending { desired, .. } => desired,
            CaptureState::Confirmed(mode) => mode,
        }
    }

    pub fn confirmed(self) -> CaptureMode {
        match self {
            CaptureState::Off => CaptureMode::Off,
            CaptureState::Pending { confirmed, .. } => confirmed,
            CaptureState::Confirmed(mode) => mode,
        }
    }

    /// Ask for a new mode. Asking for the confirmed mode cancels any pending
    /// change.
    pub fn request(self, mode: CaptureMode) -> Self {
        Self::settled(mode, self.confirmed())
    }

    /// The robot echoed the desired mode.
    fn acknowledge(self) -> Self {
        let desired = self.desired();
        Self::settled(desired, desired)
    }

    fn settled(desired: CaptureMode, confirmed: CaptureMode) -> Self {
        match (desired, confirmed) {
            (CaptureMode::Off, CaptureMode::Off) => CaptureState::Off,
            (d, c) if d == c => CaptureState::Confirmed(d),
            (desired, confirmed) => CaptureState::Pending { desired, confirmed },
        }
    }
}

/// The most recent frame. Storage is reused between captures and never
/// handed out; callers get copies.
#[derive(Debug, Default)]
pub struct Frame {
    data: Vec<u8>,
    declared_size: u32,
    received: usize,
    captures: u64,
}

impl Frame {
    /// Payload size announced by the robot
    pub fn declared_size(&self) -> u32 {
        self.declared_size
    }

    /// Payload bytes that actually arrived
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.declared_size > 0 && self.received == self.declared_size as usize
    }

    /// Number of frames captured so far
    pub fn captures(&self) -> u64 {
        self.captures
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Copy of the bytes received for the current frame
    pub fn to_vec(&self) -> Vec<u8> {
        self.data[..self.received].to_vec()
    }

    /// Resize storage for a new payload of `size` bytes.
    fn prepare(&mut self, size: u32) -> &mut [u8] {
        let size = size as usize;
        if size < self.data.len() {
            self.data.truncate(size);
            self.data.shrink_to_fit();
        } else {
            self.data.resize(size, 0);
        }
        self.declared_size = size as u32;
        self.received = 0;
        &mut self.data
    }

    fn finish(&mut self, received: usize) {
        self.received = received;
        self.captures += 1;
    }
}

/// Outcome of one capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Camera is off; nothing to fetch
    Disabled,
    Frame { declared_size: u32, received: usize },
}

/// Capture mode state machine plus the frame it fills
#[derive(Debug, Default)]
pub struct Camera {
    state: CaptureState,
    frame: Frame,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn set_desired_mode(&mut self, mode: CaptureMode) {
        self.state = self.state.request(mode);
    }

    /// Run one capture cycle: confirm a pending mode change if needed, then
    /// fetch a frame if the camera is on.
    ///
    /// A payload that stops short of its declared size is still reported as
    /// a frame; compare `received` with `declared_size`.
    pub fn capture<L: SerialLink>(
        &mut self,
        transport: &mut TimedTransport<L>,
        config: &DriverConfig,
    ) -> Result<Capture> {
        self.confirm_mode(transport, config)?;

        let mode = match self.state {
            CaptureState::Confirmed(mode) => mode,
            _ => return Ok(Capture::Disabled),
        };
        debug!("Capturing in image mode {}", mode);

        let declared_size = request_frame(transport, config)?;
        if declared_size > config.max_frame_bytes {
            let err = SurveyorError::FrameTooLarge {
                declared: declared_size,
                limit: config.max_frame_bytes,
            };
            return Err(protocol::resync(transport, err));
        }

        let buf = self.frame.prepare(declared_size);
        let received = transport.read_exact_within(buf, config.frame_timeout)?;
        self.frame.finish(received);

        if received < declared_size as usize {
            warn!(
                "Short frame: {} of {} bytes before timeout",
                received, declared_size
            );
        } else {
            debug!("Frame of {} bytes received", received);
        }

        Ok(Capture::Frame {
            declared_size,
            received,
        })
    }

    fn confirm_mode<L: SerialLink>(
        &mut self,
        transport: &mut TimedTransport<L>,
        config: &DriverConfig,
    ) -> Result<()> {
        let CaptureState::Pending { desired, .. } = self.state else {
            return Ok(());
        };

        // Turning the camera off needs no word from the robot
        if desired != CaptureMode::Off {
            info!("Setting image mode {} ('{}')", desired, desired.code() as char);
            protocol::set_image_mode(transport, desired.code(), config.mode_ack_timeout)?;
        }
        self.state = self.state.acknowledge();
        Ok(())
    }
}

/// Issue capture requests until a header arrives, retrying short replies.
fn request_frame<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    config: &DriverConfig,
) -> Result<u32> {
    let max_attempts = config.capture_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match protocol::request_image(transport, config.capture_header_timeout) {
            Ok(size) => return Ok(size),
            Err(SurveyorError::Timeout { received, .. }) if attempts < max_attempts => {
                debug!(
                    "Capture header attempt {} got {} bytes, retrying",
                    attempts, received
                );
            }
            Err(SurveyorError::Timeout { .. }) => {
                let err = SurveyorError::CaptureAbandoned { attempts };
                warn!("{}", err);
                return Err(err);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srv1::transport::mock::MockLink;
    use std::time::Duration;

    fn test_config() -> DriverConfig {
        DriverConfig {
            mode_ack_timeout: Duration::from_millis(10),
            capture_header_timeout: Duration::from_millis(5),
            frame_timeout: Duration::from_millis(20),
            ..DriverConfig::default()
        }
    }

    fn transport(link: &MockLink) -> TimedTransport<MockLink> {
        TimedTransport::new(link.clone(), Duration::from_millis(1))
    }

    fn header(size: u32) -> Vec<u8> {
        let mut bytes = b"##IMJ3".to_vec();
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes
    }

    fn frame_reply(payload: &[u8]) -> Vec<u8> {
        let mut bytes = header(payload.len() as u32);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("320x240".parse::<CaptureMode>().unwrap(), CaptureMode::Large);
        assert_eq!("Medium".parse::<CaptureMode>().unwrap(), CaptureMode::Medium);
        assert_eq!("80x64".parse::<CaptureMode>().unwrap(), CaptureMode::Small);
        assert_eq!("off".parse::<CaptureMode>().unwrap(), CaptureMode::Off);
        assert!("640x480".parse::<CaptureMode>().is_err());
    }

    #[test]
    fn test_state_transitions() {
        let state = CaptureState::Off.request(CaptureMode::Large);
        assert_eq!(
            state,
            CaptureState::Pending {
                desired: CaptureMode::Large,
                confirmed: CaptureMode::Off
            }
        );
        assert_eq!(state.acknowledge(), CaptureState::Confirmed(CaptureMode::Large));

        // Re-requesting the confirmed mode cancels the change
        let state = CaptureState::Confirmed(CaptureMode::Small).request(CaptureMode::Large);
        assert_eq!(state.request(CaptureMode::Small), CaptureState::Confirmed(CaptureMode::Small));

        let state = CaptureState::Confirmed(CaptureMode::Small).request(CaptureMode::Off);
        assert_eq!(state.confirmed(), CaptureMode::Small);
        assert_eq!(state.acknowledge(), CaptureState::Off);
    }

    #[test]
    fn test_capture_while_off_is_noop() {
        let link = MockLink::new();
        let mut t = transport(&link);
        let mut camera = Camera::new();

        assert_eq!(camera.capture(&mut t, &test_config()).unwrap(), Capture::Disabled);
        assert!(link.writes().is_empty());
    }

    #[test]
    fn test_turning_off_needs_no_exchange() {
        let payload = [0xFFu8, 0xD8, 0xFF, 0xD9];
        let link = MockLink::new().reply(b"#a").reply(&frame_reply(&payload));
        let mut t = transport(&link);
        let mut camera = Camera::new();
        let config = test_config();

        camera.set_desired_mode(CaptureMode::Small);
        camera.capture(&mut t, &config).unwrap();
        assert_eq!(link.writes().len(), 2);

        camera.set_desired_mode(CaptureMode::Off);
        assert_eq!(camera.capture(&mut t, &config).unwrap(), Capture::Disabled);
        assert_eq!(camera.state(), CaptureState::Off);
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn test_mode_confirmation_then_capture() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let link = MockLink::new().reply(b"#c").reply(&frame_reply(&payload));
        let mut t = transport(&link);
        let mut camera = Camera::new();

        camera.set_desired_mode(CaptureMode::Large);
        let capture = camera.capture(&mut t, &test_config()).unwrap();

        assert_eq!(
            capture,
            Capture::Frame {
                declared_size: 1000,
                received: 1000
            }
        );
        assert_eq!(link.writes(), vec![vec![b'c'], vec![b'I']]);
        assert_eq!(camera.state(), CaptureState::Confirmed(CaptureMode::Large));
        assert!(camera.frame().is_complete());
        assert!(camera.frame().capacity() >= 1000);
        assert_eq!(camera.frame().to_vec(), payload);
        assert_eq!(camera.frame().captures(), 1);
    }

    #[test]
    fn test_mode_mismatch_keeps_confirmed_mode() {
        let link = MockLink::new().reply(b"#b");
        let mut t = transport(&link);
        let mut camera = Camera::new();

        camera.set_desired_mode(CaptureMode::Large);
        let err = camera.capture(&mut t, &test_config()).unwrap_err();

        assert!(matches!(err, SurveyorError::ProtocolMismatch { .. }));
        assert_eq!(camera.state().confirmed(), CaptureMode::Off);
        assert_eq!(camera.state().desired(), CaptureMode::Large);
        // No capture request after a failed confirmation
        assert_eq!(link.writes(), vec![vec![b'c']]);
    }

    #[test]
    fn test_bad_header_leaves_frame_untouched() {
        let first = [1u8, 2, 3];
        let link = MockLink::new()
            .reply(b"#a")
            .reply(&frame_reply(&first))
            .reply(b"##IMX3\x10\x00\x00\x00trailing");
        let mut t = transport(&link);
        let mut camera = Camera::new();
        let config = test_config();

        camera.set_desired_mode(CaptureMode::Small);
        camera.capture(&mut t, &config).unwrap();

        let err = camera.capture(&mut t, &config).unwrap_err();
        assert!(matches!(err, SurveyorError::ProtocolMismatch { .. }));
        assert_eq!(camera.frame().declared_size(), 3);
        assert_eq!(camera.frame().to_vec(), first);
        assert_eq!(link.discarded(), 8);
    }

    #[test]
    fn test_short_header_is_retried() {
        let payload = [9u8; 16];
        let link = MockLink::new()
            .reply(b"#a")
            .reply(b"##IM")
            .reply(b"")
            .reply(&frame_reply(&payload));
        let mut t = transport(&link);
        let mut camera = Camera::new();

        camera.set_desired_mode(CaptureMode::Small);
        let capture = camera.capture(&mut t, &test_config()).unwrap();

        assert_eq!(
            capture,
            Capture::Frame {
                declared_size: 16,
                received: 16
            }
        );
        assert_eq!(link.writes().len(), 4);
    }

    #[test]
    fn test_capture_abandoned_after_attempts() {
        let link = MockLink::new().reply(b"#a");
        let mut t = transport(&link);
        let mut camera = Camera::new();
        let config = DriverConfig {
            capture_attempts: 3,
            ..test_config()
        };

        camera.set_desired_mode(CaptureMode::Small);
        let err = camera.capture(&mut t, &config).unwrap_err();

        assert!(matches!(err, SurveyorError::CaptureAbandoned { attempts: 3 }));
        assert!(!err.is_fatal());
        // mode set + three capture requests
        assert_eq!(link.writes().len(), 4);
        assert_eq!(camera.frame().captures(), 0);
    }

    #[test]
    fn test_short_payload_keeps_declared_size() {
        let mut reply = header(100);
        reply.extend_from_slice(&[7u8; 40]);
        let link = MockLink::new().reply(b"#b").reply(&reply);
        let mut t = transport(&link);
        let mut camera = Camera::new();

        camera.set_desired_mode(CaptureMode::Medium);
        let capture = camera.capture(&mut t, &test_config()).unwrap();

        assert_eq!(
            capture,
            Capture::Frame {
                declared_size: 100,
                received: 40
            }
        );
        assert_eq!(camera.frame().declared_size(), 100);
        assert!(!camera.frame().is_complete());
        assert_eq!(camera.frame().to_vec(), vec![7u8; 40]);
    }

    #[test]
    fn test_frame_storage_grows_and_shrinks() {
        let big = vec![1u8; 4096];
        let small = vec![2u8; 10];
        let link = MockLink::new()
            .reply(b"#a")
            .reply(&frame_reply(&big))
            .reply(&frame_reply(&small));
        let mut t = transport(&link);
        let mut camera = Camera::new();
        let config = test_config();

        camera.set_desired_mode(CaptureMode::Small);
        camera.capture(&mut t, &config).unwrap();
        assert!(camera.frame().capacity() >= 4096);

        camera.capture(&mut t, &config).unwrap();
        assert!(camera.frame().capacity() >= 10);
        assert_eq!(camera.frame().to_vec(), small);
        assert_eq!(camera.frame().captures(), 2);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let link = MockLink::new().reply(b"#a").reply(&header(5_000_000));
        let mut t = transport(&link);
        let mut camera = Camera::new();

        camera.set_desired_mode(CaptureMode::Small);
        let err = camera.capture(&mut t, &test_config()).unwrap_err();

        assert!(matches!(err, SurveyorError::FrameTooLarge { declared: 5_000_000, .. }));
        assert_eq!(camera.frame().declared_size(), 0);
    }
}
