// SRV-1 serial command protocol
//
// Strictly half-duplex: one request, one bounded read, exact header checks.
//
//   Motor set     'M' left right duration     -> "#M"
//   Mode set      <mode code>                 -> '#' <mode code>
//   Capture       'I'                         -> "##IMJ" <res> <size:u32 LE>, then <size> bytes
//   Bounce IR     'B'                         -> "##BounceIR - " + 4 x 8 hex digits + "\n"
//   Version       'V'                         -> "##..." line ending in '\n'

use std::time::Duration;
use tracing::{debug, warn};

use super::error::{Result, SurveyorError};
use super::transport::{LineRead, SerialLink, TimedTransport};

/// Line speed of the radio link
pub const BAUD_RATE: u32 = 115_200;

/// Request opcodes
pub const CMD_VERSION: u8 = b'V';
pub const CMD_MOTOR: u8 = b'M';
pub const CMD_CAPTURE: u8 = b'I';
pub const CMD_BOUNCE_IR: u8 = b'B';

/// Acknowledgement prefix
pub const ACK: u8 = b'#';

pub const MOTOR_ACK: [u8; 2] = [ACK, CMD_MOTOR];

pub const IMAGE_HEADER: &[u8; 5] = b"##IMJ";
pub const IMAGE_RESPONSE_LEN: usize = 10;
/// Frame size bytes within the capture response
const IMAGE_SIZE_OFFSET: usize = 6;

pub const BOUNCE_IR_HEADER: &[u8; 13] = b"##BounceIR - ";
pub const BOUNCE_IR_RESPONSE_LEN: usize = 46;
const BOUNCE_IR_FIELD_OFFSETS: [usize; 4] = [13, 21, 29, 37];
const BOUNCE_IR_FIELD_LEN: usize = 8;

/// Duration byte meaning "run until told otherwise"
const RUN_INDEFINITELY: u8 = 0;

/// Build the 4-byte motor command. Wheel codes are sent as two's complement.
pub fn motor_command(left: i8, right: i8) -> [u8; 4] {
    [CMD_MOTOR, left as u8, right as u8, RUN_INDEFINITELY]
}

pub fn check_motor_ack(response: &[u8; 2]) -> Result<()> {
    if *response != MOTOR_ACK {
        return Err(SurveyorError::ProtocolMismatch {
            command: "motor",
            expected: MOTOR_ACK.to_vec(),
            received: response.to_vec(),
        });
    }
    Ok(())
}

pub fn check_mode_ack(response: &[u8; 2], mode_code: u8) -> Result<()> {
    let expected = [ACK, mode_code];
    if *response != expected {
        return Err(SurveyorError::ProtocolMismatch {
            command: "image mode",
            expected: expected.to_vec(),
            received: response.to_vec(),
        });
    }
    Ok(())
}

/// Validate the capture response header and return the declared frame size.
pub fn parse_image_header(response: &[u8; IMAGE_RESPONSE_LEN]) -> Result<u32> {
    if !response.starts_with(IMAGE_HEADER) {
        return Err(SurveyorError::ProtocolMismatch {
            command: "capture",
            expected: IMAGE_HEADER.to_vec(),
            received: response[..IMAGE_HEADER.len()].to_vec(),
        });
    }

    let size = &response[IMAGE_SIZE_OFFSET..IMAGE_RESPONSE_LEN];
    Ok(u32::from_le_bytes([size[0], size[1], size[2], size[3]]))
}

/// Validate the bounce IR response and return [front, left, back, right].
pub fn parse_bounce_ir(response: &[u8; BOUNCE_IR_RESPONSE_LEN]) -> Result<[u32; 4]> {
    if !response.starts_with(BOUNCE_IR_HEADER) {
        return Err(SurveyorError::ProtocolMismatch {
            command: "bounce IR",
            expected: BOUNCE_IR_HEADER.to_vec(),
            received: response[..BOUNCE_IR_HEADER.len()].to_vec(),
        });
    }

    let mut fields = [0u32; 4];
    for (field, &offset) in fields.iter_mut().zip(BOUNCE_IR_FIELD_OFFSETS.iter()) {
        let raw = &response[offset..offset + BOUNCE_IR_FIELD_LEN];
        *field = parse_hex_field(raw).ok_or_else(|| SurveyorError::ProtocolMismatch {
            command: "bounce IR",
            expected: b"8 hex digits".to_vec(),
            received: raw.to_vec(),
        })?;
    }
    Ok(fields)
}

fn parse_hex_field(raw: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(raw).ok()?;
    u32::from_str_radix(text.trim(), 16).ok()
}

/// Flush input after a desynchronizing failure and hand back the error.
///
/// A failing flush is itself an I/O error and is returned instead.
pub(crate) fn resync<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    err: SurveyorError,
) -> SurveyorError {
    match transport.flush_input() {
        Ok(flushed) => {
            warn!("{}; flushed {} bytes from input buffer", err, flushed);
            err
        }
        Err(flush_err) => flush_err,
    }
}

/// Send a request and read a fixed-size response within `timeout`.
pub fn exchange<L: SerialLink, const N: usize>(
    transport: &mut TimedTransport<L>,
    command: &'static str,
    request: &[u8],
    timeout: Duration,
) -> Result<[u8; N]> {
    transport.write(request)?;

    let mut response = [0u8; N];
    let received = transport.read_exact_within(&mut response, timeout)?;
    if received < N {
        let err = SurveyorError::Timeout {
            command,
            expected: N,
            received,
        };
        return Err(resync(transport, err));
    }

    debug!("{} response: {:02X?}", command, response);
    Ok(response)
}

// === Exchanges ===

/// Drive both wheels until the next motor command.
pub fn set_motors<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    left: i8,
    right: i8,
    timeout: Duration,
) -> Result<()> {
    debug!("Motor command: left={}, right={}", left, right);
    let response = exchange::<L, 2>(transport, "motor", &motor_command(left, right), timeout)?;
    check_motor_ack(&response).map_err(|e| resync(transport, e))
}

/// Ask the camera to switch resolution.
pub fn set_image_mode<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    mode_code: u8,
    timeout: Duration,
) -> Result<()> {
    let response = exchange::<L, 2>(transport, "image mode", &[mode_code], timeout)?;
    check_mode_ack(&response, mode_code).map_err(|e| resync(transport, e))
}

/// Request one frame; returns the declared payload size. The payload itself
/// follows on the line and is left for the caller to read.
pub fn request_image<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    timeout: Duration,
) -> Result<u32> {
    let response =
        exchange::<L, IMAGE_RESPONSE_LEN>(transport, "capture", &[CMD_CAPTURE], timeout)?;
    parse_image_header(&response).map_err(|e| resync(transport, e))
}

pub fn query_bounce_ir<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    timeout: Duration,
) -> Result<[u32; 4]> {
    let response =
        exchange::<L, BOUNCE_IR_RESPONSE_LEN>(transport, "bounce IR", &[CMD_BOUNCE_IR], timeout)?;
    parse_bounce_ir(&response).map_err(|e| resync(transport, e))
}

/// Query the firmware version line. Any failure here is a handshake failure.
pub fn query_version<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    max_len: usize,
    timeout: Duration,
) -> Result<String> {
    transport.write(&[CMD_VERSION])?;

    let line = match transport.read_line_within(max_len, timeout)? {
        LineRead::Complete(line) => line,
        LineRead::Truncated(partial) => {
            return Err(SurveyorError::Handshake {
                reason: format!("no newline within {} bytes ({} read)", max_len, partial.len()),
            });
        }
        LineRead::TimedOut(partial) => {
            return Err(SurveyorError::Handshake {
                reason: format!(
                    "version reply timed out after {} bytes: {:?}",
                    partial.len(),
                    String::from_utf8_lossy(&partial)
                ),
            });
        }
    };

    let text = String::from_utf8_lossy(&line);
    let version = text.strip_prefix("##").unwrap_or(&text).trim();
    Ok(version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srv1::transport::mock::MockLink;

    const SHORT: Duration = Duration::from_millis(10);

    fn transport(link: &MockLink) -> TimedTransport<MockLink> {
        TimedTransport::new(link.clone(), Duration::from_millis(1))
    }

    fn ir_response(fields: [&str; 4]) -> [u8; BOUNCE_IR_RESPONSE_LEN] {
        let mut text = String::from("##BounceIR - ");
        for f in fields {
            text.push_str(f);
        }
        text.push('\n');
        text.as_bytes().try_into().unwrap()
    }

    #[test]
    fn test_motor_command_layout() {
        assert_eq!(motor_command(50, -50), [b'M', 0x32, 0xCE, 0x00]);
        assert_eq!(motor_command(-127, 127), [b'M', 0x81, 0x7F, 0x00]);
    }

    #[test]
    fn test_motor_ack() {
        assert!(check_motor_ack(b"#M").is_ok());
        assert!(matches!(
            check_motor_ack(b"#I"),
            Err(SurveyorError::ProtocolMismatch { command: "motor", .. })
        ));
    }

    #[test]
    fn test_mode_ack_must_echo_code() {
        assert!(check_mode_ack(b"#b", b'b').is_ok());
        assert!(check_mode_ack(b"#c", b'b').is_err());
        assert!(check_mode_ack(b"Mb", b'b').is_err());
    }

    #[test]
    fn test_image_header_little_endian_size() {
        let response = *b"##IMJ3\x10\x27\x00\x00";
        assert_eq!(parse_image_header(&response).unwrap(), 10_000);

        let response = *b"##IMJ5\x01\x02\x03\x04";
        assert_eq!(
            parse_image_header(&response).unwrap(),
            1 + 2 * 256 + 3 * 256 * 256 + 4 * 256 * 256 * 256
        );
    }

    #[test]
    fn test_image_header_rejects_wrong_prefix() {
        let response = *b"##IMX3\x10\x27\x00\x00";
        assert!(matches!(
            parse_image_header(&response),
            Err(SurveyorError::ProtocolMismatch { command: "capture", .. })
        ));
    }

    #[test]
    fn test_bounce_ir_fields() {
        let response = ir_response(["0000000A", "00000014", "0000001E", "00000028"]);
        assert_eq!(parse_bounce_ir(&response).unwrap(), [10, 20, 30, 40]);

        let response = ir_response(["000000ff", "00000000", "FFFFFFFF", "00001000"]);
        assert_eq!(
            parse_bounce_ir(&response).unwrap(),
            [255, 0, u32::MAX, 4096]
        );
    }

    #[test]
    fn test_bounce_ir_rejects_bad_header_and_digits() {
        let mut response = ir_response(["0000000A", "00000014", "0000001E", "00000028"]);
        response[2] = b'b';
        assert!(parse_bounce_ir(&response).is_err());

        let response = ir_response(["0000000A", "000000G4", "0000001E", "00000028"]);
        assert!(parse_bounce_ir(&response).is_err());
    }

    #[test]
    fn test_set_motors_exchange() {
        let link = MockLink::new().reply(b"#M");
        let mut t = transport(&link);

        set_motors(&mut t, 30, -30, SHORT).unwrap();
        assert_eq!(link.writes(), vec![vec![b'M', 30, 226, 0]]);
    }

    #[test]
    fn test_short_response_is_timeout_and_flushes() {
        let link = MockLink::new().reply(b"#");
        let mut t = transport(&link);

        let err = set_motors(&mut t, 0, 0, SHORT).unwrap_err();
        assert!(matches!(
            err,
            SurveyorError::Timeout {
                expected: 2,
                received: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_mismatch_flushes_trailing_bytes() {
        let link = MockLink::new().reply(b"#Xjunk");
        let mut t = transport(&link);

        let err = set_motors(&mut t, 0, 0, SHORT).unwrap_err();
        assert!(matches!(err, SurveyorError::ProtocolMismatch { .. }));
        assert_eq!(link.discarded(), 4);
    }

    #[test]
    fn test_query_version_strips_prefix() {
        let link = MockLink::new().reply(b"##Version - SRV-1 Blackfin 07:26:16 - Mar  3 2009\n");
        let mut t = transport(&link);

        let version = query_version(&mut t, 256, SHORT).unwrap();
        assert_eq!(version, "Version - SRV-1 Blackfin 07:26:16 - Mar  3 2009");
        assert_eq!(link.writes(), vec![vec![b'V']]);
    }

    #[test]
    fn test_query_version_failures_are_handshake_errors() {
        let link = MockLink::new().reply(b"##Vers");
        let mut t = transport(&link);
        assert!(matches!(
            query_version(&mut t, 256, SHORT),
            Err(SurveyorError::Handshake { .. })
        ));

        let link = MockLink::new().reply(&[b'x'; 64]);
        let mut t = transport(&link);
        assert!(matches!(
            query_version(&mut t, 16, SHORT),
            Err(SurveyorError::Handshake { .. })
        ));
    }
}
