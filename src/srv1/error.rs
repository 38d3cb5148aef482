// Error taxonomy for the SRV-1 link
//
// Io / Port / Handshake / NotConnected end the session. Everything else is a
// per-call failure the caller can retry on its next cycle.

/// Error types for SRV-1 communication
#[derive(Debug, thiserror::Error)]
pub enum SurveyorError {
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Unexpected response to {command}: expected {expected:02X?}, got {received:02X?}")]
    ProtocolMismatch {
        command: &'static str,
        expected: Vec<u8>,
        received: Vec<u8>,
    },

    #[error("Timeout waiting for {command} response: got {received} of {expected} bytes")]
    Timeout {
        command: &'static str,
        expected: usize,
        received: usize,
    },

    #[error("Image capture abandoned after {attempts} attempts")]
    CaptureAbandoned { attempts: u32 },

    #[error("Declared frame size {declared} exceeds limit of {limit} bytes")]
    FrameTooLarge { declared: u32, limit: u32 },

    #[error("Not connected to robot")]
    NotConnected,
}

impl SurveyorError {
    /// Whether the session must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SurveyorError::Io(_)
                | SurveyorError::Port(_)
                | SurveyorError::Handshake { .. }
                | SurveyorError::NotConnected
        )
    }
}

pub type Result<T> = std::result::Result<T, SurveyorError>;
