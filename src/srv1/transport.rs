// Deadline-bounded serial I/O
//
// The port is opened once with a short read timeout and never toggled between
// blocking modes. Every read here polls until either the requested byte count
// arrives or the caller's deadline expires; expiry is a short count, not an error.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::Result;

/// Byte stream the transport polls. Implemented for real serial ports and
/// for the in-memory link used in tests.
pub trait SerialLink: Read + Write {
    /// Number of bytes waiting in the input buffer.
    fn pending_input(&self) -> io::Result<u32>;

    /// Drop everything waiting in the input buffer.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn pending_input(&self) -> io::Result<u32> {
        SerialPort::bytes_to_read(&**self).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Result of a line-oriented read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// Newline seen; bytes include it
    Complete(Vec<u8>),
    /// Length guard hit before any newline
    Truncated(Vec<u8>),
    /// Deadline expired before any newline
    TimedOut(Vec<u8>),
}

/// Timed transport over a serial link
pub struct TimedTransport<L> {
    link: L,
    poll_interval: Duration,
}

impl<L: SerialLink> TimedTransport<L> {
    pub fn new(link: L, poll_interval: Duration) -> Self {
        Self {
            link,
            poll_interval,
        }
    }

    /// Write all bytes, returning how many were sent.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.link.write_all(bytes)?;
        self.link.flush()?;
        Ok(bytes.len())
    }

    /// Fill `buf` within `deadline`.
    ///
    /// Returns the number of bytes received. Anything less than `buf.len()`
    /// means the deadline expired; the bytes that did arrive are at the start
    /// of `buf`. Only hard I/O failures are returned as errors.
    pub fn read_exact_within(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize> {
        let started = Instant::now();
        let mut received = 0;

        while received < buf.len() {
            match self.link.read(&mut buf[received..]) {
                Ok(n) => received += n,
                Err(e) if is_idle(&e) => {}
                Err(e) => return Err(e.into()),
            }

            if received == buf.len() {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                debug!(
                    "Read timed out after {}us: {} of {} bytes",
                    elapsed.as_micros(),
                    received,
                    buf.len()
                );
                break;
            }

            thread::sleep(self.poll_interval);
        }

        Ok(received)
    }

    /// Read one line, byte by byte, stopping at `\n`, at `max_len` bytes, or
    /// when `deadline` expires.
    pub fn read_line_within(&mut self, max_len: usize, deadline: Duration) -> Result<LineRead> {
        let started = Instant::now();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        while line.len() < max_len {
            let remaining = deadline.saturating_sub(started.elapsed());
            if self.read_exact_within(&mut byte, remaining)? == 0 {
                return Ok(LineRead::TimedOut(line));
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return Ok(LineRead::Complete(line));
            }
        }

        Ok(LineRead::Truncated(line))
    }

    /// Discard pending input, returning how many bytes were dropped.
    pub fn flush_input(&mut self) -> Result<u32> {
        let pending = self.link.pending_input()?;
        self.link.discard_input()?;
        Ok(pending)
    }

    pub fn link(&self) -> &L {
        &self.link
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}
