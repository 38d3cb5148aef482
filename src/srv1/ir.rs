// Bounce IR beacons: four raw range codes, front/left/back/right

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::Result;
use super::protocol;
use super::transport::{SerialLink, TimedTransport};

/// Raw range codes from the four IR beacons, in protocol order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrReadings {
    pub front: u32,
    pub left: u32,
    pub back: u32,
    pub right: u32,
}

impl IrReadings {
    pub fn new(front: u32, left: u32, back: u32, right: u32) -> Self {
        Self {
            front,
            left,
            back,
            right,
        }
    }

    /// Returns readings as array [front, left, back, right]
    pub fn as_array(&self) -> [u32; 4] {
        [self.front, self.left, self.back, self.right]
    }

    /// Estimated distances in cm, same order as [`as_array`](Self::as_array)
    pub fn distances(&self) -> [f64; 4] {
        self.as_array().map(range_to_distance)
    }
}

impl From<[u32; 4]> for IrReadings {
    fn from([front, left, back, right]: [u32; 4]) -> Self {
        Self::new(front, left, back, right)
    }
}

/// Approximate distance (cm) for a raw IR range code.
///
/// Third order polynomial fit of measured data. Only meaningful over the
/// codes the beacons actually report.
pub fn range_to_distance(code: u32) -> f64 {
    let x = f64::from(code);
    -6.0333e-5 * x * x * x + 1.2986e-2 * x * x - 9.6280e-1 * x + 4.3082e1
}

/// Query the beacons once.
pub fn query<L: SerialLink>(
    transport: &mut TimedTransport<L>,
    timeout: Duration,
) -> Result<IrReadings> {
    protocol::query_bounce_ir(transport, timeout).map(IrReadings::from)
}
