//! Contracts of the hardware collaborators the core drives.
//!
//! The register bus is shared with the alert handler and must never block; the
//! remaining collaborators are only touched from the main loop.

use crate::error::PMError;
use std::future::Future;

/// Request/response access to the power monitor registers.
pub trait RegisterBus {
    /// Clock out `buf.len()` bytes for `addr`. `buf[0]` receives the turnaround
    /// byte, the register contents follow MSB first. A faulty bus yields stale data.
    fn read(&mut self, addr: u8, buf: &mut [u8]);

    fn write(&mut self, addr: u8, value: u16);
}

/// Enable/disable of the alert interrupt line.
pub trait AlertLine {
    fn enable_alert(&mut self);
    fn disable_alert(&mut self);
}

/// Bounded hardware waits on the main loop.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32) -> impl Future<Output = ()> + Send;
}

/// Battery simulator DAC, its output switch and the matching status LED.
pub trait BatterySim {
    fn write_code(&mut self, code: u16);
    fn set_output(&mut self, enabled: bool);
}

/// IO expander switch routing the source terminals to the monitor's bus input.
pub trait VoltageSense {
    fn set_voltage_sense(&mut self, enabled: bool);
}

/// Everything the main loop drives besides the register bus.
pub trait Board: AlertLine + Delay + BatterySim + VoltageSense {}

impl<T: AlertLine + Delay + BatterySim + VoltageSense> Board for T {}

/// Host link. The returned future completes once the frame has been handed off,
/// the caller must not reuse the frame before that.
pub trait Transport {
    fn send_response(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), PMError>> + Send;
    fn send_report(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), PMError>> + Send;
}
