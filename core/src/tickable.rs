use anyhow::Result;

/// Representation of X amount of virtual time, in nanoseconds.
pub type Ticks = u64;

pub const TICKS_PER_USEC: Ticks = 1_000;
pub const TICKS_PER_MSEC: Ticks = 1_000 * TICKS_PER_USEC;
pub const TICKS_PER_SECOND: Ticks = 1_000 * TICKS_PER_MSEC;

/// A device driven by the external virtual-time scheduler.
///
/// The scheduler calls `tick` with the virtual time that elapsed since the
/// previous call. The device catches up and returns the delay after which it
/// wants to be called again. Nothing here may block the host thread.
pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
