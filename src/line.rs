//! Contract between the dial sequence and a digital I/O line.
//!
//! Reading and driving the level goes through the [`InputPin`] and
//! [`OutputPin`] traits of `embedded-hal`. What `embedded-hal` does not
//! cover (claiming the line, switching it between input and output, giving
//! it back) lives in [`Line`].

use embedded_hal::digital::{InputPin, OutputPin, PinState};

/// Binary voltage state of a line.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Returns the opposite level.
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    /// Numeric form used by the flat pulse train: `0` or `1`.
    pub fn as_bit(self) -> u32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        }
    }
}

impl From<PinState> for Level {
    fn from(state: PinState) -> Self {
        match state {
            PinState::Low => Level::Low,
            PinState::High => Level::High,
        }
    }
}

/// Whether the line is sampled or driven.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A reconfigurable digital line owned by one dial sequence at a time.
///
/// A line is either fully acquired or fully released. An `acquire` that
/// fails must roll back whatever it managed to set up, and `release` must
/// be safe to call in any state, any number of times.
///
/// `is_high` is called in a tight loop during capture, so it must sample
/// the hardware on every call and never return a cached value.
pub trait Line: InputPin + OutputPin {
    /// Claims the line and opens whatever access handles sampling needs.
    fn acquire(&mut self) -> Result<(), Self::Error>;

    /// Switches the line between input and output.
    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error>;

    /// Gives the line back. Idempotent.
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Samples the current level.
    fn read_level(&mut self) -> Result<Level, Self::Error> {
        self.is_high().map(Level::from)
    }

    /// Drives the line to `level`.
    fn write_level(&mut self, level: Level) -> Result<(), Self::Error> {
        self.set_state(level.into())
    }
}

/// Source of [`Line`] handles, addressed by line number.
pub trait Gpio {
    type Line: Line;

    /// Returns an unacquired handle for line `number`.
    fn line(&mut self, number: u32) -> Self::Line;
}

impl<G: Gpio + ?Sized> Gpio for &mut G {
    type Line = G::Line;

    fn line(&mut self, number: u32) -> Self::Line {
        (**self).line(number)
    }
}
