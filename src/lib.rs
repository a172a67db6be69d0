//! DHT11/DHT22 Sensor Driver for Linux GPIO lines
//!
//! This crate wakes a DHT-class temperature and humidity sensor over a
//! single digital line and captures its response as a raw pulse train:
//! the sequence of line levels and how long each one lasted, with
//! microsecond resolution. The pulse train can then be decoded into a
//! [`Reading`].
//!
//! # Features
//! - Blocking synchronous API, one dial sequence per call
//! - Busy-poll edge capture bounded by an inactivity timeout and a fixed
//!   transition capacity
//! - Optional real-time (`SCHED_FIFO`) priority while capturing
//! - Lines from the sysfs GPIO interface, or any type implementing [`Line`]
//!
//! # Dependencies
//! Line access is expressed with the following `embedded-hal` traits:
//! - [`InputPin`] and [`OutputPin`] for sampling and driving the line
//! - [`DelayNs`] for the wake and dial pulses
//!
//! # Optional Features
//! - `defmt`: Implements `defmt::Format` for logging support
//! - `cli`: Builds the `dht-read` command line tool
//!
//! # Example
//!
//! ```no_run
//! use dht_sysfs::{Dht, SensorType};
//!
//! let mut dht = Dht::sysfs();
//! let reading = dht.read(SensorType::Dht22, 4, true)?;
//! println!("{:.1}C {:.1}%", reading.temperature, reading.relative_humidity);
//! # Ok::<(), dht_sysfs::DhtError<dht_sysfs::sysfs::SysfsError>>(())
//! ```
//!
//! [`InputPin`]: embedded_hal::digital::InputPin
//! [`OutputPin`]: embedded_hal::digital::OutputPin
//! [`DelayNs`]: embedded_hal::delay::DelayNs

pub mod capture;
pub mod decode;
pub mod dial;
pub mod error;
pub mod line;
pub mod priority;
pub mod sysfs;
pub mod timing;

#[cfg(test)]
mod mock;

pub use capture::{CaptureConfig, Pulse, PulseCapture, PulseTrain};
pub use decode::{Reading, SensorType};
pub use dial::{Dht, run_dial_sequence};
pub use error::DhtError;
pub use line::{Direction, Gpio, Level, Line};
