//! Lines exposed through the Linux sysfs GPIO interface.
//!
//! A line is claimed by writing its number to `export`, which makes the
//! kernel create `gpioN/direction` and `gpioN/value`. Both attribute files
//! stay open for the whole session: reopening them per sample is far too
//! slow for the sensor's microsecond pulses.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};
use log::{debug, warn};
use thiserror::Error;

use crate::line::{Direction, Gpio, Line};

/// Where the kernel mounts the GPIO class.
pub const DEFAULT_ROOT: &str = "/sys/class/gpio";

/// Pause between exporting a line and opening its attributes.
///
/// udev needs this long to fix up permissions on the new files; without it
/// unprivileged users frequently fail to open them.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Errors from the sysfs GPIO files.
#[derive(Debug, Error)]
pub enum SysfsError {
    #[error("failed to {action} line {number} via {}: {source}", path.display())]
    Io {
        action: &'static str,
        number: u32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {number} is not acquired")]
    NotAcquired { number: u32 },
    #[error("unexpected value {value:?} read from line {number}")]
    InvalidValue { number: u32, value: String },
}

impl digital::Error for SysfsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Factory for [`SysfsLine`]s below a sysfs GPIO root.
#[derive(Clone, Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    settle_delay: Duration,
}

impl SysfsGpio {
    /// Lines under `/sys/class/gpio` with the default settle delay.
    pub fn new() -> Self {
        SysfsGpio {
            root: PathBuf::from(DEFAULT_ROOT),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Uses `root` instead of `/sys/class/gpio`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Overrides the pause after export.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Directory holding `export`, `unexport` and the `gpioN` folders.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pause between exporting a line and opening its attributes.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for SysfsGpio {
    type Line = SysfsLine;

    fn line(&mut self, number: u32) -> SysfsLine {
        SysfsLine {
            number,
            root: self.root.clone(),
            settle_delay: self.settle_delay,
            exported: false,
            direction: None,
            value: None,
        }
    }
}

/// One sysfs GPIO line with its `direction` and `value` files.
#[derive(Debug)]
pub struct SysfsLine {
    number: u32,
    root: PathBuf,
    settle_delay: Duration,
    exported: bool,
    direction: Option<File>,
    value: Option<File>,
}

impl SysfsLine {
    /// Kernel GPIO number of this line.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Whether both attribute files are open.
    pub fn is_acquired(&self) -> bool {
        self.direction.is_some() && self.value.is_some()
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.root.join(format!("gpio{}", self.number)).join(name)
    }

    /// Writes the line number to `export` or `unexport`.
    fn write_control(&self, name: &'static str) -> Result<(), SysfsError> {
        let path = self.root.join(name);
        OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut file| file.write_all(self.number.to_string().as_bytes()))
            .map_err(io_error(name, self.number, path))
    }

    fn open_attributes(&mut self) -> Result<(), SysfsError> {
        let path = self.attribute("direction");
        let direction = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(io_error("open direction of", self.number, path))?;

        let path = self.attribute("value");
        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(io_error("open value of", self.number, path))?;

        self.direction = Some(direction);
        self.value = Some(value);
        Ok(())
    }

    fn value_file(&self) -> Result<&File, SysfsError> {
        self.value.as_ref().ok_or(SysfsError::NotAcquired {
            number: self.number,
        })
    }

    fn write_value(&mut self, value: &[u8]) -> Result<(), SysfsError> {
        self.value_file()?
            .write_all_at(value, 0)
            .map_err(io_error("write value of", self.number, self.attribute("value")))
    }

    fn read_value(&mut self) -> Result<bool, SysfsError> {
        let mut buf = [0u8; 3];
        // Hot path of the capture loop: build the error path only on failure.
        let read = self
            .value_file()?
            .read_at(&mut buf, 0)
            .map_err(|source| SysfsError::Io {
                action: "read value of",
                number: self.number,
                path: self.attribute("value"),
                source,
            })?;

        parse_level(&buf[..read]).ok_or_else(|| SysfsError::InvalidValue {
            number: self.number,
            value: String::from_utf8_lossy(&buf[..read]).into_owned(),
        })
    }
}

fn io_error(
    action: &'static str,
    number: u32,
    path: PathBuf,
) -> impl FnOnce(io::Error) -> SysfsError {
    move |source| SysfsError::Io {
        action,
        number,
        path,
        source,
    }
}

/// Parses the content of a `value` file, which may end with a newline.
fn parse_level(raw: &[u8]) -> Option<bool> {
    match raw {
        [b'0'] | [b'0', b'\n' | b'\0', ..] => Some(false),
        [b'1'] | [b'1', b'\n' | b'\0', ..] => Some(true),
        _ => None,
    }
}

impl ErrorType for SysfsLine {
    type Error = SysfsError;
}

impl InputPin for SysfsLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.read_value()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.read_value().map(|high| !high)
    }
}

impl OutputPin for SysfsLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_value(b"0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_value(b"1")
    }
}

impl Line for SysfsLine {
    /// Exports the line, waits for the settle delay and opens its files.
    ///
    /// On failure everything set up so far is undone before returning.
    fn acquire(&mut self) -> Result<(), Self::Error> {
        if self.is_acquired() {
            return Ok(());
        }
        self.write_control("export")?;
        self.exported = true;
        debug!("exported line {}", self.number);

        thread::sleep(self.settle_delay);

        if let Err(err) = self.open_attributes() {
            if let Err(cleanup) = self.release() {
                warn!("failed to roll back export of line {}: {cleanup}", self.number);
            }
            return Err(err);
        }
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error> {
        let raw: &[u8] = match direction {
            Direction::Input => b"in",
            Direction::Output => b"out",
        };
        let path = self.attribute("direction");
        self.direction
            .as_ref()
            .ok_or(SysfsError::NotAcquired {
                number: self.number,
            })?
            .write_all_at(raw, 0)
            .map_err(io_error("set direction of", self.number, path))
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.direction = None;
        self.value = None;
        if !self.exported {
            return Ok(());
        }
        self.write_control("unexport")?;
        self.exported = false;
        debug!("unexported line {}", self.number);
        Ok(())
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("failed to release line {}: {err}", self.number);
        }
    }
}
