use embedded_hal::delay::DelayNs;
use embedded_hal::digital::ErrorType;
use log::{debug, trace, warn};

use crate::capture::{CaptureConfig, PulseCapture, PulseTrain};
use crate::decode::{Reading, SensorType, decode};
use crate::error::DhtError;
use crate::line::{Direction, Gpio, Level, Line};
use crate::priority::{PriorityScope, Scheduler, ThreadScheduler};
use crate::sysfs::{SysfsError, SysfsGpio};
use crate::timing::{Clock, MonotonicClock, StdDelay};

/// How long the line is driven high to wake the sensor.
pub const WAKE_HOLD_MS: u32 = 500;

/// How long the line is pulled low to request a measurement.
pub const DIAL_HOLD_MS: u32 = 18;

/// Inactivity after which the sensor is considered done talking.
pub const CAPTURE_TIMEOUT_MS: u32 = 10;

/// Pause between two attempts of [`Dht::read_with_retry`].
///
/// The sensor needs more than a second between measurements.
pub const RETRY_PAUSE_MS: u32 = 1_500;

/// Half period of [`Dht::blink`].
pub const BLINK_PAUSE_MS: u32 = 100;

/// Error type of the lines handed out by `G`.
pub type LineError<G> = <<G as Gpio>::Line as ErrorType>::Error;

/// Driver dialing DHT sensors attached to the lines of `G`.
///
/// Each call claims the line for its own duration only, so one driver can
/// serve sensors on several lines, one at a time.
pub struct Dht<G, S, D, C> {
    gpio: G,
    scheduler: S,
    delay: D,
    clock: C,
    capture: PulseCapture,
}

impl Dht<SysfsGpio, ThreadScheduler, StdDelay, MonotonicClock> {
    /// Driver for `/sys/class/gpio` with real-time priority boosting.
    pub fn sysfs() -> Self {
        Dht::new(
            SysfsGpio::new(),
            ThreadScheduler,
            StdDelay,
            MonotonicClock::new(),
        )
    }
}

/// Dials the sensor on sysfs line `number` and returns its raw response.
///
/// With `boost_priority` the thread runs under `SCHED_FIFO` during the
/// sequence when permitted; otherwise, or when elevation is refused, the
/// capture runs at normal priority with more jitter.
pub fn run_dial_sequence(
    number: u32,
    boost_priority: bool,
) -> Result<PulseTrain, DhtError<SysfsError>> {
    Dht::sysfs().dial(number, boost_priority)
}

impl<G, S, D, C> Dht<G, S, D, C>
where
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
    C: Clock,
{
    /// Creates a new driver.
    ///
    /// # Arguments
    ///
    /// * `gpio` - Source of the lines sensors are attached to.
    /// * `scheduler` - Used to raise the thread priority while capturing.
    /// * `delay` - Blocking delay provider for the wake and dial pulses.
    /// * `clock` - Monotonic clock timestamping the captured edges.
    pub fn new(gpio: G, scheduler: S, delay: D, clock: C) -> Self {
        Dht {
            gpio,
            scheduler,
            delay,
            clock,
            capture: PulseCapture::new(),
        }
    }

    /// Replaces the capture tuning.
    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture = PulseCapture::with_config(config);
        self
    }

    /// Wakes the sensor on line `number` and captures its response.
    ///
    /// Drives the line high for 500 ms and low for 18 ms, switches it to
    /// input and records every edge until the line has been quiet for
    /// 10 ms. The line is released and the priority restored on every
    /// path out of this function.
    ///
    /// # Errors
    ///
    /// The error of the first step that failed. Failures while cleaning up
    /// after it are only logged. A failed release after a successful
    /// capture is returned as `DhtError::ResourceUnavailable`. Priority
    /// elevation and restoration failures never fail the call.
    pub fn dial(
        &mut self,
        number: u32,
        boost_priority: bool,
    ) -> Result<PulseTrain, DhtError<LineError<G>>> {
        let Dht {
            gpio,
            scheduler,
            delay,
            clock,
            capture,
        } = self;

        let mut scope = PriorityScope::new(scheduler);
        if boost_priority && let Err(err) = scope.elevate() {
            warn!("capturing line {number} at normal priority: {err}");
        }

        let mut line = gpio.line(number);
        let outcome = wake_and_capture(&mut line, delay, clock, capture);
        let released = line.release();

        if let Err(err) = scope.exit() {
            warn!("failed to restore default priority: {err}");
        }

        let train = settle(number, outcome, released)?;
        trace!("line {number} pulses: {:?}", train.to_flat());
        Ok(train)
    }

    /// Dials the sensor and decodes its response.
    pub fn read(
        &mut self,
        sensor: SensorType,
        number: u32,
        boost_priority: bool,
    ) -> Result<Reading, DhtError<LineError<G>>> {
        let train = self.dial(number, boost_priority)?;
        Ok(decode(sensor, &train)?)
    }

    /// Like [`read`](Self::read), retrying up to `retries` times.
    ///
    /// # Returns
    ///
    /// * `Ok((Reading, retried))` with the number of failed attempts before
    ///   the successful one.
    /// * `Err(DhtError)` of the last attempt once retries are exhausted.
    pub fn read_with_retry(
        &mut self,
        sensor: SensorType,
        number: u32,
        boost_priority: bool,
        retries: u32,
    ) -> Result<(Reading, u32), DhtError<LineError<G>>> {
        let mut retried = 0;
        loop {
            match self.read(sensor, number, boost_priority) {
                Ok(reading) => return Ok((reading, retried)),
                Err(err) if retried < retries => {
                    warn!("{sensor} on line {number}: {err}, retrying");
                    retried += 1;
                    self.delay.delay_ms(RETRY_PAUSE_MS);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Toggles line `number` high and low `times` times.
    ///
    /// Meant for checking the wiring with a LED on the line.
    pub fn blink(&mut self, number: u32, times: u32) -> Result<(), DhtError<LineError<G>>> {
        let mut line = self.gpio.line(number);
        let outcome = blink_line(&mut line, &mut self.delay, times);
        let released = line.release();
        settle(number, outcome, released)
    }
}

fn wake_and_capture<L, D, C>(
    line: &mut L,
    delay: &mut D,
    clock: &mut C,
    capture: &mut PulseCapture,
) -> Result<PulseTrain, DhtError<L::Error>>
where
    L: Line,
    D: DelayNs,
    C: Clock,
{
    line.acquire().map_err(DhtError::ResourceUnavailable)?;
    debug!("line acquired, sending wake pulse");

    configure(line, |line| line.set_direction(Direction::Output))?;
    configure(line, |line| line.write_level(Level::High))?;
    delay.delay_ms(WAKE_HOLD_MS);

    configure(line, |line| line.write_level(Level::Low))?;
    delay.delay_ms(DIAL_HOLD_MS);

    configure(line, |line| line.set_direction(Direction::Input))?;
    debug!("dialed, capturing response");

    capture.capture_until_timeout(line, clock, CAPTURE_TIMEOUT_MS)
}

fn blink_line<L, D>(line: &mut L, delay: &mut D, times: u32) -> Result<(), DhtError<L::Error>>
where
    L: Line,
    D: DelayNs,
{
    line.acquire().map_err(DhtError::ResourceUnavailable)?;
    configure(line, |line| line.set_direction(Direction::Output))?;

    for _ in 0..times {
        configure(line, |line| line.set_high())?;
        delay.delay_ms(BLINK_PAUSE_MS);
        configure(line, |line| line.set_low())?;
        delay.delay_ms(BLINK_PAUSE_MS);
    }
    Ok(())
}

fn configure<L, F>(line: &mut L, step: F) -> Result<(), DhtError<L::Error>>
where
    L: Line,
    F: FnOnce(&mut L) -> Result<(), L::Error>,
{
    step(line).map_err(DhtError::ConfigurationFailed)
}

/// Picks the result of a session from its outcome and the release that
/// followed it. The earlier error wins.
fn settle<T, E: core::fmt::Debug>(
    number: u32,
    outcome: Result<T, DhtError<E>>,
    released: Result<(), E>,
) -> Result<T, DhtError<E>> {
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(DhtError::ResourceUnavailable(err)),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            warn!("failed to release line {number} after error: {cleanup:?}");
            Err(err)
        }
    }
}
