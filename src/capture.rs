//! Edge-triggered busy-poll capture of a line's pulse train.

use embedded_hal::digital::InputPin;
use log::trace;
use thiserror::Error;

use crate::error::DhtError;
use crate::line::Level;
use crate::timing::Clock;

/// Default maximum number of recorded levels per capture.
///
/// A DHT response is under a hundred pulses; anything close to this limit
/// is electrical noise.
pub const DEFAULT_CAPACITY: usize = 16_000;

/// Default number of unchanged samples between two timeout checks.
pub const DEFAULT_IDLE_CHECK_INTERVAL: u32 = 20;

/// One level of a pulse train and how long the line held it.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pulse {
    /// Level the line held.
    pub level: Level,
    /// How long it was held, in microseconds.
    pub duration_us: u32,
}

impl Pulse {
    /// Creates a pulse of `level` lasting `duration_us`.
    pub fn new(level: Level, duration_us: u32) -> Self {
        Pulse { level, duration_us }
    }
}

/// Reasons a sequence of pulses is not a pulse train.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TrainError {
    #[error("pulse train is empty")]
    Empty,
    #[error("flat pulse train has odd length {0}")]
    OddLength(usize),
    #[error("invalid level {value} at pulse {index}")]
    InvalidLevel { index: usize, value: u32 },
    #[error("level repeats at pulse {index}")]
    RepeatedLevel { index: usize },
}

/// Chronological `(level, duration)` record of one capture.
///
/// Consecutive pulses always have different levels. The last duration is
/// the capture timeout rather than a measured interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseTrain {
    pulses: Vec<Pulse>,
}

impl PulseTrain {
    /// Validates that `pulses` is non-empty and alternates.
    pub fn new(pulses: Vec<Pulse>) -> Result<Self, TrainError> {
        if pulses.is_empty() {
            return Err(TrainError::Empty);
        }
        if let Some(index) = pulses
            .windows(2)
            .position(|pair| pair[0].level == pair[1].level)
        {
            return Err(TrainError::RepeatedLevel { index: index + 1 });
        }
        Ok(PulseTrain { pulses })
    }

    /// Parses the flat `[level, duration, level, duration, ...]` form.
    pub fn from_flat(flat: &[u32]) -> Result<Self, TrainError> {
        if flat.len() % 2 != 0 {
            return Err(TrainError::OddLength(flat.len()));
        }
        let pulses = flat
            .chunks_exact(2)
            .enumerate()
            .map(|(index, pair)| {
                let level = match pair[0] {
                    0 => Level::Low,
                    1 => Level::High,
                    value => return Err(TrainError::InvalidLevel { index, value }),
                };
                Ok(Pulse::new(level, pair[1]))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pulses)
    }

    /// Flat form: level (`0`/`1`) and duration in microseconds, interleaved.
    pub fn to_flat(&self) -> Vec<u32> {
        self.pulses
            .iter()
            .flat_map(|pulse| [pulse.level.as_bit(), pulse.duration_us])
            .collect()
    }

    /// Pulses in the order they were seen.
    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    /// Levels only, without durations.
    pub fn levels(&self) -> impl Iterator<Item = Level> + '_ {
        self.pulses.iter().map(|pulse| pulse.level)
    }

    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Always `false`: a pulse train holds at least the initial level.
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// The final pulse, whose duration is the capture timeout.
    pub fn last(&self) -> Option<&Pulse> {
        self.pulses.last()
    }

    /// Consumes the train, returning its pulses.
    pub fn into_pulses(self) -> Vec<Pulse> {
        self.pulses
    }
}

impl<'a> IntoIterator for &'a PulseTrain {
    type Item = &'a Pulse;
    type IntoIter = std::slice::Iter<'a, Pulse>;

    fn into_iter(self) -> Self::IntoIter {
        self.pulses.iter()
    }
}

/// Tuning of the capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Maximum number of recorded levels, i.e. transitions plus one.
    pub capacity: usize,
    /// Unchanged samples between two reads of the clock.
    pub idle_check_interval: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            capacity: DEFAULT_CAPACITY,
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
        }
    }
}

/// Pulse capture engine.
///
/// Keeps a scratch buffer sized to the configured capacity so the polling
/// loop never allocates. One engine serves one line at a time.
pub struct PulseCapture {
    config: CaptureConfig,
    scratch: Vec<Pulse>,
}

impl PulseCapture {
    /// Engine with the default capacity and idle check interval.
    pub fn new() -> Self {
        Self::with_config(CaptureConfig::default())
    }

    /// Engine tuned by `config`. A capacity of zero is raised to one.
    pub fn with_config(config: CaptureConfig) -> Self {
        let config = CaptureConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        PulseCapture {
            config,
            scratch: Vec::with_capacity(config.capacity),
        }
    }

    /// Tuning in effect, after clamping.
    pub fn config(&self) -> CaptureConfig {
        self.config
    }

    /// Samples `line` until it has not changed for `timeout_ms`.
    ///
    /// Every edge is timestamped as soon as it is seen; the clock is only
    /// consulted for the timeout after `idle_check_interval` unchanged
    /// samples. The last pulse gets exactly `timeout_ms` as its duration.
    ///
    /// # Errors
    ///
    /// * `DhtError::ReadFailed` if any sample fails. Nothing captured so far
    ///   is returned.
    /// * `DhtError::CaptureOverflow` if the line toggles more often than
    ///   the capacity allows.
    pub fn capture_until_timeout<P, C>(
        &mut self,
        line: &mut P,
        clock: &mut C,
        timeout_ms: u32,
    ) -> Result<PulseTrain, DhtError<P::Error>>
    where
        P: InputPin,
        C: Clock,
    {
        let timeout_us = u64::from(timeout_ms) * 1_000;
        let capacity = self.config.capacity;
        let scratch = &mut self.scratch;
        scratch.clear();

        let mut last_level = sample(line)?;
        let mut last_edge = clock.now_us();
        scratch.push(Pulse::new(last_level, 0));

        let mut idle = 0;
        loop {
            let level = sample(line)?;
            if level != last_level {
                let now = clock.now_us();
                if scratch.len() >= capacity {
                    return Err(DhtError::CaptureOverflow { limit: capacity });
                }
                if let Some(held) = scratch.last_mut() {
                    held.duration_us = saturate(now.saturating_sub(last_edge));
                }
                scratch.push(Pulse::new(level, 0));
                last_level = level;
                last_edge = now;
                idle = 0;
                continue;
            }

            idle += 1;
            if idle > self.config.idle_check_interval {
                idle = 0;
                if clock.now_us().saturating_sub(last_edge) > timeout_us {
                    if let Some(held) = scratch.last_mut() {
                        held.duration_us = saturate(timeout_us);
                    }
                    break;
                }
            }
        }

        trace!("captured {} pulses", scratch.len());
        Ok(PulseTrain {
            pulses: scratch.to_vec(),
        })
    }
}

impl Default for PulseCapture {
    fn default() -> Self {
        Self::new()
    }
}

fn sample<P: InputPin>(line: &mut P) -> Result<Level, DhtError<P::Error>> {
    line.is_high().map(Level::from).map_err(DhtError::ReadFailed)
}

fn saturate(us: u64) -> u32 {
    u32::try_from(us).unwrap_or(u32::MAX)
}
