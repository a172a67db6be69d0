//! Decoding of a DHT11/DHT22 response from its captured pulse train.
//!
//! After the dial sequence the sensor answers with a short handshake and
//! then 40 bits, each a ~50us low pulse followed by a high pulse whose
//! length gives the bit value (~26us for 0, ~70us for 1). The five bytes
//! carry humidity, temperature and a checksum.

use core::fmt;

use log::debug;
use thiserror::Error;

use crate::capture::{Pulse, PulseTrain};
use crate::line::Level;

/// Number of pulses carrying the 40 data bits.
const DATA_PULSES: usize = 80;

/// Longest high pulse accepted as a bit, in microseconds.
const BIT_HIGH_MAX_US: u32 = (70 + (70 + 54)) / 2;

/// High pulses longer than this are a 1 bit, halfway between 24us and 70us.
const BIT_ONE_THRESHOLD_US: u32 = 24 + (70 - 24) / 2;

/// Supported sensor models.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorType {
    Dht11,
    Dht22,
}

impl SensorType {
    /// The AM2302 is a packaged DHT22.
    pub const AM2302: SensorType = SensorType::Dht22;
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Dht11 => f.write_str("DHT11"),
            SensorType::Dht22 => f.write_str("DHT22"),
        }
    }
}

/// Reading decoded from a sensor response.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub relative_humidity: f32,
}

/// Reasons a pulse train does not decode to a reading.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unexpected pulse train length {0}, expected 82 to 85 pulses")]
    InvalidLength(usize),
    #[error("{expected:?} level expected at pulse {index}")]
    UnexpectedLevel { index: usize, expected: Level },
    #[error("high pulse {index} lasted {duration_us}us, longer than a bit")]
    PulseTooLong { index: usize, duration_us: u32 },
    #[error("checksum from sensor {received} does not match computed {computed}")]
    ChecksumMismatch { received: u8, computed: u8 },
    #[error("humidity {0}% exceeds 100%")]
    HumidityOutOfRange(f32),
}

/// Decodes a captured pulse train into a reading.
///
/// Up to three leading handshake pulses are skipped depending on how early
/// the capture started; the trailing low pulse and the final timeout pulse
/// are ignored.
pub fn decode(sensor: SensorType, train: &PulseTrain) -> Result<Reading, DecodeError> {
    let pulses = train.pulses();
    let skip = match pulses.len() {
        82 => 0,
        83 => 1,
        84 => 2,
        85 => 3,
        len => return Err(DecodeError::InvalidLength(len)),
    };
    let data = &pulses[skip..skip + DATA_PULSES];

    let mut bytes = [0u8; 5];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = decode_byte(data, i * 16, skip)?;
    }

    let [hum_hi, hum_lo, temp_hi, temp_lo, checksum] = bytes;
    let computed = bytes[..4].iter().fold(0u8, |sum, v| sum.wrapping_add(*v));
    if computed != checksum {
        return Err(DecodeError::ChecksumMismatch {
            received: checksum,
            computed,
        });
    }
    debug!("decoded {sensor} bytes: {bytes:?}");

    let reading = parse_data(sensor, [hum_hi, hum_lo, temp_hi, temp_lo]);
    if reading.relative_humidity > 100.0 {
        return Err(DecodeError::HumidityOutOfRange(reading.relative_humidity));
    }
    Ok(reading)
}

/// Reads eight (low, high) pulse pairs starting at `start`, MSB first.
///
/// `offset` is where `pulses` begins in the full train, for error indices.
fn decode_byte(pulses: &[Pulse], start: usize, offset: usize) -> Result<u8, DecodeError> {
    let mut byte: u8 = 0;

    for bit in 0..8 {
        let index = start + bit * 2;
        let (low, high) = (pulses[index], pulses[index + 1]);
        if low.level != Level::Low {
            return Err(DecodeError::UnexpectedLevel {
                index: offset + index,
                expected: Level::Low,
            });
        }
        if high.level != Level::High {
            return Err(DecodeError::UnexpectedLevel {
                index: offset + index + 1,
                expected: Level::High,
            });
        }
        if high.duration_us > BIT_HIGH_MAX_US {
            return Err(DecodeError::PulseTooLong {
                index: offset + index + 1,
                duration_us: high.duration_us,
            });
        }
        if high.duration_us > BIT_ONE_THRESHOLD_US {
            byte |= 1 << (7 - bit);
        }
    }

    Ok(byte)
}

/// Converts the 4 data bytes into a `Reading`.
fn parse_data(sensor: SensorType, data: [u8; 4]) -> Reading {
    let [hum_hi, hum_lo, temp_hi, temp_lo] = data;

    match sensor {
        SensorType::Dht11 => Reading {
            temperature: temp_hi as f32,
            relative_humidity: hum_hi as f32,
        },
        SensorType::Dht22 => {
            let joined_humidity = u16::from_be_bytes([hum_hi, hum_lo]);
            let relative_humidity = joined_humidity as f32 / 10.0;

            let is_temp_negative = (temp_hi >> 7) != 0;
            let temp_hi = temp_hi & 0b0111_1111;
            let joined_temp = u16::from_be_bytes([temp_hi, temp_lo]);
            let mut temperature = joined_temp as f32 / 10.0;
            if is_temp_negative {
                temperature = -temperature;
            }

            Reading {
                temperature,
                relative_humidity,
            }
        }
    }
}
