use thiserror::Error;

use crate::decode::DecodeError;
use crate::priority::SchedError;

/// Possible errors from dialing a DHT sensor.
///
/// `E` is the error type of the GPIO line the sensor is attached to.
#[derive(Debug, Error, PartialEq)]
pub enum DhtError<E> {
    /// The line could not be exported, opened or released.
    #[error("line unavailable: {0:?}")]
    ResourceUnavailable(E),
    /// Writing the line direction or level failed.
    #[error("line configuration failed: {0:?}")]
    ConfigurationFailed(E),
    /// Sampling the line level failed while polling.
    #[error("line read failed: {0:?}")]
    ReadFailed(E),
    /// More transitions were seen than the capture buffer holds.
    #[error("pulse count exceeded limit of {limit}")]
    CaptureOverflow { limit: usize },
    /// Real-time priority could not be entered or left.
    ///
    /// Only for callers driving a [`PriorityScope`] themselves. A dial
    /// treats priority failures as soft: it logs them and goes on.
    ///
    /// [`PriorityScope`]: crate::priority::PriorityScope
    #[error(transparent)]
    SchedulingUnavailable(#[from] SchedError),
    /// The captured pulse train is not a valid sensor response.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
