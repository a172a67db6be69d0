//! Temporary real-time scheduling for timing-critical sections.
//!
//! Elevation is best effort: a thread that cannot enter the real-time
//! class still captures, only with more jitter.

use std::cell::Cell;

use log::warn;
use thiserror::Error;

thread_local! {
    static ELEVATED: Cell<bool> = const { Cell::new(false) };
}

/// Errors from changing the scheduling class of the calling thread.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SchedError {
    /// `SCHED_FIFO` could not be entered. Carries the OS error code.
    #[error("unable to set SCHED_FIFO priority to the thread (os error {0})")]
    Elevate(i32),
    /// `SCHED_OTHER` could not be restored. Carries the OS error code.
    #[error("unable to set SCHED_OTHER priority to the thread (os error {0})")]
    Restore(i32),
    /// The calling thread already runs inside an elevated scope.
    #[error("priority is already elevated on this thread")]
    Nested,
    /// The platform has no real-time scheduling class.
    #[error("real-time scheduling is not supported on this platform")]
    Unsupported,
}

/// Changes the scheduling class of the calling thread.
pub trait Scheduler {
    /// Requests the highest real-time priority.
    fn enter_high_priority(&mut self) -> Result<(), SchedError>;

    /// Returns to the time-shared class with priority zero.
    fn restore_default_priority(&mut self) -> Result<(), SchedError>;
}

impl<S: Scheduler + ?Sized> Scheduler for &mut S {
    fn enter_high_priority(&mut self) -> Result<(), SchedError> {
        (**self).enter_high_priority()
    }

    fn restore_default_priority(&mut self) -> Result<(), SchedError> {
        (**self).restore_default_priority()
    }
}

/// [`Scheduler`] using `sched_setscheduler(2)` on the calling thread.
///
/// Entering `SCHED_FIFO` needs root or `CAP_SYS_NICE`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

#[cfg(target_os = "linux")]
impl Scheduler for ThreadScheduler {
    fn enter_high_priority(&mut self) -> Result<(), SchedError> {
        // SAFETY: plain query without pointers.
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if max == -1 {
            return Err(SchedError::Elevate(last_os_error()));
        }
        set_scheduler(libc::SCHED_FIFO, max).map_err(SchedError::Elevate)
    }

    fn restore_default_priority(&mut self) -> Result<(), SchedError> {
        set_scheduler(libc::SCHED_OTHER, 0).map_err(SchedError::Restore)
    }
}

#[cfg(not(target_os = "linux"))]
impl Scheduler for ThreadScheduler {
    fn enter_high_priority(&mut self) -> Result<(), SchedError> {
        Err(SchedError::Unsupported)
    }

    fn restore_default_priority(&mut self) -> Result<(), SchedError> {
        Err(SchedError::Unsupported)
    }
}

#[cfg(target_os = "linux")]
fn set_scheduler(policy: libc::c_int, priority: libc::c_int) -> Result<(), i32> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    if unsafe { libc::sched_setscheduler(0, policy, &param) } == -1 {
        return Err(last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn last_os_error() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Elevated scheduling for the lifetime of a dial sequence.
///
/// The scope is armed by [`elevate`](Self::elevate) whether or not the
/// scheduler accepted the request, so an armed scope restores the default
/// class exactly once: in [`exit`](Self::exit), or on drop if `exit` was
/// never reached. Only one scope per thread may be armed at a time.
pub struct PriorityScope<'a, S: Scheduler> {
    scheduler: &'a mut S,
    armed: bool,
}

impl<'a, S: Scheduler> PriorityScope<'a, S> {
    /// Creates an unarmed scope. Nothing changes until `elevate`.
    pub fn new(scheduler: &'a mut S) -> Self {
        PriorityScope {
            scheduler,
            armed: false,
        }
    }

    /// Requests real-time priority and arms the scope.
    ///
    /// # Errors
    ///
    /// Returns `SchedError::Nested` without touching the scheduler if this
    /// thread already holds an armed scope. Otherwise forwards the
    /// scheduler's error; the scope is armed regardless.
    pub fn elevate(&mut self) -> Result<(), SchedError> {
        if self.armed || ELEVATED.get() {
            return Err(SchedError::Nested);
        }
        self.armed = true;
        ELEVATED.set(true);
        self.scheduler.enter_high_priority()
    }

    /// Whether leaving the scope will restore the default class.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Leaves the scope, restoring the default class if armed.
    pub fn exit(mut self) -> Result<(), SchedError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), SchedError> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        ELEVATED.set(false);
        self.scheduler.restore_default_priority()
    }
}

impl<S: Scheduler> Drop for PriorityScope<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!("failed to restore default priority: {err}");
        }
    }
}
