//! Deterministic stand-ins for the line, clock and scheduler.
//!
//! Time only moves when the scripted line is sampled, so captured
//! durations are exact up to one sampling step.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};

use crate::line::{Direction, Gpio, Level, Line};
use crate::priority::{SchedError, Scheduler};
use crate::timing::Clock;

/// Microseconds each sample of a [`ScriptedLine`] takes.
pub const READ_COST_US: u64 = 1;

/// Shared fake clock.
#[derive(Clone, Debug, Default)]
pub struct FakeTime(Rc<Cell<u64>>);

impl FakeTime {
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

impl Clock for FakeTime {
    fn now_us(&mut self) -> u64 {
        self.0.get()
    }
}

/// One of the observable steps of a dial sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Elevate,
    Acquire,
    Output,
    High,
    Low,
    Input,
    Read,
    Release,
    Restore,
}

/// Ordered record of the steps taken, shared by all fakes of one test.
#[derive(Clone, Debug, Default)]
pub struct Journal(Rc<RefCell<Vec<Step>>>);

impl Journal {
    pub fn record(&self, step: Step) {
        self.0.borrow_mut().push(step);
    }

    pub fn steps(&self) -> Vec<Step> {
        self.0.borrow().clone()
    }

    /// Steps other than line reads, which are too many to spell out.
    pub fn actions(&self) -> Vec<Step> {
        self.steps()
            .into_iter()
            .filter(|step| *step != Step::Read)
            .collect()
    }

    pub fn count(&self, step: Step) -> usize {
        self.0.borrow().iter().filter(|s| **s == step).count()
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    pub entered: usize,
    pub restored: usize,
    pub fail_enter: bool,
    pub fail_restore: bool,
    pub journal: Journal,
}

impl Scheduler for FakeScheduler {
    fn enter_high_priority(&mut self) -> Result<(), SchedError> {
        self.entered += 1;
        self.journal.record(Step::Elevate);
        if self.fail_enter {
            return Err(SchedError::Elevate(libc::EPERM));
        }
        Ok(())
    }

    fn restore_default_priority(&mut self) -> Result<(), SchedError> {
        self.restored += 1;
        self.journal.record(Step::Restore);
        if self.fail_restore {
            return Err(SchedError::Restore(libc::EPERM));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockLineError {
    /// Failure requested by the test at this step.
    Injected(Step),
    /// The line is already held by another session.
    Busy,
}

impl digital::Error for MockLineError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Input line replaying a fixed pulse sequence.
///
/// The script is a list of `(level, duration_us)` pairs measured from the
/// first sample; the last level is held forever.
pub struct ScriptedLine {
    time: FakeTime,
    initial: Level,
    edges: Vec<u64>,
    origin: Option<u64>,
    reads: usize,
    fail_at_read: Option<usize>,
}

impl ScriptedLine {
    pub fn new(time: FakeTime, pulses: &[(Level, u64)]) -> Self {
        let initial = pulses.first().map(|(level, _)| *level).unwrap_or(Level::High);
        let edges = pulses
            .iter()
            .take(pulses.len().saturating_sub(1))
            .scan(0, |at, (_, duration)| {
                *at += duration;
                Some(*at)
            })
            .collect();
        ScriptedLine {
            time,
            initial,
            edges,
            origin: None,
            reads: 0,
            fail_at_read: None,
        }
    }

    /// A line that never leaves `level`.
    pub fn constant(time: FakeTime, level: Level) -> Self {
        Self::new(time, &[(level, 0)])
    }

    /// A line that toggles every `period_us`, `count` times.
    pub fn oscillating(time: FakeTime, period_us: u64, count: usize) -> Self {
        let pulses: Vec<_> = (0..=count)
            .map(|i| (if i % 2 == 0 { Level::High } else { Level::Low }, period_us))
            .collect();
        Self::new(time, &pulses)
    }

    /// Fails the `n`th sample (zero based).
    pub fn failing_at_read(mut self, n: usize) -> Self {
        self.fail_at_read = Some(n);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    fn sample(&mut self) -> Result<Level, MockLineError> {
        if self.fail_at_read == Some(self.reads) {
            return Err(MockLineError::Injected(Step::Read));
        }
        self.reads += 1;
        self.time.advance(READ_COST_US);
        let now = self.time.get();
        let origin = *self.origin.get_or_insert(now);
        let elapsed = now - origin;
        let flips = self.edges.partition_point(|at| *at <= elapsed);
        Ok(if flips % 2 == 0 {
            self.initial
        } else {
            self.initial.toggled()
        })
    }
}

impl ErrorType for ScriptedLine {
    type Error = MockLineError;
}

impl InputPin for ScriptedLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.sample()? == Level::High)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.sample()? == Level::Low)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineState {
    pub acquired: bool,
    pub direction: Direction,
}

impl Default for LineState {
    fn default() -> Self {
        LineState {
            acquired: false,
            direction: Direction::Input,
        }
    }
}

/// Board of lines handing out [`MockLine`]s.
#[derive(Default)]
pub struct MockGpio {
    pub time: FakeTime,
    pub journal: Journal,
    pub script: Vec<(Level, u64)>,
    pub fail: Option<Step>,
    /// Only the first this many sessions fail at `fail`; all of them if `None`.
    pub fail_sessions: Option<usize>,
    /// Sample index at which `Step::Read` fails; the first sample by default.
    pub fail_read_at: usize,
    /// Makes every release fail, on top of `fail`.
    pub fail_release: bool,
    pub sessions: usize,
    pub board: Rc<RefCell<HashMap<u32, LineState>>>,
    /// Direction each acquired line had right before it was claimed.
    pub seen_on_acquire: Rc<RefCell<Vec<Direction>>>,
}

impl MockGpio {
    pub fn with_script(script: &[(Level, u64)]) -> Self {
        MockGpio {
            script: script.to_vec(),
            ..Default::default()
        }
    }

    pub fn state(&self, number: u32) -> LineState {
        self.board.borrow().get(&number).copied().unwrap_or_default()
    }
}

impl Gpio for MockGpio {
    type Line = MockLine;

    fn line(&mut self, number: u32) -> MockLine {
        let failing = self.fail_sessions.is_none_or(|limit| self.sessions < limit);
        let fail = self.fail.filter(|_| failing);
        self.sessions += 1;

        let mut input = ScriptedLine::new(self.time.clone(), &self.script);
        if fail == Some(Step::Read) {
            input = input.failing_at_read(self.fail_read_at);
        }
        MockLine {
            number,
            input,
            fail,
            fail_release: self.fail_release,
            journal: self.journal.clone(),
            board: self.board.clone(),
            seen_on_acquire: self.seen_on_acquire.clone(),
            held: false,
        }
    }
}

pub struct MockLine {
    number: u32,
    input: ScriptedLine,
    fail: Option<Step>,
    fail_release: bool,
    journal: Journal,
    board: Rc<RefCell<HashMap<u32, LineState>>>,
    seen_on_acquire: Rc<RefCell<Vec<Direction>>>,
    held: bool,
}

impl MockLine {
    fn step(&self, step: Step) -> Result<(), MockLineError> {
        self.journal.record(step);
        if self.fail == Some(step) || (self.fail_release && step == Step::Release) {
            return Err(MockLineError::Injected(step));
        }
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut LineState)) {
        f(self.board.borrow_mut().entry(self.number).or_default());
    }
}

impl ErrorType for MockLine {
    type Error = MockLineError;
}

impl InputPin for MockLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.journal.record(Step::Read);
        self.input.is_high()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.journal.record(Step::Read);
        self.input.is_low()
    }
}

impl OutputPin for MockLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.step(Step::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.step(Step::High)
    }
}

impl Line for MockLine {
    fn acquire(&mut self) -> Result<(), Self::Error> {
        self.step(Step::Acquire)?;
        let state = self.board.borrow().get(&self.number).copied().unwrap_or_default();
        if state.acquired {
            return Err(MockLineError::Busy);
        }
        self.seen_on_acquire.borrow_mut().push(state.direction);
        self.update(|state| state.acquired = true);
        self.held = true;
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error> {
        self.step(match direction {
            Direction::Input => Step::Input,
            Direction::Output => Step::Output,
        })?;
        self.update(|state| state.direction = direction);
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.step(Step::Release)?;
        if self.held {
            self.update(|state| *state = LineState::default());
            self.held = false;
        }
        Ok(())
    }
}

/// Pulses a DHT sensor sends for `bytes` after being dialed.
///
/// Starts with the pulled-up line before the sensor answers, then the
/// 80us low/high handshake, 40 bits and the closing low pulse: 85 pulses
/// in total. The final high pulse lasts the 10ms capture timeout.
pub fn sensor_response(bytes: [u8; 5]) -> Vec<(Level, u64)> {
    let mut pulses = vec![(Level::High, 20), (Level::Low, 80), (Level::High, 80)];
    for byte in bytes {
        for bit in (0..8).rev() {
            let high = if (byte >> bit) & 1 == 1 { 70 } else { 26 };
            pulses.push((Level::Low, 50));
            pulses.push((Level::High, high));
        }
    }
    pulses.push((Level::Low, 50));
    pulses.push((Level::High, 10_000));
    pulses
}
