//! Run-state flags shared between the launcher, the recorder and the protocol.
//!
//! A run flag holds one of three values, mirroring the integer codes the
//! subprocesses historically exchanged:
//!
//! | code | state     | meaning                                     |
//! |------|-----------|---------------------------------------------|
//! | 0    | `Stopped` | finish (or never started)                   |
//! | 1    | `Started` | actively running                            |
//! | 2    | `Waiting` | armed, waiting for a peer before starting   |
//!
//! Any state may move to any other; setting the current value again is a
//! no-op and does not wake waiters. Waiting on a flag blocks on a condition
//! variable, so nothing polls.
//!
//! The session supervisor drives the flags as follows:
//!
//! ```text
//! record:   Stopped -> Started ------------------------------> Stopped
//! protocol: Stopped -> Waiting -> Started (recorder live) ----> Stopped
//!                                        ^ operator stop / protocol exit
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Three-valued run flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Stopped,
    Started,
    Waiting,
}

impl RunState {
    /// Integer code of the state (0 = stop, 1 = start, 2 = wait).
    pub fn code(self) -> u8 {
        match self {
            RunState::Stopped => 0,
            RunState::Started => 1,
            RunState::Waiting => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, StateError> {
        match code {
            0 => Ok(RunState::Stopped),
            1 => Ok(RunState::Started),
            2 => Ok(RunState::Waiting),
            other => Err(StateError::InvalidCode(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Started => "started",
            RunState::Waiting => "waiting",
        }
    }
}

impl TryFrom<i64> for RunState {
    type Error = StateError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        RunState::from_code(code)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

/// Cloneable handle to a run flag guarded by a mutex and a condition variable.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<(Mutex<RunState>, Condvar)>,
}

impl SharedState {
    pub fn new(initial: RunState) -> Self {
        Self {
            inner: Arc::new((Mutex::new(initial), Condvar::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> RunState {
        *self.lock()
    }

    pub fn is(&self, state: RunState) -> bool {
        self.get() == state
    }

    /// Set the flag and wake every waiter. Returns the previous value.
    pub fn set(&self, new: RunState) -> RunState {
        let mut guard = self.lock();
        let previous = *guard;
        if previous != new {
            *guard = new;
            self.inner.1.notify_all();
        }
        previous
    }

    /// Compare-and-set: move to `to` only if the flag currently equals `from`.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        let mut guard = self.lock();
        if *guard != from {
            return false;
        }
        if from != to {
            *guard = to;
            self.inner.1.notify_all();
        }
        true
    }

    /// Block until the flag equals `target` or `timeout` elapses.
    ///
    /// Also serves as an interruptible sleep: `wait_for(Stopped, d)` sleeps
    /// for `d` unless the flag is stopped first.
    pub fn wait_for(&self, target: RunState, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |s| *s != target)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == target
    }

    /// Block while the flag equals `state`, returning the value seen on exit.
    pub fn wait_while(&self, state: RunState, timeout: Duration) -> RunState {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |s| *s == state)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Block without timeout until the flag equals `target`.
    pub fn wait_until(&self, target: RunState) {
        let guard = self.lock();
        let _guard = self
            .inner
            .1
            .wait_while(guard, |s| *s != target)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(RunState::Stopped)
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedState").field(&self.get()).finish()
    }
}

/// One-shot signal, e.g. "first sample pulled".
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let mut released = self.inner.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !*released {
            *released = true;
            self.inner.1.notify_all();
        }
    }

    pub fn is_released(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the latch. Returns whether it was released.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.inner.0.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Latch").field(&self.is_released()).finish()
    }
}
