//! Time source and cooperative cancellation.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A cloneable, thread-safe abort flag whose waits wake up as soon as it is raised.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout`. Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |aborted| !*aborted)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Monotonic time plus an abortable sleep.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Sleep for `duration` unless `abort` fires first.
    ///
    /// Returns `false` when the sleep was cut short by an abort.
    fn sleep(&self, duration: Duration, abort: &AbortSignal) -> bool;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, abort: &AbortSignal) -> bool {
        !abort.wait_timeout(duration)
    }
}

/// Virtual time that only moves when slept on.
///
/// Makes timeout behaviour exact and instant in tests and dry runs.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration, abort: &AbortSignal) -> bool {
        if abort.is_triggered() {
            return false;
        }
        self.advance(duration);
        true
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration, abort: &AbortSignal) -> bool {
        (**self).sleep(duration, abort)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration, abort: &AbortSignal) -> bool {
        (**self).sleep(duration, abort)
    }
}
