//! Cooperative cancellation
//!
//! Blocking actions never sleep. They wait on the engine's [`WaitSignal`]
//! condition variable through a [`CancelToken`], which wakes early when
//! either the engine aborts all waits (shutdown) or the owning macro is
//! stopped (restart, delete).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Engine-wide abort flag plus the condition variable blocking actions wait on
#[derive(Debug, Default)]
pub struct WaitSignal {
    abort: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort every current and future wait until [`WaitSignal::resume`]
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.notify_all();
    }

    /// Allow waits again after an abort
    pub fn resume(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Wake all waiters so they re-check their stop conditions
    pub fn notify_all(&self) {
        // Taking the lock orders the notification after any waiter that is
        // between its predicate check and the wait call.
        let _guard = self.guard();
        self.cv.notify_all();
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration passed
    Elapsed,
    /// The owning macro was stopped
    Stopped,
    /// The engine aborted all waits
    Aborted,
}

/// Engine abort signal combined with one macro's stop flag
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<WaitSignal>,
    stop: Arc<AtomicBool>,
}

impl CancelToken {
    /// Token observing `signal` and the macro stop flag `stop`
    pub fn new(signal: Arc<WaitSignal>, stop: Arc<AtomicBool>) -> Self {
        Self { signal, stop }
    }

    /// Token that only observes the engine-wide abort
    pub fn engine_only(signal: Arc<WaitSignal>) -> Self {
        Self::new(signal, Arc::new(AtomicBool::new(false)))
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Whether either cancellation source fired
    pub fn is_cancelled(&self) -> bool {
        self.is_aborted() || self.is_stopped()
    }

    /// Block for `duration` unless cancelled first
    pub fn wait_for(&self, duration: Duration) -> WaitOutcome {
        match Instant::now().checked_add(duration) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait_until_cancelled(),
        }
    }

    /// Block until `deadline` unless cancelled first
    pub fn wait_until(&self, deadline: Instant) -> WaitOutcome {
        let mut guard = self.signal.guard();
        loop {
            if let Some(outcome) = self.cancelled_outcome() {
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Elapsed;
            }
            let (next, _) = self
                .signal
                .cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    fn wait_until_cancelled(&self) -> WaitOutcome {
        let mut guard = self.signal.guard();
        loop {
            if let Some(outcome) = self.cancelled_outcome() {
                return outcome;
            }
            guard = self
                .signal
                .cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn cancelled_outcome(&self) -> Option<WaitOutcome> {
        if self.is_aborted() {
            Some(WaitOutcome::Aborted)
        } else if self.is_stopped() {
            Some(WaitOutcome::Stopped)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_elapses() {
        let token = CancelToken::engine_only(Arc::new(WaitSignal::new()));
        let start = Instant::now();
        assert_eq!(token.wait_for(Duration::from_millis(20)), WaitOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let signal = Arc::new(WaitSignal::new());
        let stop = Arc::new(AtomicBool::new(false));
        let token = CancelToken::new(signal.clone(), stop.clone());

        let waiter = thread::spawn(move || token.wait_for(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::SeqCst);
        signal.notify_all();

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Stopped);
    }

    #[test]
    fn test_abort_wakes_all_waiters() {
        let signal = Arc::new(WaitSignal::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let token = CancelToken::engine_only(signal.clone());
                thread::spawn(move || token.wait_for(Duration::from_secs(30)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.abort();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitOutcome::Aborted);
        }
    }

    #[test]
    fn test_already_cancelled_returns_immediately() {
        let signal = Arc::new(WaitSignal::new());
        signal.abort();
        let token = CancelToken::engine_only(signal.clone());
        assert!(token.is_cancelled());
        assert_eq!(token.wait_for(Duration::MAX), WaitOutcome::Aborted);

        signal.resume();
        assert!(!token.is_cancelled());
    }
}
