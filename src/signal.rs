use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Manual-reset event.
///
/// Once raised, every current and future waiter passes through until
/// [`clear`](Self::clear) is called.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Creates a signal in the cleared state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes every waiter.
    pub fn raise(&self) {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    /// Resets the signal so that subsequent waits block again.
    pub fn clear(&self) {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Whether the signal is currently raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the signal is raised or `timeout` elapses.
    ///
    /// `None` waits forever. Returns `true` if the signal was raised.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            None => {
                let raised = self
                    .cond
                    .wait_while(raised, |raised| !*raised)
                    .unwrap_or_else(PoisonError::into_inner);
                *raised
            }
            Some(timeout) => {
                let (raised, _) = self
                    .cond
                    .wait_timeout_while(raised, timeout, |raised| !*raised)
                    .unwrap_or_else(PoisonError::into_inner);
                *raised
            }
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn wait_times_out_while_cleared() {
        let signal = Signal::new();
        assert!(!signal.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn raise_releases_waiters_until_cleared() {
        let signal = Arc::new(Signal::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait(None))
            })
            .collect();
        signal.raise();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert!(signal.wait(Some(Duration::ZERO)));
        signal.clear();
        assert!(!signal.is_raised());
        assert!(!signal.wait(Some(Duration::from_millis(1))));
    }
}
