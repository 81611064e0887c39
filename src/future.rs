//! Single-assignment result channel.
//!
//! A [`Promise`] is the write side, a [`Future`] the read side. Both are
//! handles to one reference-counted shared state that moves
//! `None -> Pending -> {Success, Failure}` exactly once.

use crate::signal::Signal;
use core::{fmt, mem};
use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};
use thiserror::Error;

/// Resolution state of a promise and all of its futures.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FutureStatus {
    /// No future has been created yet.
    #[default]
    None,
    /// A future exists and waits for the result.
    Pending,
    /// Resolved with a value.
    Success,
    /// Resolved with a [`FutureError`].
    Failure,
}

impl FutureStatus {
    /// Whether the state is terminal.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Error a promise was resolved with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct FutureError {
    /// Caller-defined error code.
    pub code: i32,
    /// Human readable description.
    pub message: String,
}

impl FutureError {
    /// Creates an error from a code and a message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// What callbacks receive: the resolved value or the resolution error.
pub type FutureResult<'a, T> = Result<&'a T, &'a FutureError>;

type Callback<T> = Box<dyn FnOnce(FutureResult<'_, T>) + Send>;

struct Shared<T> {
    state: Mutex<State<T>>,
    outcome: OnceLock<Result<T, FutureError>>,
    signal: Signal,
}

struct State<T> {
    status: FutureStatus,
    callbacks: Vec<Callback<T>>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                status: FutureStatus::None,
                callbacks: Vec::new(),
            }),
            outcome: OnceLock::new(),
            signal: Signal::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outcome(&self) -> FutureResult<'_, T> {
        self.outcome
            .get()
            .expect("future outcome is missing after resolution")
            .as_ref()
    }
}

/// Write side of the channel.
///
/// Cloning a promise yields another handle to the same state; whichever
/// clone resolves first wins and any later attempt panics.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Creates an unresolved promise with no futures attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
        }
    }

    /// Returns a future observing this promise, moving the state to
    /// [`FutureStatus::Pending`] if it was [`FutureStatus::None`].
    #[must_use]
    pub fn create_future(&self) -> Future<T> {
        {
            let mut state = self.shared.lock();
            if state.status == FutureStatus::None {
                state.status = FutureStatus::Pending;
            }
        }
        Future {
            shared: self.shared.clone(),
        }
    }

    /// Current resolution state.
    #[must_use]
    pub fn status(&self) -> FutureStatus {
        self.shared.lock().status
    }

    /// Resolves with `value`, running every registered callback.
    ///
    /// # Panics
    /// If the promise has already been resolved.
    pub fn set_result(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolves with an error, running every registered callback.
    ///
    /// # Panics
    /// If the promise has already been resolved.
    pub fn set_error(&self, code: i32, message: impl Into<String>) {
        self.resolve(Err(FutureError::new(code, message)));
    }

    fn resolve(&self, outcome: Result<T, FutureError>) {
        let callbacks = {
            let mut state = self.shared.lock();
            assert!(
                !state.status.is_resolved(),
                "Promise::resolve: promise has already been resolved"
            );
            state.status = if outcome.is_ok() {
                FutureStatus::Success
            } else {
                FutureStatus::Failure
            };
            if self.shared.outcome.set(outcome).is_err() {
                unreachable!("Promise::resolve: [1]");
            }
            mem::take(&mut state.callbacks)
        };
        // Waiters are released before any callback runs, so a panicking
        // callback can't leave them blocked.
        self.shared.signal.raise();
        let outcome = self.shared.outcome();
        for callback in callbacks {
            callback(outcome);
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Read side of the channel.
///
/// Clones are cheap and all observe the same resolution.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Future<T> {
    /// A future that is already resolved with `value`.
    pub fn succeed(value: T) -> Self {
        let promise = Promise::new();
        let future = promise.create_future();
        promise.set_result(value);
        future
    }

    /// A future that is already resolved with an error.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        let promise = Promise::new();
        let future = promise.create_future();
        promise.set_error(code, message);
        future
    }

    /// Current resolution state.
    #[must_use]
    pub fn status(&self) -> FutureStatus {
        self.shared.lock().status
    }

    /// Whether the promise has been resolved, successfully or not.
    #[must_use]
    pub fn has_result(&self) -> bool {
        self.status().is_resolved()
    }

    /// Whether the promise has been resolved with an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.status() == FutureStatus::Failure
    }

    /// The resolution, or `None` while still pending.
    #[must_use]
    pub fn result(&self) -> Option<FutureResult<'_, T>> {
        self.shared.outcome.get().map(Result::as_ref)
    }

    /// The resolved value.
    ///
    /// # Panics
    /// Unless the promise has been resolved successfully.
    #[must_use]
    pub fn get_result(&self) -> &T {
        match self.result() {
            Some(Ok(value)) => value,
            Some(Err(err)) => panic!("Future::get_result: future has failed: {err}"),
            None => panic!("Future::get_result: future is not resolved yet"),
        }
    }

    /// The resolution error, or `None` unless the promise failed.
    #[must_use]
    pub fn error(&self) -> Option<&FutureError> {
        self.result().and_then(Result::err)
    }

    /// Code of the resolution error.
    ///
    /// # Panics
    /// Unless the promise has been resolved with an error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.error().expect("Future::error_code: [1]").code
    }

    /// Message of the resolution error.
    ///
    /// # Panics
    /// Unless the promise has been resolved with an error.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error().expect("Future::error_message: [1]").message
    }

    /// Blocks until resolved or until `timeout` elapses (`None` waits
    /// forever). Returns whether the future is resolved.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.shared.signal.wait(timeout)
    }

    /// Registers `callback` to run once with the resolution.
    ///
    /// If the future is already resolved the callback runs right away on the
    /// calling thread; otherwise it runs on whichever thread resolves the
    /// promise.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(FutureResult<'_, T>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        match state.status {
            FutureStatus::Success | FutureStatus::Failure => {
                drop(state);
                callback(self.shared.outcome());
            }
            FutureStatus::Pending => state.callbacks.push(Box::new(callback)),
            FutureStatus::None => unreachable!("Future::add_callback: [1]"),
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
