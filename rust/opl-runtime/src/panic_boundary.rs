//! Panic containment at host/guest boundaries.
//!
//! Extension handlers, plugin callbacks and spawned VM threads run code the
//! VM does not control. A panic inside them must surface as an ordinary
//! error instead of unwinding through the dispatch loop.
//!
//! ```rust
//! use opl_runtime::panic_boundary::{catch_panic, with_panic_boundary, PanicPolicy};
//!
//! let err = catch_panic(|| -> u32 { panic!("bad handler") }).unwrap_err();
//! assert_eq!(err.message(), "bad handler");
//!
//! let ok = with_panic_boundary(PanicPolicy::LogAndCatch, || 7);
//! assert_eq!(ok.unwrap(), 7);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

/// A caught panic, reduced to its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build from the payload handed back by `catch_unwind` or `join`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Return the panic as `Err`.
    #[default]
    Catch,
    /// Same as `Catch`, and log the message at `error` level.
    LogAndCatch,
    /// Let the panic unwind.
    Propagate,
}

/// Run `f`, turning a panic into `Err(PanicError)`.
///
/// Closures here typically borrow VM state through trait objects, so unwind
/// safety is asserted rather than inferred; callers must not observe state
/// the panicking closure left half-updated.
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, PanicError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(PanicError::from_payload)
}

pub fn with_panic_boundary<T>(policy: PanicPolicy, f: impl FnOnce() -> T) -> Result<T, PanicError> {
    match policy {
        PanicPolicy::Catch => catch_panic(f),
        PanicPolicy::LogAndCatch => catch_panic(f).inspect_err(|e| {
            tracing::error!(message = e.message(), "caught panic at boundary");
        }),
        PanicPolicy::Propagate => Ok(f()),
    }
}

/// Join a thread, reporting a panic in it as `PanicError`.
pub fn join_thread<T>(handle: JoinHandle<T>) -> Result<T, PanicError> {
    handle.join().map_err(PanicError::from_payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes_through() {
        assert_eq!(catch_panic(|| 42).unwrap(), 42);
    }

    #[test]
    fn str_and_string_payloads() {
        let err = catch_panic(|| -> i32 { panic!("boom") }).unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "panic: boom");

        let err = catch_panic(|| -> i32 { panic!("{} {}", "formatted", 1) }).unwrap_err();
        assert_eq!(err.message(), "formatted 1");
    }

    #[test]
    fn opaque_payload() {
        let err = catch_panic(|| -> i32 { std::panic::panic_any(5_u8) }).unwrap_err();
        assert_eq!(err.message(), "unknown panic payload");
    }

    #[test]
    fn log_and_catch_returns_err() {
        let result = with_panic_boundary(PanicPolicy::LogAndCatch, || -> i32 { panic!("logged") });
        assert_eq!(result.unwrap_err().message(), "logged");
    }

    #[test]
    fn propagate_runs_closure() {
        assert_eq!(with_panic_boundary(PanicPolicy::Propagate, || 3).unwrap(), 3);
    }

    #[test]
    fn join_reports_thread_panic() {
        let handle = std::thread::spawn(|| -> u32 { panic!("child died") });
        let err = join_thread(handle).unwrap_err();
        assert_eq!(err.message(), "child died");

        let handle = std::thread::spawn(|| 9_u32);
        assert_eq!(join_thread(handle).unwrap(), 9);
    }
}
