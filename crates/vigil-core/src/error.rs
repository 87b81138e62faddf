use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;

/// The tree-wide phase guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Digest,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Digest => f.write_str("$digest"),
            Phase::Apply => f.write_str("$apply"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The watch graph kept changing for `ttl` consecutive passes.
    #[error("{ttl} digest iterations reached")]
    Diverged { ttl: usize },
    #[error("{0} already in progress")]
    PhaseInProgress(Phase),
}

/// A panic raised by user code that the engine contained.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub origin: &'static str,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.origin, self.message)
    }
}

fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

/// Runs user code, turning a panic into a [`Fault`].
pub(crate) fn isolate<R>(origin: &'static str, f: impl FnOnce() -> R) -> Result<R, Fault> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|err| {
        let fault = Fault {
            message: panic_message(err.as_ref()),
            origin,
        };
        log::error!("{fault}");
        fault
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DigestError::Diverged { ttl: 10 }.to_string(),
            "10 digest iterations reached"
        );
        assert_eq!(
            DigestError::PhaseInProgress(Phase::Digest).to_string(),
            "$digest already in progress"
        );
    }

    #[test]
    fn test_isolate_captures_panic_message() {
        let fault = isolate("listener", || -> () { panic!("boom") }).unwrap_err();
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.to_string(), "listener failed: boom");

        assert_eq!(isolate("watch", || 7).unwrap(), 7);
    }
}
