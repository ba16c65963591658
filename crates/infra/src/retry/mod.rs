//! Timeout-bounded retries with exponential backoff.
//!
//! One executor serves every call site; what differs between call sites is the
//! [`RetryPolicy`] value it is built with.

mod executor;
mod policy;

pub use executor::{AttemptError, RetryExecutor};
pub use policy::RetryPolicy;

/// Closed classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt (network, timeouts, 5xx, rate limits).
    Transient,
    /// Retrying cannot help (quota, permissions, bad input).
    Terminal,
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn failure_kind(&self) -> FailureKind;

    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}
