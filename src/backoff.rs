//! Delay between delivery attempts on the same endpoint.
//!
//! The default is [`Backoff::None`]: a failed attempt is retried immediately and any waiting is
//! left to the transport (its own timeouts). Endpoints that need breathing room can opt into a
//! constant, linear, or exponential delay.
//!
//! Retry semantics: `delay(0)` is the first attempt and is always zero; `delay(n)` is the wait
//! before the n-th retry. Computations that would overflow saturate at [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use flightq::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(9), Duration::from_secs(1));
//! ```

use std::time::Duration;
use thiserror::Error;

/// Upper bound applied to every computed delay (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    MaxNotSupported,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Inter-attempt delay policy for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Same delay before every retry.
    Constant(Duration),
    /// `base * retry`, optionally capped.
    Linear { base: Duration, max: Option<Duration> },
    /// `base * 2^(retry - 1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    pub fn linear(base: Duration) -> Self {
        Self::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Self::Exponential { base, max: None }
    }

    /// Cap a linear or exponential backoff.
    pub fn with_max(self, cap: Duration) -> Result<Self, BackoffError> {
        match self {
            Self::Linear { base, .. } | Self::Exponential { base, .. } if cap < base => {
                Err(BackoffError::MaxLessThanBase { base, max: cap })
            }
            Self::Linear { base, .. } => Ok(Self::Linear { base, max: Some(cap) }),
            Self::Exponential { base, .. } => Ok(Self::Exponential { base, max: Some(cap) }),
            Self::None | Self::Constant(_) => Err(BackoffError::MaxNotSupported),
        }
    }

    /// Delay to wait before retry number `retry` (0 = the first attempt, never delayed).
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let raw = match *self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => delay,
            Self::Linear { base, max } => {
                let factor = retry.min(u32::MAX as usize) as u32;
                cap(base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Self::Exponential { base, max } => {
                let exponent = (retry - 1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let delay = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                cap(delay, max)
            }
        };
        raw.min(MAX_BACKOFF)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map_or(delay, |m| delay.min(m))
}
