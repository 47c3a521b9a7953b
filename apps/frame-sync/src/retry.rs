use std::time::Duration;

use clap::ValueEnum;

/// How the host retries delivery of a pinned height while the guest may not
/// be listening yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Attempt delivery whenever a validated message arrives from the guest.
    /// Retries stop when the controller is torn down.
    #[default]
    EventDriven,
    /// Attempt delivery on a fixed schedule: attempt `n` (zero-based) runs at
    /// `n * interval` after mount. Once `max_attempts` pass without a live
    /// frame handle, the host keeps its fallback height.
    Polling {
        max_attempts: u32,
        interval: Duration,
    },
}

impl RetryPolicy {
    pub const DEFAULT_POLL_ATTEMPTS: u32 = 50;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

    pub fn polling() -> Self {
        RetryPolicy::Polling {
            max_attempts: Self::DEFAULT_POLL_ATTEMPTS,
            interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn is_event_driven(&self) -> bool {
        matches!(self, RetryPolicy::EventDriven)
    }

    /// Upper bound on how long polling keeps trying, if bounded at all.
    pub fn budget(&self) -> Option<Duration> {
        match self {
            RetryPolicy::EventDriven => None,
            RetryPolicy::Polling {
                max_attempts,
                interval,
            } => Some(interval.saturating_mul(max_attempts.saturating_sub(1))),
        }
    }
}

/// Strategy names as they appear on the command line and in the environment.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum RetryStrategy {
    #[default]
    #[value(alias = "event-driven")]
    Event,
    #[value(alias = "polling")]
    Poll,
}

impl RetryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryStrategy::Event => "event",
            RetryStrategy::Poll => "poll",
        }
    }

    pub fn into_policy(self, max_attempts: u32, interval: Duration) -> RetryPolicy {
        match self {
            RetryStrategy::Event => RetryPolicy::EventDriven,
            RetryStrategy::Poll => RetryPolicy::Polling {
                max_attempts,
                interval,
            },
        }
    }
}
