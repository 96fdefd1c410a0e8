//! Advisory cost and time guardrails for one session.
//!
//! Guard methods never block or abort anything: callers are contractually
//! required to consult them before acting and to skip, not error, when a
//! limit has been reached.

use std::time::{Duration, Instant};

const SECONDS_PER_MINUTE: f64 = 60.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Limits applied to one session, passed in explicitly at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostLimits {
    /// Maximum number of instances the session may create.
    pub max_instances: u32,
    /// Maximum session length in minutes.
    pub max_session_minutes: u64,
    /// Hourly price of one instance, used for the cost estimate.
    pub hourly_unit_cost: f64,
}

impl CostLimits {
    /// Builds limits from the configuration's minute-denominated value.
    #[must_use]
    pub const fn new(max_instances: u32, max_session_minutes: u64, hourly_unit_cost: f64) -> Self {
        Self {
            max_instances,
            max_session_minutes,
            hourly_unit_cost,
        }
    }

    /// Returns the session limit as a duration.
    #[must_use]
    pub const fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_minutes * 60)
    }
}

/// Point-in-time view of the session counters.
#[derive(Clone, Debug, PartialEq)]
pub struct CostSummary {
    /// Instances created so far.
    pub created: u32,
    /// Configured instance limit.
    pub max_instances: u32,
    /// Minutes elapsed since the session started.
    pub elapsed_minutes: f64,
    /// Configured session limit in minutes.
    pub max_minutes: u64,
    /// Estimated session cost in the provider's billing currency.
    pub estimated_cost: f64,
}

/// Advisory counters for instances created and elapsed session time.
#[derive(Clone, Debug)]
pub struct CostGuard {
    limits: CostLimits,
    started: Instant,
    created: u32,
}

impl CostGuard {
    /// Starts a new session clock with the given limits.
    #[must_use]
    pub fn new(limits: CostLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            created: 0,
        }
    }

    /// Overrides the session start.
    ///
    /// This is primarily used by tests to exercise timeout boundaries
    /// without sleeping.
    #[must_use]
    pub const fn with_session_started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// Returns `true` while another instance may still be created.
    #[must_use]
    pub const fn check_instance_limit(&self) -> bool {
        self.created < self.limits.max_instances
    }

    /// Returns `true` while the session is strictly below its time limit.
    ///
    /// At the boundary the session counts as timed out.
    #[must_use]
    pub fn check_timeout(&self) -> bool {
        self.started.elapsed() < self.limits.max_session()
    }

    /// Records one instance creation. The counter is never decremented.
    pub const fn record_instance(&mut self) {
        self.created += 1;
    }

    /// Estimates the session cost so far.
    ///
    /// Every created instance is charged for the full elapsed session time
    /// rather than its own lifetime; the estimate deliberately overstates
    /// cost for short-lived instances inside long sessions.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "cost estimation is inherently floating-point"
    )]
    pub fn estimate_cost(&self) -> f64 {
        let hours = self.started.elapsed().as_secs_f64() / SECONDS_PER_HOUR;
        f64::from(self.created) * self.limits.hourly_unit_cost * hours
    }

    /// Returns the current session counters and estimate.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "elapsed minutes are reported as a fraction"
    )]
    pub fn summary(&self) -> CostSummary {
        CostSummary {
            created: self.created,
            max_instances: self.limits.max_instances,
            elapsed_minutes: self.started.elapsed().as_secs_f64() / SECONDS_PER_MINUTE,
            max_minutes: self.limits.max_session_minutes,
            estimated_cost: self.estimate_cost(),
        }
    }
}
