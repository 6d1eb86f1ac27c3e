use std::env;
use std::time::Duration;

/// What to do with an optimistic mark when the gateway rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave the local mark in place and surface the error.
    #[default]
    KeepOptimistic,
    /// Restore the previous status unless a newer local mark superseded it.
    Revert,
}

impl FailurePolicy {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep_optimistic" => Some(FailurePolicy::KeepOptimistic),
            "revert" | "rollback" => Some(FailurePolicy::Revert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceConfig {
    /// Period of the token refresh loop. Must stay below the credential
    /// lifetime with room for one missed tick.
    pub token_refresh_period: Duration,
    pub max_week: u32,
    pub failure_policy: FailurePolicy,
}

impl AttendanceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let token_refresh_period = env::var("RAWUH_TOKEN_REFRESH_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.token_refresh_period);
        let max_week = env::var("RAWUH_MAX_WEEK")
            .ok()
            .and_then(|val| val.parse().ok())
            .filter(|weeks| *weeks > 0)
            .unwrap_or(defaults.max_week);
        let failure_policy = env::var("RAWUH_MARK_FAILURE_POLICY")
            .ok()
            .and_then(|val| FailurePolicy::from_env_value(&val))
            .unwrap_or(defaults.failure_policy);

        Self {
            token_refresh_period,
            max_week,
            failure_policy,
        }
    }

    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.token_refresh_period = period;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            token_refresh_period: Duration::from_secs(30),
            max_week: 16,
            failure_policy: FailurePolicy::KeepOptimistic,
        }
    }
}
