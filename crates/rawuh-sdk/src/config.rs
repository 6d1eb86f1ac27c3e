use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://service.rawuh.rofiq.dev";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let base_url = env::var("RAWUH_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let request_timeout = env::var("RAWUH_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|val| parse_timeout(&val))
            .unwrap_or(Duration::from_secs(15));

        Self::default()
            .with_base_url(base_url)
            .with_request_timeout(request_timeout)
    }

    /// Override the gateway base URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Whole seconds, strictly positive.
fn parse_timeout(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}
