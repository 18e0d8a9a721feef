// Timeout and size limits shared by host and worker
use std::time::Duration;

/// The three independent timeout layers plus the connection/settle delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Worker-internal per-job limit (bounds runaway user code)
    pub worker_job_timeout: Duration,
    /// Session client backstop for a hung or unresponsive worker
    pub transport_timeout: Duration,
    /// Opening a connection to a worker endpoint
    pub connect_timeout: Duration,
    /// Wait after a worker container starts before it is used
    pub worker_settle_delay: Duration,
    /// Ephemeral runner: container run limit
    pub ephemeral_job_timeout: Duration,
    /// Ephemeral runner: single-use image build limit
    pub ephemeral_build_timeout: Duration,
    /// Worker-side cap on captured stdout/stderr, per stream
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            worker_job_timeout: Duration::from_secs(10),
            transport_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            worker_settle_delay: Duration::from_millis(2000),
            ephemeral_job_timeout: Duration::from_secs(10),
            ephemeral_build_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    /// Defaults overridden by `*_SECS` / `*_MS` / `*_BYTES` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_job_timeout: env_secs("WORKER_JOB_TIMEOUT_SECS", defaults.worker_job_timeout),
            transport_timeout: env_secs("TRANSPORT_TIMEOUT_SECS", defaults.transport_timeout),
            connect_timeout: env_secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            worker_settle_delay: env_millis("WORKER_SETTLE_MS", defaults.worker_settle_delay),
            ephemeral_job_timeout: env_secs("EPHEMERAL_JOB_TIMEOUT_SECS", defaults.ephemeral_job_timeout),
            ephemeral_build_timeout: env_secs(
                "EPHEMERAL_BUILD_TIMEOUT_SECS",
                defaults.ephemeral_build_timeout,
            ),
            max_output_bytes: env_parse("WORKER_MAX_OUTPUT_BYTES").unwrap_or(defaults.max_output_bytes),
        }
    }
}

/// `EXECUTORS_ENABLED`: anything but a case-insensitive "false" enables
pub fn executors_enabled() -> bool {
    parse_enabled(std::env::var("EXECUTORS_ENABLED").ok().as_deref())
}

fn parse_enabled(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().eq_ignore_ascii_case("false")).unwrap_or(true)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key).map(Duration::from_secs).unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key).map(Duration::from_millis).unwrap_or(default)
}
