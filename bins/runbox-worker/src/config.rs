// Worker settings, read once from the container environment
use anyhow::{anyhow, Result};
use runbox_common::config::ExecutionLimits;
use runbox_common::protocol::WORKER_PORT;
use runbox_common::types::Language;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub language: Language,
    pub port: u16,
    pub job_timeout: Duration,
    pub max_output_bytes: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let language = std::env::var("WORKER_LANGUAGE")
            .map_err(|_| anyhow!("WORKER_LANGUAGE is not set"))?;
        let port = std::env::var("WORKER_PORT").ok();
        Self::from_values(&language, port.as_deref(), ExecutionLimits::from_env())
    }

    fn from_values(language: &str, port: Option<&str>, limits: ExecutionLimits) -> Result<Self> {
        let language: Language = language.parse().map_err(|e| {
            anyhow!(
                "{} (valid options: {})",
                e,
                Language::ALL.map(|l| l.id()).join(", ")
            )
        })?;
        let port = match port {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid WORKER_PORT: {}", p))?,
            None => WORKER_PORT,
        };

        Ok(Self {
            language,
            port,
            job_timeout: limits.worker_job_timeout,
            max_output_bytes: limits.max_output_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_values("cpp", None, ExecutionLimits::default()).unwrap();
        assert_eq!(config.language, Language::Cpp);
        assert_eq!(config.port, 8765);
        assert_eq!(config.job_timeout, Duration::from_secs(10));
        assert_eq!(config.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_rejects_unknown_language() {
        let err = WorkerConfig::from_values("java", None, ExecutionLimits::default()).unwrap_err();
        assert!(err.to_string().contains("python, javascript, cpp"));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(WorkerConfig::from_values("python", Some("http"), ExecutionLimits::default()).is_err());
        let config = WorkerConfig::from_values("python", Some("9000"), ExecutionLimits::default()).unwrap();
        assert_eq!(config.port, 9000);
    }
}
