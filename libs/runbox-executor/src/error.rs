use runbox_common::types::Language;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    // request validation: nothing was contacted
    #[error("Code and language are required")]
    MissingField,

    #[error("Unsupported language '{0}'. Supported: python, cpp, javascript")]
    UnsupportedLanguage(String),

    // infrastructure: the subsystem itself is unhealthy
    #[error("{0} worker not found")]
    WorkerNotRegistered(Language),

    #[error("Failed to start {language} worker: {reason}")]
    WorkerStart { language: Language, reason: String },

    #[error("Failed to build image {tag}: {reason}")]
    ImageBuild { tag: String, reason: String },

    #[error("Image build for {tag} exceeded {limit_secs} second limit")]
    BuildTimeout { tag: String, limit_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    // transport: our plumbing failed, not the user's program
    #[error("Could not connect to {language} executor: {reason}")]
    Connect { language: Language, reason: String },

    #[error("{0}")]
    Transport(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Request-validation failures (HTTP 400 territory)
    pub fn is_validation(&self) -> bool {
        matches!(self, ExecutorError::MissingField | ExecutorError::UnsupportedLanguage(_))
    }

    /// Deployment-level failures that should propagate rather than become a job result
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ExecutorError::WorkerStart { .. }
                | ExecutorError::ImageBuild { .. }
                | ExecutorError::BuildTimeout { .. }
                | ExecutorError::Config(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutorError::ContainerNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ExecutorError::MissingField.is_validation());
        assert!(ExecutorError::UnsupportedLanguage("ruby".into()).is_validation());
        assert!(!ExecutorError::MissingField.is_infrastructure());

        let start = ExecutorError::WorkerStart {
            language: Language::Cpp,
            reason: "no image".into(),
        };
        assert!(start.is_infrastructure());
        assert!(!start.is_validation());

        let connect = ExecutorError::Connect {
            language: Language::Python,
            reason: "refused".into(),
        };
        assert!(!connect.is_infrastructure());
        assert!(!connect.is_validation());
    }

    #[test]
    fn test_unsupported_language_message_lists_languages() {
        let msg = ExecutorError::UnsupportedLanguage("ruby".into()).to_string();
        assert!(msg.contains("ruby"));
        assert!(msg.contains("python, cpp, javascript"));
    }
}
