/// Execution Coordinator - the single public entry point
///
/// **Contract:**
/// - validation errors are returned before any worker is contacted
/// - infrastructure errors (worker could not be built/started) propagate
/// - every other failure becomes an `ExecutionResult` with `error: true`
///
/// The coordinator knows nothing about how code runs; that is the
/// [`CodeExecutor`] behind it (persistent workers or ephemeral containers).
use crate::error::ExecutorError;
use async_trait::async_trait;
use runbox_common::types::{supported_languages, ExecutionRequest, ExecutionResult, Language, LanguageInfo};
use std::sync::Arc;
use tracing::{error, info};

/// One way of running a job. Both strategies produce the same result shape.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, language: Language, code: &str, input: &str) -> Result<ExecutionResult, ExecutorError>;

    /// Short name for logs and metrics
    fn strategy(&self) -> &'static str;
}

#[derive(Clone)]
pub struct ExecutionCoordinator {
    executor: Arc<dyn CodeExecutor>,
}

impl ExecutionCoordinator {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self { executor }
    }

    /// Check required fields and resolve the language
    pub fn validate(request: &ExecutionRequest) -> Result<Language, ExecutorError> {
        if request.code.is_empty() || request.language.is_empty() {
            return Err(ExecutorError::MissingField);
        }
        request
            .language
            .parse::<Language>()
            .map_err(|e| ExecutorError::UnsupportedLanguage(e.0))
    }

    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        let language = Self::validate(request)?;

        info!(
            language = %language,
            strategy = self.executor.strategy(),
            code_bytes = request.code.len(),
            input_bytes = request.input.len(),
            "Executing code"
        );

        match self.executor.execute(language, &request.code, &request.input).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_infrastructure() => {
                error!(language = %language, error = %e, "Execution subsystem unavailable");
                Err(e)
            }
            Err(e) => {
                error!(language = %language, error = %e, "Execution failed unexpectedly");
                Ok(ExecutionResult::failed(format!("Execution error: {}", e)))
            }
        }
    }

    pub fn strategy(&self) -> &'static str {
        self.executor.strategy()
    }

    pub fn supported_languages() -> Vec<LanguageInfo> {
        supported_languages()
    }
}
