/// Ephemeral Execution Runner - one disposable image and container per job
///
/// **Per job:**
/// 1. Materialize the source (and `input.txt`) in a fresh scratch directory
/// 2. Build a single-use image from it (bounded by the build timeout)
/// 3. Run it once: no network, capped memory/CPU, bounded by the job timeout
/// 4. Always remove container, image and scratch directory; cleanup never fails
///
/// Slower than persistent workers, but nothing is shared between jobs.
use crate::context;
use crate::coordinator::CodeExecutor;
use crate::error::ExecutorError;
use crate::language_config::LanguageConfigManager;
use crate::runtime::{BuildRequest, ContainerGuard, ContainerRuntime, ContainerSpec, NetworkMode};
use async_trait::async_trait;
use runbox_common::config::ExecutionLimits;
use runbox_common::types::{ExecutionResult, Language, NO_OUTPUT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const INPUT_FILENAME: &str = "input.txt";

/// Tighter than the persistent workers: nothing but the one program runs
const EPHEMERAL_MEMORY_LIMIT_MB: i64 = 128;

pub struct EphemeralRunner {
    runtime: Arc<dyn ContainerRuntime>,
    languages: LanguageConfigManager,
    docker_dir: PathBuf,
    scratch_root: PathBuf,
    limits: ExecutionLimits,
}

pub fn new_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}

impl EphemeralRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        languages: LanguageConfigManager,
        docker_dir: impl Into<PathBuf>,
        scratch_root: impl Into<PathBuf>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            runtime,
            languages,
            docker_dir: docker_dir.into(),
            scratch_root: scratch_root.into(),
            limits,
        }
    }

    #[instrument(skip(self, code, input), fields(language = %language))]
    pub async fn execute_code(
        &self,
        language: Language,
        code: &str,
        input: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let session_id = new_session_id();
        let session_dir = self.scratch_root.join(&session_id);
        let image_tag = format!("runbox-{}-{}", language, session_id);
        info!(session_id = %session_id, "Starting ephemeral execution");

        let outcome = self
            .run_session(language, code, input, &session_id, &session_dir, &image_tag)
            .await;
        self.cleanup(&session_dir, &image_tag).await;
        outcome
    }

    async fn run_session(
        &self,
        language: Language,
        code: &str,
        input: &str,
        session_id: &str,
        session_dir: &Path,
        image_tag: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let config = self.languages.get(language);
        let dockerfile = self.docker_dir.join(&config.ephemeral_dockerfile);
        if !dockerfile.is_file() {
            return Err(ExecutorError::Config(format!(
                "Dockerfile not found for {}: {}",
                language,
                dockerfile.display()
            )));
        }

        tokio::fs::create_dir_all(session_dir).await?;
        tokio::fs::write(session_dir.join(language.source_filename()), code).await?;
        if !input.is_empty() {
            tokio::fs::write(session_dir.join(INPUT_FILENAME), input).await?;
        }
        tokio::fs::copy(&dockerfile, session_dir.join("Dockerfile")).await?;

        let build_context = context::directory_context(session_dir).await?;
        let build = self.runtime.build_image(BuildRequest {
            tag: image_tag.to_string(),
            dockerfile: "Dockerfile".to_string(),
            context: build_context,
        });
        match tokio::time::timeout(self.limits.ephemeral_build_timeout, build).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Single-use image build failed");
                return Ok(ExecutionResult::failed(format!("Execution error: {}", e)));
            }
            Err(_) => {
                let err = ExecutorError::BuildTimeout {
                    tag: image_tag.to_string(),
                    limit_secs: self.limits.ephemeral_build_timeout.as_secs(),
                };
                warn!(error = %err, "Single-use image build timed out");
                return Ok(ExecutionResult::failed(format!("Build error: {}", err)));
            }
        }

        let spec = ContainerSpec {
            name: Some(format!("runbox-container-{}", session_id)),
            image: image_tag.to_string(),
            memory_bytes: EPHEMERAL_MEMORY_LIMIT_MB * 1024 * 1024,
            nano_cpus: config.nano_cpus(),
            network: NetworkMode::Disabled,
            publish_port: None,
        };
        let container_id = match self.runtime.create_container(spec).await {
            Ok(id) => id,
            Err(e) => return Ok(ExecutionResult::failed(format!("Execution error: {}", e))),
        };
        let guard = ContainerGuard::new(self.runtime.clone(), container_id.clone());

        let result = self.run_container(&container_id).await;

        match self.runtime.remove_container(&container_id).await {
            Ok(()) => guard.disarm(),
            Err(e) if e.is_not_found() => guard.disarm(),
            // leave it armed: the guard retries on drop
            Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
        }
        Ok(result)
    }

    /// Start, wait with the job timeout, collect output
    async fn run_container(&self, container_id: &str) -> ExecutionResult {
        let started = Instant::now();
        if let Err(e) = self.runtime.start_container(container_id).await {
            return ExecutionResult::failed(format!("Execution error: {}", e));
        }

        let exit_code = match tokio::time::timeout(
            self.limits.ephemeral_job_timeout,
            self.runtime.wait_container(container_id),
        )
        .await
        {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return ExecutionResult::failed(format!("Execution error: {}", e)),
            Err(_) => {
                let limit = self.limits.ephemeral_job_timeout;
                warn!(container_id = %container_id, limit_secs = limit.as_secs(), "Job timed out, killing container");
                if let Err(e) = self.runtime.kill_container(container_id).await {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                return ExecutionResult::timed_out(
                    format!(
                        "Error: Code execution timed out ({} second limit). Your code may have an infinite loop or is taking too long to execute.",
                        limit.as_secs()
                    ),
                    limit,
                );
            }
        };
        let elapsed = started.elapsed();

        let logs = match self.runtime.container_logs(container_id).await {
            Ok(logs) => logs,
            Err(e) => return ExecutionResult::failed(format!("Execution error: {}", e)),
        };
        debug!(container_id = %container_id, exit_code, elapsed_ms = elapsed.as_millis() as u64, "Container exited");

        let mut output = if !logs.stdout.is_empty() {
            logs.stdout
        } else if !logs.stderr.is_empty() {
            logs.stderr
        } else {
            NO_OUTPUT.to_string()
        };
        truncate_output(&mut output, self.limits.max_output_bytes);

        match exit_code {
            0 => ExecutionResult::success(output, elapsed),
            137 => {
                output.push_str("\n[Container killed: likely exceeded memory limit]");
                ExecutionResult::program_error(output, elapsed)
            }
            139 => {
                output.push_str("\n[Container killed: segmentation fault]");
                ExecutionResult::program_error(output, elapsed)
            }
            _ => ExecutionResult::program_error(output, elapsed),
        }
    }

    /// Best-effort: logs what it could not remove, never fails
    async fn cleanup(&self, session_dir: &Path, image_tag: &str) {
        match self.runtime.remove_image(image_tag).await {
            Ok(()) => debug!(image = %image_tag, "Removed single-use image"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(image = %image_tag, error = %e, "Failed to remove single-use image"),
        }
        match tokio::fs::remove_dir_all(session_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %session_dir.display(), error = %e, "Failed to remove scratch directory"),
        }
    }
}

fn truncate_output(output: &mut String, max_bytes: usize) {
    if output.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n[output truncated]");
}

#[async_trait]
impl CodeExecutor for EphemeralRunner {
    async fn execute(&self, language: Language, code: &str, input: &str) -> Result<ExecutionResult, ExecutorError> {
        self.execute_code(language, code, input).await
    }

    fn strategy(&self) -> &'static str {
        "ephemeral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerLogs, MockContainerRuntime};
    use std::time::Duration;

    struct Fixture {
        docker_dir: tempfile::TempDir,
        scratch: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let docker_dir = tempfile::tempdir().unwrap();
            for lang in Language::ALL {
                std::fs::write(
                    docker_dir.path().join(lang.default_ephemeral_dockerfile()),
                    "FROM scratch",
                )
                .unwrap();
            }
            Self {
                docker_dir,
                scratch: tempfile::tempdir().unwrap(),
            }
        }

        fn runner(&self, runtime: MockContainerRuntime, limits: ExecutionLimits) -> EphemeralRunner {
            EphemeralRunner::new(
                Arc::new(runtime),
                LanguageConfigManager::builtin(),
                self.docker_dir.path(),
                self.scratch.path(),
                limits,
            )
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    fn happy_runtime(exit_code: i64, logs: ContainerLogs) -> MockContainerRuntime {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_build_image().times(1).returning(|_| Ok(()));
        runtime
            .expect_create_container()
            .withf(|spec| spec.network == NetworkMode::Disabled && spec.publish_port.is_none())
            .returning(|_| Ok("eph-1".to_string()));
        runtime.expect_start_container().returning(|_| Ok(()));
        runtime.expect_wait_container().returning(move |_| Ok(exit_code));
        runtime
            .expect_container_logs()
            .returning(move |_| Ok(logs.clone()));
        runtime.expect_remove_container().times(1).returning(|_| Ok(()));
        runtime.expect_remove_image().times(1).returning(|_| Ok(()));
        runtime
    }

    #[tokio::test]
    async fn test_successful_run_cleans_up_everything() {
        let fixture = Fixture::new();
        let runtime = happy_runtime(
            0,
            ContainerLogs {
                stdout: "Hello, World!\n".to_string(),
                stderr: String::new(),
            },
        );
        let runner = fixture.runner(runtime, ExecutionLimits::default());

        let result = runner
            .execute_code(Language::Python, "print('Hello, World!')", "")
            .await
            .unwrap();
        assert!(!result.error);
        assert_eq!(result.output, "Hello, World!\n");
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_build_context_holds_source_input_and_dockerfile() {
        let fixture = Fixture::new();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_build_image()
            .withf(|req| {
                let mut archive = tar::Archive::new(req.context.as_slice());
                let names: Vec<String> = archive
                    .entries()
                    .unwrap()
                    .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
                    .collect();
                req.tag.starts_with("runbox-cpp-session_")
                    && names.iter().any(|n| n.ends_with("main.cpp"))
                    && names.iter().any(|n| n.ends_with("input.txt"))
                    && names.iter().any(|n| n.ends_with("Dockerfile"))
            })
            .times(1)
            .returning(|_| Err(ExecutorError::ImageBuild {
                tag: "t".to_string(),
                reason: "stop here".to_string(),
            }));
        runtime.expect_create_container().never();
        runtime.expect_remove_image().returning(|tag| Err(ExecutorError::ContainerNotFound(tag.to_string())));

        let runner = fixture.runner(runtime, ExecutionLimits::default());
        let result = runner.execute_code(Language::Cpp, "int main(){}", "5").await.unwrap();
        assert!(result.error);
        assert_eq!(result.execution_time, "Failed");
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_prefers_stderr_when_stdout_empty() {
        let fixture = Fixture::new();
        let runtime = happy_runtime(
            1,
            ContainerLogs {
                stdout: String::new(),
                stderr: "main.cpp:2:17: error: 'undeclared' was not declared in this scope".to_string(),
            },
        );
        let runner = fixture.runner(runtime, ExecutionLimits::default());

        let result = runner
            .execute_code(Language::Cpp, "#include <iostream>\nint main(){ undeclared = 5; }", "")
            .await
            .unwrap();
        assert!(result.error);
        assert!(result.output.contains("error"));
    }

    /// Delegates to the mock, except that the chosen step never completes
    struct Stalls {
        inner: MockContainerRuntime,
        build: bool,
    }

    #[async_trait]
    impl ContainerRuntime for Stalls {
        async fn build_image(&self, request: BuildRequest) -> Result<(), ExecutorError> {
            if self.build {
                return std::future::pending().await;
            }
            self.inner.build_image(request).await
        }
        async fn remove_image(&self, tag: &str) -> Result<(), ExecutorError> {
            self.inner.remove_image(tag).await
        }
        async fn inspect_container(&self, name_or_id: &str) -> Result<Option<crate::runtime::ContainerStatus>, ExecutorError> {
            self.inner.inspect_container(name_or_id).await
        }
        async fn create_container(&self, spec: ContainerSpec) -> Result<String, ExecutorError> {
            self.inner.create_container(spec).await
        }
        async fn start_container(&self, id: &str) -> Result<(), ExecutorError> {
            self.inner.start_container(id).await
        }
        async fn stop_container(&self, id: &str) -> Result<(), ExecutorError> {
            self.inner.stop_container(id).await
        }
        async fn kill_container(&self, id: &str) -> Result<(), ExecutorError> {
            self.inner.kill_container(id).await
        }
        async fn remove_container(&self, id: &str) -> Result<(), ExecutorError> {
            self.inner.remove_container(id).await
        }
        async fn wait_container(&self, id: &str) -> Result<i64, ExecutorError> {
            if !self.build {
                return std::future::pending().await;
            }
            self.inner.wait_container(id).await
        }
        async fn container_logs(&self, id: &str) -> Result<ContainerLogs, ExecutorError> {
            self.inner.container_logs(id).await
        }
    }

    #[tokio::test]
    async fn test_job_timeout_kills_container() {
        let fixture = Fixture::new();
        let mut mock = MockContainerRuntime::new();
        mock.expect_build_image().returning(|_| Ok(()));
        mock.expect_create_container().returning(|_| Ok("eph-loop".to_string()));
        mock.expect_start_container().returning(|_| Ok(()));
        mock.expect_kill_container()
            .withf(|id| id == "eph-loop")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_container_logs().never();
        mock.expect_remove_container().times(1).returning(|_| Ok(()));
        mock.expect_remove_image().times(1).returning(|_| Ok(()));

        let limits = ExecutionLimits {
            ephemeral_job_timeout: Duration::from_millis(50),
            ..ExecutionLimits::default()
        };
        let runner = EphemeralRunner::new(
            Arc::new(Stalls {
                inner: mock,
                build: false,
            }),
            LanguageConfigManager::builtin(),
            fixture.docker_dir.path(),
            fixture.scratch.path(),
            limits,
        );

        let result = runner.execute_code(Language::Python, "while True: pass", "").await.unwrap();
        assert!(result.error);
        assert!(result.is_timeout());
        assert!(result.output.contains("timed out"));
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_wait_failure_is_failed_result() {
        let fixture = Fixture::new();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_build_image().returning(|_| Ok(()));
        runtime.expect_create_container().returning(|_| Ok("eph-2".to_string()));
        runtime.expect_start_container().returning(|_| Ok(()));
        runtime
            .expect_wait_container()
            .returning(|_| Err(ExecutorError::Transport("daemon went away".to_string())));
        runtime.expect_remove_container().returning(|_| Ok(()));
        runtime.expect_remove_image().returning(|_| Ok(()));

        let runner = fixture.runner(runtime, ExecutionLimits::default());
        let result = runner.execute_code(Language::Python, "print(1)", "").await.unwrap();
        assert_eq!(result.execution_time, "Failed");
        assert!(result.output.contains("daemon went away"));
    }

    #[tokio::test]
    async fn test_build_timeout_is_reported_as_failed_build() {
        let fixture = Fixture::new();
        let mut mock = MockContainerRuntime::new();
        mock.expect_create_container().never();
        mock.expect_remove_image().times(1).returning(|_| Ok(()));

        let limits = ExecutionLimits {
            ephemeral_build_timeout: Duration::from_millis(50),
            ..ExecutionLimits::default()
        };
        let runner = EphemeralRunner::new(
            Arc::new(Stalls {
                inner: mock,
                build: true,
            }),
            LanguageConfigManager::builtin(),
            fixture.docker_dir.path(),
            fixture.scratch.path(),
            limits,
        );
        let result = runner.execute_code(Language::Javascript, "console.log(1)", "").await.unwrap();

        assert!(result.error);
        assert!(result.output.starts_with("Build error: Image build for runbox-javascript-session_"));
        assert_eq!(result.execution_time, "Failed");
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_missing_dockerfile_raises_config_error() {
        let fixture = Fixture::new();
        std::fs::remove_file(fixture.docker_dir.path().join("Dockerfile.python")).unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_build_image().never();
        runtime.expect_remove_image().returning(|tag| Err(ExecutorError::ContainerNotFound(tag.to_string())));

        let runner = fixture.runner(runtime, ExecutionLimits::default());
        let err = runner.execute_code(Language::Python, "print(1)", "").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(a.starts_with("session_"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut s = "ééééé".to_string();
        truncate_output(&mut s, 3);
        assert!(s.starts_with('é'));
        assert!(s.ends_with("[output truncated]"));

        let mut short = "ok".to_string();
        truncate_output(&mut short, 10);
        assert_eq!(short, "ok");
    }
}
