/// Execution Service - wires a strategy to Docker and owns its lifecycle
///
/// Built once at process start. Holds the coordinator callers use plus, for
/// the persistent strategy, the worker pool and session client that need
/// explicit startup and shutdown.
use crate::context::BuildPaths;
use crate::coordinator::{CodeExecutor, ExecutionCoordinator};
use crate::docker::DockerRuntime;
use crate::ephemeral::EphemeralRunner;
use crate::error::ExecutorError;
use crate::language_config::{LanguageConfigManager, DEFAULT_CONFIG_PATH};
use crate::runtime::ContainerRuntime;
use crate::session::{SessionClient, DEFAULT_WORKER_HOST};
use crate::supervisor::WorkerPool;
use runbox_common::config::ExecutionLimits;
use runbox_common::types::Language;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Persistent,
    Ephemeral,
}

impl FromStr for Strategy {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(Strategy::Persistent),
            "ephemeral" => Ok(Strategy::Ephemeral),
            other => Err(ExecutorError::Config(format!(
                "Unknown EXECUTION_STRATEGY '{}' (expected persistent or ephemeral)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub strategy: Strategy,
    pub workspace_root: PathBuf,
    pub docker_dir: PathBuf,
    pub config_path: PathBuf,
    /// Parent of the ephemeral runner's per-job directories
    pub scratch_dir: PathBuf,
    pub worker_host: String,
    pub limits: ExecutionLimits,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Persistent,
            workspace_root: PathBuf::from("."),
            docker_dir: PathBuf::from("docker"),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            scratch_dir: std::env::temp_dir().join("runbox"),
            worker_host: DEFAULT_WORKER_HOST.to_string(),
            limits: ExecutionLimits::default(),
        }
    }
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self, ExecutorError> {
        let defaults = Self::default();
        let strategy = match std::env::var("EXECUTION_STRATEGY") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => defaults.strategy,
        };
        let workspace_root = env_path("RUNBOX_WORKSPACE").unwrap_or(defaults.workspace_root);
        let docker_dir = env_path("RUNBOX_DOCKER_DIR").unwrap_or_else(|| workspace_root.join("docker"));
        let config_path =
            env_path("RUNBOX_CONFIG").unwrap_or_else(|| workspace_root.join(DEFAULT_CONFIG_PATH));

        Ok(Self {
            strategy,
            workspace_root,
            docker_dir,
            config_path,
            scratch_dir: env_path("RUNBOX_SCRATCH_DIR").unwrap_or(defaults.scratch_dir),
            worker_host: std::env::var("RUNBOX_WORKER_HOST").unwrap_or(defaults.worker_host),
            limits: ExecutionLimits::from_env(),
        })
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}

pub struct ExecutionService {
    coordinator: ExecutionCoordinator,
    pool: Option<Arc<WorkerPool>>,
    sessions: Option<Arc<SessionClient>>,
}

impl ExecutionService {
    /// Connect to the local Docker daemon and assemble the configured strategy
    pub async fn connect(settings: ServiceSettings) -> Result<Self, ExecutorError> {
        let docker = DockerRuntime::connect()?;
        docker.ping().await?;
        info!("Connected to Docker daemon");

        let languages = LanguageConfigManager::load_or_builtin(&settings.config_path)?;
        Ok(Self::with_runtime(Arc::new(docker), languages, settings))
    }

    pub fn with_runtime(
        runtime: Arc<dyn ContainerRuntime>,
        languages: LanguageConfigManager,
        settings: ServiceSettings,
    ) -> Self {
        match settings.strategy {
            Strategy::Persistent => {
                let pool = Arc::new(WorkerPool::new(
                    runtime,
                    languages,
                    BuildPaths::new(&settings.workspace_root, &settings.docker_dir),
                    settings.limits.clone(),
                ));
                let sessions = Arc::new(SessionClient::with_host(
                    pool.clone(),
                    settings.limits,
                    settings.worker_host,
                ));
                Self {
                    coordinator: ExecutionCoordinator::new(sessions.clone()),
                    pool: Some(pool),
                    sessions: Some(sessions),
                }
            }
            Strategy::Ephemeral => {
                let runner = EphemeralRunner::new(
                    runtime,
                    languages,
                    settings.docker_dir,
                    settings.scratch_dir,
                    settings.limits,
                );
                Self::from_executor(Arc::new(runner))
            }
        }
    }

    /// A service with no lifecycle of its own around `executor`
    pub fn from_executor(executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            coordinator: ExecutionCoordinator::new(executor),
            pool: None,
            sessions: None,
        }
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    /// `None` for the ephemeral strategy
    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// Start every language's worker; returns the ones that came up.
    /// A no-op for the ephemeral strategy.
    pub async fn start_workers(&self) -> Vec<Language> {
        match &self.pool {
            Some(pool) => pool.start_all_containers().await,
            None => Vec::new(),
        }
    }

    /// Close worker connections, then stop the workers. Never fails.
    pub async fn shutdown(&self) {
        if let Some(sessions) = &self.sessions {
            sessions.close_all_connections().await;
        }
        if let Some(pool) = &self.pool {
            pool.stop_all_containers().await;
        }
        info!("Execution service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::MockCodeExecutor;
    use crate::runtime::{ContainerStatus, MockContainerRuntime};

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("persistent".parse::<Strategy>().unwrap(), Strategy::Persistent);
        assert_eq!(" Ephemeral ".parse::<Strategy>().unwrap(), Strategy::Ephemeral);
        assert!("pooled".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_persistent_service_has_pool() {
        let service = ExecutionService::with_runtime(
            Arc::new(MockContainerRuntime::new()),
            LanguageConfigManager::builtin(),
            ServiceSettings::default(),
        );
        assert!(service.pool().is_some());
        assert_eq!(service.coordinator().strategy(), "persistent");
    }

    #[tokio::test]
    async fn test_ephemeral_service_has_no_workers() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_create_container().never();
        let settings = ServiceSettings {
            strategy: Strategy::Ephemeral,
            ..ServiceSettings::default()
        };
        let service =
            ExecutionService::with_runtime(Arc::new(runtime), LanguageConfigManager::builtin(), settings);

        assert!(service.pool().is_none());
        assert_eq!(service.coordinator().strategy(), "ephemeral");
        assert!(service.start_workers().await.is_empty());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_registered_workers() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_inspect_container().returning(|name| {
            Ok(Some(ContainerStatus {
                id: format!("{}-id", name),
                running: true,
                host_port: Some(40000),
                ip_address: None,
            }))
        });
        runtime.expect_stop_container().times(3).returning(|_| Ok(()));
        runtime.expect_remove_container().returning(|_| Ok(()));

        let settings = ServiceSettings {
            limits: ExecutionLimits {
                worker_settle_delay: std::time::Duration::ZERO,
                ..ExecutionLimits::default()
            },
            ..ServiceSettings::default()
        };
        let service =
            ExecutionService::with_runtime(Arc::new(runtime), LanguageConfigManager::builtin(), settings);

        let pool = service.pool().unwrap();
        for lang in Language::ALL {
            pool.start_container(lang).await.unwrap();
        }
        service.shutdown().await;
        for lang in Language::ALL {
            assert!(service.pool().unwrap().handle(lang).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_from_executor_uses_given_strategy() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_strategy().return_const("mock");
        let service = ExecutionService::from_executor(Arc::new(mock));
        assert_eq!(service.coordinator().strategy(), "mock");
        service.shutdown().await;
    }
}
