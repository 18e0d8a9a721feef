/// Container Runtime - the isolation primitives the rest of the crate depends on
///
/// Supervisor and ephemeral runner only ever talk to this trait, so the
/// isolation technology behind it can change without touching their logic.
/// Production uses [`DockerRuntime`](crate::docker::DockerRuntime).
use crate::error::ExecutorError;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Reachable from the host; needed for a worker's control endpoint
    Bridge,
    /// No network at all
    Disabled,
}

/// Everything needed to create one container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub network: NetworkMode,
    /// Container port to publish on an ephemeral host port
    pub publish_port: Option<u16>,
}

/// An image build from an in-memory tar context
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub tag: String,
    /// Path of the Dockerfile inside the context
    pub dockerfile: String,
    pub context: Vec<u8>,
}

/// What an inspection reports about a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub id: String,
    pub running: bool,
    pub host_port: Option<u16>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build (or deterministically rebuild) an image
    async fn build_image(&self, request: BuildRequest) -> Result<(), ExecutorError>;

    /// Remove an image; `ContainerNotFound` if it does not exist
    async fn remove_image(&self, tag: &str) -> Result<(), ExecutorError>;

    /// `Ok(None)` when no container has this name or id
    async fn inspect_container(&self, name_or_id: &str) -> Result<Option<ContainerStatus>, ExecutorError>;

    /// Returns the new container's id
    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ExecutorError>;

    async fn start_container(&self, id: &str) -> Result<(), ExecutorError>;

    /// Graceful stop; a container that is already stopped is not an error
    async fn stop_container(&self, id: &str) -> Result<(), ExecutorError>;

    async fn kill_container(&self, id: &str) -> Result<(), ExecutorError>;

    /// Forced removal
    async fn remove_container(&self, id: &str) -> Result<(), ExecutorError>;

    /// Blocks until the container exits; returns its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, ExecutorError>;

    async fn container_logs(&self, id: &str) -> Result<ContainerLogs, ExecutorError>;
}

/// Container cleanup guard - guarantees container removal on drop
///
/// Covers panics and cancelled futures; the normal path removes the
/// container explicitly and then [`disarm`](Self::disarm)s the guard.
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: Option<String>,
}

impl ContainerGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container_id: String) -> Self {
        Self {
            runtime,
            container_id: Some(container_id),
        }
    }

    pub fn disarm(mut self) {
        self.container_id = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        // cannot await in Drop
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(container_id = %container_id, "No runtime to clean up container");
            return;
        };
        let runtime = self.runtime.clone();
        handle.spawn(async move {
            if let Err(e) = runtime.remove_container(&container_id).await {
                if !e.is_not_found() {
                    tracing::warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
                }
            }
        });
    }
}
