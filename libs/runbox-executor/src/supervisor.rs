/// Worker Supervisor - one long-lived worker container per language
///
/// **Invariant:** at most one live [`WorkerHandle`] per language. Starts and
/// stops for a language are serialized by that language's slot lock, and
/// `start_container` reuses a running container with the registered name,
/// so concurrent callers can never double-start a worker.
///
/// Registration is authoritative in-process: the platform is consulted
/// only at start/stop boundaries and by the health probe.
use crate::context::{self, BuildPaths};
use crate::error::ExecutorError;
use crate::language_config::LanguageConfigManager;
use crate::runtime::{BuildRequest, ContainerRuntime, ContainerSpec, ContainerStatus, NetworkMode};
use futures_util::future::join_all;
use runbox_common::config::ExecutionLimits;
use runbox_common::protocol::WORKER_PORT;
use runbox_common::types::Language;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// A registered, started worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub language: Language,
    pub container_id: String,
    pub host_port: Option<u16>,
}

pub struct WorkerPool {
    runtime: Arc<dyn ContainerRuntime>,
    languages: LanguageConfigManager,
    build_paths: BuildPaths,
    limits: ExecutionLimits,
    workers: HashMap<Language, Mutex<Option<WorkerHandle>>>,
}

impl WorkerPool {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        languages: LanguageConfigManager,
        build_paths: BuildPaths,
        limits: ExecutionLimits,
    ) -> Self {
        let workers = Language::ALL.iter().map(|lang| (*lang, Mutex::new(None))).collect();
        Self {
            runtime,
            languages,
            build_paths,
            limits,
            workers,
        }
    }

    fn slot(&self, language: Language) -> &Mutex<Option<WorkerHandle>> {
        // one slot per variant, created in new()
        &self.workers[&language]
    }

    /// Build the worker image for a language. Safe to repeat.
    #[instrument(skip(self), fields(language = %language))]
    pub async fn build_image(&self, language: Language) -> Result<(), ExecutorError> {
        let config = self.languages.get(language);
        info!(image = %config.worker_image, "Building worker image");

        let context = context::worker_context(&self.build_paths, &config.worker_dockerfile).await?;
        self.runtime
            .build_image(BuildRequest {
                tag: config.worker_image.clone(),
                dockerfile: "Dockerfile".to_string(),
                context,
            })
            .await
            .map_err(|e| match e {
                ExecutorError::ImageBuild { .. } => e,
                other => ExecutorError::ImageBuild {
                    tag: config.worker_image.clone(),
                    reason: other.to_string(),
                },
            })?;

        info!(image = %config.worker_image, "Worker image built");
        Ok(())
    }

    /// Start (or adopt) the worker for a language and register it
    #[instrument(skip(self), fields(language = %language))]
    pub async fn start_container(&self, language: Language) -> Result<WorkerHandle, ExecutorError> {
        let mut slot = self.slot(language).lock().await;
        let handle = self
            .start_locked(language)
            .await
            .map_err(|e| match e {
                ExecutorError::WorkerStart { .. } => e,
                other => ExecutorError::WorkerStart {
                    language,
                    reason: other.to_string(),
                },
            })?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn start_locked(&self, language: Language) -> Result<WorkerHandle, ExecutorError> {
        let name = language.worker_container_name();

        if let Some(existing) = self.runtime.inspect_container(&name).await? {
            if existing.running {
                info!(container_id = %existing.id, "Worker already running");
                return Ok(Self::handle_from(language, existing));
            }
            info!(container_id = %existing.id, "Restarting stopped worker");
            self.runtime.start_container(&existing.id).await?;
            return self.settle(language, &existing.id).await;
        }

        let config = self.languages.get(language);
        info!(image = %config.worker_image, "Creating worker container");
        let spec = ContainerSpec {
            name: Some(name),
            image: config.worker_image.clone(),
            memory_bytes: config.memory_limit_bytes(),
            nano_cpus: config.nano_cpus(),
            // the control endpoint has to be reachable from the host
            network: NetworkMode::Bridge,
            publish_port: Some(WORKER_PORT),
        };
        let id = self.runtime.create_container(spec).await?;
        self.runtime.start_container(&id).await?;
        self.settle(language, &id).await
    }

    /// Give the worker's endpoint time to come up, then read its published port
    async fn settle(&self, language: Language, container_id: &str) -> Result<WorkerHandle, ExecutorError> {
        if !self.limits.worker_settle_delay.is_zero() {
            tokio::time::sleep(self.limits.worker_settle_delay).await;
        }
        let status = self
            .runtime
            .inspect_container(container_id)
            .await?
            .ok_or_else(|| ExecutorError::ContainerNotFound(container_id.to_string()))?;
        if !status.running {
            return Err(ExecutorError::WorkerStart {
                language,
                reason: "container exited right after start".to_string(),
            });
        }
        info!(container_id = %status.id, host_port = ?status.host_port, "Worker started");
        Ok(Self::handle_from(language, status))
    }

    fn handle_from(language: Language, status: ContainerStatus) -> WorkerHandle {
        WorkerHandle {
            language,
            container_id: status.id,
            host_port: status.host_port,
        }
    }

    async fn registered(&self, language: Language) -> Result<WorkerHandle, ExecutorError> {
        self.slot(language)
            .lock()
            .await
            .clone()
            .ok_or(ExecutorError::WorkerNotRegistered(language))
    }

    /// Host port the worker's endpoint is published on
    pub async fn container_port(&self, language: Language) -> Result<u16, ExecutorError> {
        let handle = self.registered(language).await?;
        let status = self
            .runtime
            .inspect_container(&handle.container_id)
            .await?
            .ok_or(ExecutorError::WorkerNotRegistered(language))?;
        status.host_port.ok_or_else(|| {
            ExecutorError::Transport(format!("{} worker has no published port", language))
        })
    }

    /// Bridge-network IP of the worker container
    pub async fn container_ip(&self, language: Language) -> Result<String, ExecutorError> {
        let handle = self.registered(language).await?;
        let status = self
            .runtime
            .inspect_container(&handle.container_id)
            .await?
            .ok_or(ExecutorError::WorkerNotRegistered(language))?;
        status.ip_address.ok_or_else(|| {
            ExecutorError::Transport(format!("{} worker has no IP address", language))
        })
    }

    /// Stop and remove the worker; a worker that is already gone counts as stopped
    #[instrument(skip(self), fields(language = %language))]
    pub async fn stop_container(&self, language: Language) -> Result<(), ExecutorError> {
        let mut slot = self.slot(language).lock().await;
        let Some(handle) = slot.as_ref() else {
            info!("No worker registered");
            return Ok(());
        };

        let id = handle.container_id.clone();
        match self.runtime.stop_container(&id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(container_id = %id, error = %e, "Failed to stop worker");
                return Err(e);
            }
        }
        match self.runtime.remove_container(&id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(container_id = %id, error = %e, "Failed to remove worker");
                return Err(e);
            }
        }

        *slot = None;
        info!(container_id = %id, "Worker stopped and removed");
        Ok(())
    }

    /// Stop every worker; one failure does not block the others
    pub async fn stop_all_containers(&self) {
        info!("Stopping all workers");
        let results = join_all(Language::ALL.iter().map(|lang| self.stop_container(*lang))).await;
        for (lang, result) in Language::ALL.iter().zip(results) {
            if let Err(e) = result {
                warn!(language = %lang, error = %e, "Worker did not stop cleanly");
            }
        }
    }

    /// Build and start every worker, logging and skipping failures.
    /// Returns the languages that came up.
    pub async fn start_all_containers(&self) -> Vec<Language> {
        info!("Starting all workers");
        let mut started = Vec::new();
        for lang in Language::ALL {
            let outcome = async {
                self.build_image(lang).await?;
                self.start_container(lang).await
            }
            .await;
            match outcome {
                Ok(_) => started.push(lang),
                Err(e) => error!(language = %lang, error = %e, "Failed to start worker"),
            }
        }
        info!(started = ?started, "Worker startup finished");
        started
    }

    /// Health probe; any inspection failure reads as "not running"
    pub async fn is_container_running(&self, language: Language) -> bool {
        let Ok(handle) = self.registered(language).await else {
            return false;
        };
        match self.runtime.inspect_container(&handle.container_id).await {
            Ok(Some(status)) => status.running,
            Ok(None) => false,
            Err(e) => {
                warn!(language = %language, error = %e, "Worker inspection failed");
                false
            }
        }
    }

    /// Lazy-start path: make sure a worker is up before a job is sent
    pub async fn ensure_running(&self, language: Language) -> Result<(), ExecutorError> {
        if !self.is_container_running(language).await {
            info!(language = %language, "Worker not running, starting on demand");
            self.start_container(language).await?;
        }
        Ok(())
    }

    pub async fn handle(&self, language: Language) -> Option<WorkerHandle> {
        self.slot(language).lock().await.clone()
    }

    /// Whatever container carries the worker's name, registered here or not
    pub async fn inspect_worker(&self, language: Language) -> Result<Option<ContainerStatus>, ExecutorError> {
        self.runtime
            .inspect_container(&language.worker_container_name())
            .await
    }

    /// Register a worker container left behind by another process, so it can
    /// be probed and stopped. `Ok(None)` when there is none.
    pub async fn adopt(&self, language: Language) -> Result<Option<WorkerHandle>, ExecutorError> {
        let mut slot = self.slot(language).lock().await;
        let Some(status) = self.inspect_worker(language).await? else {
            return Ok(None);
        };
        let handle = Self::handle_from(language, status);
        *slot = Some(handle.clone());
        Ok(Some(handle))
    }
}
