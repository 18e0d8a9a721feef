// Docker container management using Bollard
use crate::error::ExecutorError;
use crate::runtime::{
    BuildRequest, ContainerLogs, ContainerRuntime, ContainerSpec, ContainerStatus, NetworkMode,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Seconds Docker waits for a graceful stop before killing
const STOP_GRACE_SECS: i64 = 5;

/// [`ContainerRuntime`] backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), ExecutorError> {
        self.docker.ping().await?;
        Ok(())
    }
}

/// Map a 404 to `ContainerNotFound` so callers can tolerate "already gone"
fn classify(err: BollardError, name: &str) -> ExecutorError {
    match err {
        BollardError::DockerResponseServerError { status_code: 404, .. } => {
            ExecutorError::ContainerNotFound(name.to_string())
        }
        other => ExecutorError::Docker(other),
    }
}

fn first_host_port(ports: Option<&HashMap<String, Option<Vec<PortBinding>>>>) -> Option<u16> {
    ports?
        .values()
        .flatten()
        .flatten()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[tracing::instrument(skip(self, request), fields(tag = %request.tag, context_bytes = request.context.len()))]
    async fn build_image(&self, request: BuildRequest) -> Result<(), ExecutorError> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(bytes::Bytes::from(request.context)));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| ExecutorError::ImageBuild {
                tag: request.tag.clone(),
                reason: e.to_string(),
            })?;
            if let Some(error) = info.error {
                return Err(ExecutorError::ImageBuild {
                    tag: request.tag.clone(),
                    reason: error,
                });
            }
            if let Some(line) = info.stream.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                debug!(tag = %request.tag, "{}", line);
            }
        }

        info!(tag = %request.tag, "Image built");
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), ExecutorError> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_image(tag, Some(options), None)
            .await
            .map_err(|e| classify(e, tag))?;
        Ok(())
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<Option<ContainerStatus>, ExecutorError> {
        let info = match self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                return match classify(e, name_or_id) {
                    ExecutorError::ContainerNotFound(_) => Ok(None),
                    other => Err(other),
                }
            }
        };

        let running = info
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let network = info.network_settings.as_ref();
        let host_port = first_host_port(network.and_then(|n| n.ports.as_ref()));
        let ip_address = network
            .and_then(|n| n.ip_address.clone())
            .filter(|ip| !ip.is_empty());

        Ok(Some(ContainerStatus {
            id: info.id.unwrap_or_else(|| name_or_id.to_string()),
            running,
            host_port,
            ip_address,
        }))
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ExecutorError> {
        let mut host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            ..Default::default()
        };
        let mut exposed_ports = None;

        match spec.network {
            NetworkMode::Bridge => host_config.network_mode = Some("bridge".to_string()),
            NetworkMode::Disabled => host_config.network_mode = Some("none".to_string()),
        }

        if let Some(port) = spec.publish_port {
            let key = format!("{}/tcp", port);
            host_config.port_bindings = Some(HashMap::from([(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    // 0 = let the daemon pick
                    host_port: Some("0".to_string()),
                }]),
            )]));
            exposed_ports = Some(HashMap::from([(key, HashMap::new())]));
        }

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports,
            network_disabled: Some(spec.network == NetworkMode::Disabled),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self.docker.create_container(options, config).await?;
        for warning in &response.warnings {
            warn!(container_id = %response.id, "{}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ExecutorError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, id))
    }

    async fn stop_container(&self, id: &str) -> Result<(), ExecutorError> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) => Err(classify(e, id)),
        }
    }

    async fn kill_container(&self, id: &str) -> Result<(), ExecutorError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, id))
    }

    async fn remove_container(&self, id: &str) -> Result<(), ExecutorError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| classify(e, id))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, ExecutorError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(classify(e, id)),
            None => Err(ExecutorError::Transport(format!(
                "No wait response from container {}",
                id
            ))),
        }
    }

    async fn container_logs(&self, id: &str) -> Result<ContainerLogs, ExecutorError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut logs = ContainerLogs::default();
        let mut stream = self.docker.logs(id, options);
        while let Some(output) = stream.next().await {
            match output.map_err(|e| classify(e, id))? {
                LogOutput::StdOut { message } => {
                    logs.stdout.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdErr { message } => {
                    logs.stderr.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(logs)
    }
}
