//! Docker Engine implementation of [`ContainerClient`].

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::client::{
    ClientError, ClientResult, ContainerClient, LogStream, RemoveOptions, UnitConfig, UnitId,
    UnitState,
};

/// Exit code reported when the daemon does not return one.
const UNKNOWN_EXIT_CODE: i64 = -1;

/// Client for a local or remote Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect using the local defaults (`DOCKER_HOST`, else the platform
    /// socket).
    pub fn connect() -> ClientResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(DockerClient { docker })
    }
}

fn classify(id: &UnitId, err: DockerError) -> ClientError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => ClientError::NotFound {
            id: id.as_str().to_string(),
        },
        DockerError::DockerResponseServerError {
            status_code: 409,
            message,
        } => ClientError::Conflict {
            id: id.as_str().to_string(),
            message,
        },
        DockerError::DockerResponseServerError { message, .. } => ClientError::Api(message),
        other => ClientError::Transport(other.to_string()),
    }
}

fn container_config(config: &UnitConfig) -> Config<String> {
    Config {
        image: Some(config.image.clone()),
        entrypoint: Some(config.entrypoint.clone()),
        cmd: Some(config.args.clone()),
        tty: Some(config.tty),
        host_config: Some(HostConfig {
            binds: Some(config.binds.iter().map(|b| b.to_bind_spec()).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerClient for DockerClient {
    async fn create_unit(&self, config: &UnitConfig) -> ClientResult<UnitId> {
        let response = self
            .docker
            .create_container(
                None::<CreateContainerOptions<String>>,
                container_config(config),
            )
            .await
            .map_err(|e| match e {
                // 404 here means the image is missing, not the container.
                DockerError::DockerResponseServerError { message, .. } => ClientError::Api(message),
                other => ClientError::Transport(other.to_string()),
            })?;

        for warning in &response.warnings {
            warn!(image = %config.image, "Docker: {}", warning);
        }
        Ok(UnitId::new(response.id))
    }

    async fn copy_archive(&self, id: &UnitId, target: &str, archive: Vec<u8>) -> ClientResult<()> {
        debug!(container = %id, target, bytes = archive.len(), "Uploading archive");
        let options = UploadToContainerOptions {
            path: target.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id.as_str(), Some(options), archive.into())
            .await
            .map_err(|e| classify(id, e))
    }

    async fn start_unit(&self, id: &UnitId) -> ClientResult<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(id, e))
    }

    async fn stream_logs(&self, id: &UnitId) -> ClientResult<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let unit = id.clone();
        let logs = self
            .docker
            .logs(id.as_str(), Some(options))
            .map(move |item| {
                item.map(|output| output.into_bytes().to_vec())
                    .map_err(|e| classify(&unit, e))
            });
        Ok(logs.boxed())
    }

    async fn inspect_unit(&self, id: &UnitId) -> ClientResult<UnitState> {
        let info = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(id, e))?;

        let exit_code = info
            .state
            .and_then(|state| state.exit_code)
            .unwrap_or(UNKNOWN_EXIT_CODE);
        Ok(UnitState { exit_code })
    }

    async fn remove_unit(&self, id: &UnitId, options: RemoveOptions) -> ClientResult<()> {
        let options = RemoveContainerOptions {
            force: options.force,
            v: options.remove_volumes,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| classify(id, e))
    }

    async fn kill_unit(&self, id: &UnitId, signal: &str) -> ClientResult<()> {
        let options = KillContainerOptions {
            signal: signal.to_string(),
        };
        self.docker
            .kill_container(id.as_str(), Some(options))
            .await
            .map_err(|e| classify(id, e))
    }
}
