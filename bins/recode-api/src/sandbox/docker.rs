//! Local Docker control plane
//!
//! Runs the decompiler image on the host's Docker daemon instead of ACI.
//! The container keeps its network so the worker can reach blob storage.

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use futures_util::stream::StreamExt;
use recode_common::config::StorageConfig;
use std::future::Future;
use tracing::{debug, info, warn};

use super::{sandbox_env, SandboxControl, SandboxError, SandboxResult, SandboxState};
use crate::config::SandboxConfig;

pub struct DockerSandbox {
    docker: Docker,
    sandbox: SandboxConfig,
    storage: StorageConfig,
}

impl DockerSandbox {
    pub fn connect(sandbox: &SandboxConfig, storage: &StorageConfig) -> SandboxResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        info!(image = %sandbox.image, "Docker sandbox backend initialized");
        Ok(Self {
            docker,
            sandbox: sandbox.clone(),
            storage: storage.clone(),
        })
    }

    fn credentials(&self) -> Option<DockerCredentials> {
        self.sandbox.registry.as_ref().map(|r| DockerCredentials {
            username: Some(r.username.clone()),
            password: Some(r.password.clone()),
            serveraddress: Some(r.server.clone()),
            ..Default::default()
        })
    }

    /// Pull the decompiler image unless it is already cached
    async fn ensure_image(&self) -> SandboxResult<()> {
        let image = self.sandbox.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, self.credentials());
        while let Some(progress) = stream.next().await {
            progress?;
        }

        info!(image, "Image pulled");
        Ok(())
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Map the daemon's container status onto sandbox states
pub fn map_state(status: Option<ContainerStateStatusEnum>, exit_code: Option<i64>) -> SandboxState {
    match status {
        Some(ContainerStateStatusEnum::CREATED)
        | Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING) => SandboxState::Running,
        Some(ContainerStateStatusEnum::EXITED) => match exit_code {
            Some(0) => SandboxState::Succeeded,
            _ => SandboxState::Failed,
        },
        Some(ContainerStateStatusEnum::DEAD) => SandboxState::Failed,
        Some(ContainerStateStatusEnum::PAUSED) | Some(ContainerStateStatusEnum::REMOVING) => {
            SandboxState::Stopped
        }
        _ => SandboxState::Unknown,
    }
}

/// Await `start`; on failure await `remove` before returning the start
/// error, so a created but never started container does not outlive the
/// request.
async fn start_or_remove<S, R>(name: &str, start: S, remove: R) -> SandboxResult<()>
where
    S: Future<Output = Result<(), DockerError>>,
    R: Future<Output = SandboxResult<()>>,
{
    if let Err(e) = start.await {
        warn!(sandbox = %name, error = %e, "Docker sandbox failed to start, removing");
        if let Err(remove) = remove.await {
            warn!(sandbox = %name, error = %remove, "Removing unstarted sandbox failed");
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl SandboxControl for DockerSandbox {
    async fn create(&self, name: &str, input_blob: &str) -> SandboxResult<()> {
        self.ensure_image().await?;

        let env: Vec<String> = sandbox_env(&self.storage, input_blob)
            .into_iter()
            .map(|var| format!("{}={}", var.name, var.value))
            .collect();

        let config = Config {
            image: Some(self.sandbox.image.clone()),
            env: Some(env),
            host_config: Some(HostConfig {
                memory: Some((self.sandbox.memory_gb * 1024.0 * 1024.0 * 1024.0) as i64),
                nano_cpus: Some((self.sandbox.cpu * 1_000_000_000.0) as i64),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name,
            platform: None,
        };
        self.docker.create_container(Some(options), config).await?;

        start_or_remove(
            name,
            self.docker
                .start_container(name, None::<StartContainerOptions<String>>),
            self.delete(name),
        )
        .await?;

        info!(sandbox = %name, blob = %input_blob, "Docker sandbox started");
        Ok(())
    }

    async fn state(&self, name: &str) -> SandboxResult<SandboxState> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Err(SandboxError::NotFound(name.to_string())),
            Err(e) => return Err(e.into()),
        };

        let (status, exit_code) = match inspect.state {
            Some(state) => (state.status, state.exit_code),
            None => (None, None),
        };
        Ok(map_state(status, exit_code))
    }

    async fn delete(&self, name: &str) -> SandboxResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                info!(sandbox = %name, "Docker sandbox removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                warn!(sandbox = %name, "Docker sandbox already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
