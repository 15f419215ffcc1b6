//! Sandbox control - the single-use containers that run the decompiler
//!
//! A sandbox is created for one uploaded blob, polled until it reaches a
//! terminal state, and deleted. Two control planes implement the same trait:
//! Azure Container Instances (production) and a local Docker daemon.

pub mod aci;
pub mod credential;
pub mod docker;
pub mod lifecycle;

use async_trait::async_trait;
use recode_common::config::StorageConfig;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Externally reported sandbox state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Unknown,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl SandboxState {
    /// Map a control-plane state string (case-insensitive)
    pub fn from_provider(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" | "pending" | "waiting" | "creating" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "stopped" | "terminated" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox {0} not found")]
    NotFound(String),

    #[error("control plane request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("control plane returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("credential error: {0}")]
    Credential(String),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[async_trait]
pub trait SandboxControl: Send + Sync {
    /// Launch sandbox `name` to decompile `input_blob`
    ///
    /// The caller picks the name so it can arm a `SandboxGuard` before the
    /// control plane has seen the request.
    async fn create(&self, name: &str, input_blob: &str) -> SandboxResult<()>;

    /// Current state. `SandboxError::NotFound` while the control plane has
    /// not registered the instance yet.
    async fn state(&self, name: &str) -> SandboxResult<SandboxState>;

    async fn delete(&self, name: &str) -> SandboxResult<()>;
}

/// Environment variable handed to the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxEnv {
    pub name: &'static str,
    pub value: String,
    pub secure: bool,
}

/// Everything the worker inside the sandbox needs to find its input
pub fn sandbox_env(storage: &StorageConfig, input_blob: &str) -> Vec<SandboxEnv> {
    vec![
        SandboxEnv {
            name: "AZURE_CONTAINER_NAME",
            value: storage.container_name.clone(),
            secure: false,
        },
        SandboxEnv {
            name: "CONNECTION_STRING",
            value: storage.connection_string.clone(),
            secure: true,
        },
        SandboxEnv {
            name: "BLOB_NAME",
            value: input_blob.to_string(),
            secure: false,
        },
    ]
}

/// Best-effort deletion: failures are logged, never returned
pub async fn cleanup(control: &dyn SandboxControl, name: &str) {
    info!(sandbox = %name, "Deleting sandbox");
    if let Err(e) = control.delete(name).await {
        error!(sandbox = %name, error = %e, "Sandbox cleanup failed");
    }
}

/// Sandbox cleanup guard - deletes the sandbox on release, or on drop when
/// the request future is abandoned before it gets there
pub struct SandboxGuard {
    control: Arc<dyn SandboxControl>,
    name: Option<String>,
}

impl SandboxGuard {
    pub fn new(control: Arc<dyn SandboxControl>, name: String) -> Self {
        Self {
            control,
            name: Some(name),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Delete the sandbox now
    pub async fn release(mut self) {
        if let Some(name) = self.name.take() {
            cleanup(self.control.as_ref(), &name).await;
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        let control = self.control.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(sandbox = %name, "Sandbox guard dropped before release, deleting in background");
                handle.spawn(async move {
                    cleanup(control.as_ref(), &name).await;
                });
            }
            Err(_) => {
                error!(sandbox = %name, "Sandbox guard dropped outside a runtime, sandbox leaked");
            }
        }
    }
}
