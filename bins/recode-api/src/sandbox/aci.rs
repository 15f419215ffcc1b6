//! Azure Container Instances control plane
//!
//! Each sandbox is a container group with a single container and restart
//! policy `Never`, so the group state settles on Succeeded or Failed once
//! the worker exits.

use async_trait::async_trait;
use recode_common::config::StorageConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::credential::TokenProvider;
use super::{sandbox_env, SandboxControl, SandboxError, SandboxResult, SandboxState};
use crate::config::{AzureConfig, SandboxConfig};

const API_VERSION: &str = "2023-05-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AciSandbox {
    http: Client,
    tokens: TokenProvider,
    azure: AzureConfig,
    sandbox: SandboxConfig,
    storage: StorageConfig,
}

impl AciSandbox {
    pub fn new(
        azure: &AzureConfig,
        sandbox: &SandboxConfig,
        storage: &StorageConfig,
    ) -> SandboxResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let tokens = TokenProvider::new(
            http.clone(),
            azure.credential.clone(),
            &azure.management_endpoint,
        );

        info!(
            subscription = %azure.subscription_id,
            resource_group = %azure.resource_group,
            location = %azure.location,
            image = %sandbox.image,
            "ACI sandbox backend initialized"
        );

        Ok(Self {
            http,
            tokens,
            azure: azure.clone(),
            sandbox: sandbox.clone(),
            storage: storage.clone(),
        })
    }

    fn group_url(&self, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups/{}?api-version={}",
            self.azure.management_endpoint,
            self.azure.subscription_id,
            self.azure.resource_group,
            name,
            API_VERSION
        )
    }

    /// Request body for a container group running the decompiler on `input_blob`
    pub fn container_group_body(&self, name: &str, input_blob: &str) -> Value {
        let env: Vec<Value> = sandbox_env(&self.storage, input_blob)
            .into_iter()
            .map(|var| {
                if var.secure {
                    json!({ "name": var.name, "secureValue": var.value })
                } else {
                    json!({ "name": var.name, "value": var.value })
                }
            })
            .collect();

        let mut properties = json!({
            "containers": [{
                "name": name,
                "properties": {
                    "image": self.sandbox.image,
                    "resources": {
                        "requests": {
                            "cpu": self.sandbox.cpu,
                            "memoryInGB": self.sandbox.memory_gb
                        }
                    },
                    "environmentVariables": env
                }
            }],
            "osType": "Linux",
            "restartPolicy": "Never"
        });

        if let Some(registry) = &self.sandbox.registry {
            properties["imageRegistryCredentials"] = json!([{
                "server": registry.server,
                "username": registry.username,
                "password": registry.password
            }]);
        }

        json!({
            "location": self.azure.location,
            "properties": properties
        })
    }
}

/// Instance view state, or the provisioning outcome when the group never started
pub fn group_state(group: &Value) -> SandboxState {
    if let Some(state) = group
        .pointer("/properties/instanceView/state")
        .and_then(Value::as_str)
    {
        return SandboxState::from_provider(state);
    }

    match group
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
    {
        Some(state) if state.eq_ignore_ascii_case("failed") => SandboxState::Failed,
        Some(state) if state.eq_ignore_ascii_case("canceled") => SandboxState::Stopped,
        _ => SandboxState::Unknown,
    }
}

async fn status_error(operation: &'static str, resp: reqwest::Response) -> SandboxError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    SandboxError::Status {
        operation,
        status,
        body,
    }
}

#[async_trait]
impl SandboxControl for AciSandbox {
    async fn create(&self, name: &str, input_blob: &str) -> SandboxResult<()> {
        info!(sandbox = %name, blob = %input_blob, "Creating container group");

        let token = self.tokens.token().await?;
        let resp = self
            .http
            .put(self.group_url(name))
            .bearer_auth(token)
            .json(&self.container_group_body(name, input_blob))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("create container group", resp).await);
        }

        info!(sandbox = %name, status = %resp.status(), "Container group accepted");
        Ok(())
    }

    async fn state(&self, name: &str) -> SandboxResult<SandboxState> {
        let token = self.tokens.token().await?;
        let resp = self
            .http
            .get(self.group_url(name))
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SandboxError::NotFound(name.to_string()));
        }
        if !resp.status().is_success() {
            return Err(status_error("get container group", resp).await);
        }

        let group: Value = resp.json().await?;
        Ok(group_state(&group))
    }

    async fn delete(&self, name: &str) -> SandboxResult<()> {
        let token = self.tokens.token().await?;
        let resp = self
            .http
            .delete(self.group_url(name))
            .bearer_auth(token)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                info!(sandbox = %name, "Container group deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(sandbox = %name, "Container group already gone");
                Ok(())
            }
            _ => Err(status_error("delete container group", resp).await),
        }
    }
}
