// Service configuration, read once at startup and shared by reference
use recode_common::config::{process_env, ConfigError, EnvReader, StorageConfig};
use std::fmt;
use std::time::Duration;

use crate::sandbox::lifecycle::PollPolicy;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOCATION: &str = "eastus";
const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub storage: StorageConfig,
    pub sandbox: SandboxConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub backend: BackendConfig,
    pub image: String,
    pub registry: Option<RegistryCredentials>,
    pub cpu: f64,
    pub memory_gb: f64,
    /// Polling of the sandbox state
    pub poll: PollPolicy,
    /// Polling for the decompiled output object once the sandbox succeeded
    pub output_poll: PollPolicy,
}

/// Which control plane runs the sandboxes
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Aci(AzureConfig),
    Docker,
}

#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub management_endpoint: String,
    pub credential: CredentialConfig,
}

/// How the management-plane bearer token is obtained
#[derive(Clone)]
pub enum CredentialConfig {
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity {
        endpoint: String,
        header: String,
    },
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Self::ManagedIdentity { endpoint, .. } => f
                .debug_struct("ManagedIdentity")
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    /// Build the configuration from any variable lookup
    ///
    /// Every missing required variable is reported in a single error; a
    /// malformed value is only reported once nothing is missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);

        let backend_name = env.or_default("SANDBOX_BACKEND", "aci").to_lowercase();
        let use_aci = match backend_name.as_str() {
            "aci" => true,
            "docker" => false,
            other => {
                env.reject(
                    "SANDBOX_BACKEND",
                    format!("unknown backend '{}', expected aci or docker", other),
                );
                true
            }
        };

        let storage = StorageConfig::read(&mut env);

        let (subscription_id, resource_group) = if use_aci {
            (
                env.required("AZURE_SUBSCRIPTION_ID"),
                env.required("AZURE_RESOURCE_GROUP"),
            )
        } else {
            (String::new(), String::new())
        };

        let image = env.required("AZURE_IMAGE_NAME");

        let registry = if use_aci {
            Some(RegistryCredentials {
                server: env.required("ACR_SERVER"),
                username: env.required("ACR_USERNAME"),
                password: env.required("ACR_PASSWORD"),
            })
        } else {
            match (
                env.optional("ACR_SERVER"),
                env.optional("ACR_USERNAME"),
                env.optional("ACR_PASSWORD"),
            ) {
                (Some(server), Some(username), Some(password)) => Some(RegistryCredentials {
                    server,
                    username,
                    password,
                }),
                _ => None,
            }
        };

        let api_key = env.required("API_KEY");

        // None only for docker; aci without a credential is recorded as invalid
        let credential = if use_aci {
            read_credential(&mut env)
        } else {
            None
        };

        let cpu = env.parse_or("SANDBOX_CPU", 1.0);
        let memory_gb = env.parse_or("SANDBOX_MEMORY_GB", 2.0);
        let poll = PollPolicy {
            attempts: env.parse_or("SANDBOX_POLL_ATTEMPTS", PollPolicy::SANDBOX.attempts),
            interval: Duration::from_secs(env.parse_or(
                "SANDBOX_POLL_INTERVAL_SECS",
                PollPolicy::SANDBOX.interval.as_secs(),
            )),
        };
        let output_poll = PollPolicy {
            attempts: env.parse_or("OUTPUT_POLL_ATTEMPTS", PollPolicy::OUTPUT.attempts),
            interval: Duration::from_secs(env.parse_or(
                "OUTPUT_POLL_INTERVAL_SECS",
                PollPolicy::OUTPUT.interval.as_secs(),
            )),
        };
        let ai_timeout = Duration::from_secs(env.parse_or("AI_TIMEOUT_SECS", 30));
        let port = env.parse_or("FUNCTIONS_CUSTOMHANDLER_PORT", DEFAULT_PORT);

        let backend = match credential {
            Some(credential) => BackendConfig::Aci(AzureConfig {
                subscription_id,
                resource_group,
                location: env.or_default("AZURE_LOCATION", DEFAULT_LOCATION),
                management_endpoint: env
                    .or_default("AZURE_MANAGEMENT_ENDPOINT", DEFAULT_MANAGEMENT_ENDPOINT)
                    .trim_end_matches('/')
                    .to_string(),
                credential,
            }),
            None => BackendConfig::Docker,
        };

        let ai = AiConfig {
            api_key,
            endpoint: env
                .or_default("GEMINI_ENDPOINT", DEFAULT_GEMINI_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            model: env.or_default("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            timeout: ai_timeout,
        };

        env.finish()?;

        Ok(Self {
            port,
            storage,
            sandbox: SandboxConfig {
                backend,
                image,
                registry,
                cpu,
                memory_gb,
                poll,
                output_poll,
            },
            ai,
        })
    }
}

/// Client secret when all three service-principal variables are set,
/// otherwise the managed identity endpoint. Records an invalid
/// AZURE_CLIENT_SECRET when neither is available.
fn read_credential<F>(env: &mut EnvReader<F>) -> Option<CredentialConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
        env.optional("AZURE_TENANT_ID"),
        env.optional("AZURE_CLIENT_ID"),
        env.optional("AZURE_CLIENT_SECRET"),
    ) {
        return Some(CredentialConfig::ClientSecret {
            authority_host: env
                .or_default("AZURE_AUTHORITY_HOST", DEFAULT_AUTHORITY_HOST)
                .trim_end_matches('/')
                .to_string(),
            tenant_id,
            client_id,
            client_secret,
        });
    }

    if let (Some(endpoint), Some(header)) = (
        env.optional("IDENTITY_ENDPOINT"),
        env.optional("IDENTITY_HEADER"),
    ) {
        return Some(CredentialConfig::ManagedIdentity { endpoint, header });
    }

    env.reject(
        "AZURE_CLIENT_SECRET",
        "no Azure credential: set AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET \
         or run with a managed identity",
    );
    None
}
