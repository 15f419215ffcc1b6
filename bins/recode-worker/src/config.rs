// Worker configuration, read from the environment the sandbox is launched with
use recode_common::config::{process_env, ConfigError, EnvReader, StorageConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GHIDRA_HOME: &str = "/app/ghidra_10.1_PUBLIC";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub storage: StorageConfig,
    /// Input blob to decompile
    pub blob_name: String,
    pub ghidra_home: PathBuf,
    pub ghidra_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);

        let storage = StorageConfig::read(&mut env);
        let blob_name = env.required("BLOB_NAME");
        let ghidra_home = PathBuf::from(env.or_default("GHIDRA_HOME", DEFAULT_GHIDRA_HOME));
        let timeout_secs = env.parse_or("GHIDRA_TIMEOUT_SECS", 600u64);

        env.finish()?;

        Ok(Self {
            storage,
            blob_name,
            ghidra_home,
            ghidra_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
