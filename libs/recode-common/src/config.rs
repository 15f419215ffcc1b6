// Environment-driven configuration shared by the API and the worker
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Look a variable up in the process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads variables through a lookup function and collects every missing
/// required name and every malformed value, so one startup failure reports
/// all of them. Missing variables are reported ahead of malformed ones.
pub struct EnvReader<F> {
    lookup: F,
    missing: Vec<String>,
    invalid: Option<ConfigError>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
            invalid: None,
        }
    }

    /// Set, non-blank value or None
    pub fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    /// Required value; records the name and returns an empty string when absent
    pub fn required(&mut self, name: &str) -> String {
        match self.optional(name) {
            Some(value) => value,
            None => {
                self.missing.push(name.to_string());
                String::new()
            }
        }
    }

    pub fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    /// Parsed value or `default` when unset; a malformed value is recorded
    /// and `default` returned so reading can continue
    pub fn parse_or<T>(&mut self, name: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.optional(name) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                let reason = format!("{}", e);
                self.reject(name, reason);
                default
            }
        }
    }

    /// Record a malformed value; the first one is reported
    pub fn reject(&mut self, name: &str, reason: impl Into<String>) {
        if self.invalid.is_none() {
            self.invalid = Some(ConfigError::Invalid {
                name: name.to_string(),
                reason: reason.into(),
            });
        }
    }

    /// Fail with every missing required variable, in the order they were
    /// read, or else with the first malformed value
    pub fn finish(self) -> Result<(), ConfigError> {
        if !self.missing.is_empty() {
            return Err(ConfigError::Missing(self.missing));
        }
        match self.invalid {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Blob storage account and container
#[derive(Clone)]
pub struct StorageConfig {
    pub connection_string: String,
    pub container_name: String,
}

impl StorageConfig {
    pub fn read<F>(env: &mut EnvReader<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            connection_string: env.required("CONNECTION_STRING"),
            container_name: env.required("AZURE_CONTAINER_NAME"),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("connection_string", &"<redacted>")
            .field("container_name", &self.container_name)
            .finish()
    }
}
