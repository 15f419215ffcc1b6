use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::naming;

/// Largest binary accepted for decompilation
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// One decompilation request, from upload to cleanup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub filename: String,
    pub input_blob: String,
    pub output_blob: String,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(filename: &str) -> Self {
        let id = Uuid::new_v4();
        let input_blob = naming::input_blob_name(&id, filename);
        let output_blob = naming::output_blob_name(&input_blob);
        Self {
            id,
            filename: naming::sanitize_filename(filename).to_string(),
            input_blob,
            output_blob,
            submitted_at: Utc::now(),
        }
    }
}

/// Body of the translate/recode routes
///
/// Fields default to empty so that a missing field and an empty one are
/// rejected with the same message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub pseudo_code: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslateMethod {
    Recode,
    Translate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method '{0}'")]
pub struct UnknownMethod(pub String);

impl FromStr for TranslateMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recode" => Ok(Self::Recode),
            "translate" => Ok(Self::Translate),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for TranslateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recode => write!(f, "recode"),
            Self::Translate => write!(f, "translate"),
        }
    }
}

/// JSON envelope returned by the `/api/*` routes and by every error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompiled_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, code: String) -> Self {
        Self {
            success: true,
            message: message.into(),
            decompiled_code: Some(code),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            decompiled_code: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
