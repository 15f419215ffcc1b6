use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recode_common::blob::StorageError;
use recode_common::types::Envelope;
use tracing::error;

use crate::ai::AiError;
use crate::sandbox::lifecycle::LifecycleError;
use crate::sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Sandbox(#[from] LifecycleError),

    #[error("Sandbox error: {0}")]
    SandboxControl(#[from] SandboxError),

    #[error("Output file {0} not found")]
    OutputMissing(String),

    #[error("AI invocation failed: {0}")]
    Ai(#[from] AiError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for the requests metric
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid",
            Self::Storage(_) => "storage_error",
            Self::Sandbox(LifecycleError::TimedOut { .. }) => "timeout",
            Self::Sandbox(_) | Self::SandboxControl(_) => "sandbox_error",
            Self::OutputMissing(_) => "output_missing",
            Self::Ai(_) => "ai_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = match &self {
            Self::Validation(message) => Envelope::failure(message.clone()),
            other => {
                error!(error = %other, "Request failed");
                Envelope::failure("Processing failed").with_error(other.to_string())
            }
        };
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_is_400_without_error_field() {
        let (status, body) = body_json(ApiError::validation("Invalid file name")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "message": "Invalid file name" })
        );
    }

    #[tokio::test]
    async fn test_timeout_is_500_with_detail() {
        let err = ApiError::from(LifecycleError::TimedOut {
            name: "ghidra-1".into(),
            attempts: 20,
            waited: Duration::from_secs(500),
        });
        assert_eq!(err.outcome(), "timeout");

        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Processing failed");
        assert_eq!(
            body["error"],
            "Container did not complete within 500 seconds (20 polls)"
        );
    }

    #[test]
    fn test_failed_sandbox_message() {
        let err = ApiError::from(LifecycleError::Failed {
            name: "ghidra-2".into(),
            state: SandboxState::Failed,
        });
        assert_eq!(err.to_string(), "Container failed with state: Failed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_output_missing_message() {
        let err = ApiError::OutputMissing("abc_prog.c".into());
        assert_eq!(err.to_string(), "Output file abc_prog.c not found");
        assert_eq!(err.outcome(), "output_missing");
    }
}
