//! Request pipelines behind the HTTP handlers
//!
//! Decompile: validate, upload, run a sandbox, wait for the output blob,
//! annotate it. Translate: validate the JSON body, prompt the AI.

use recode_common::blob::BlobStore;
use recode_common::naming;
use recode_common::types::{
    Envelope, Job, TranslateMethod, TranslateRequest, MAX_UPLOAD_BYTES,
};
use tracing::{info, instrument, warn};

use crate::ai::{Generation, TextGenerator};
use crate::error::ApiError;
use crate::prompts;
use crate::sandbox::lifecycle::{wait_for_terminal, PollPolicy};
use crate::sandbox::SandboxGuard;
use crate::AppState;

pub const SUCCESS_MESSAGE: &str = "Decompilation successful";
pub const FALLBACK_MESSAGE: &str = "AI invocation failed";

/// What the AI produced, or the fallback text when it produced nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    Generated(String),
    Fallback(String),
}

impl Annotation {
    pub fn into_text(self) -> String {
        match self {
            Self::Generated(text) | Self::Fallback(text) => text,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::Generated(text) => Envelope::ok(SUCCESS_MESSAGE, text),
            Self::Fallback(text) => Envelope {
                success: false,
                ..Envelope::ok(FALLBACK_MESSAGE, text)
            },
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Generated(_) => "success",
            Self::Fallback(_) => "fallback",
        }
    }
}

/// Check an upload before anything touches storage; returns the sanitized filename
pub fn validate_upload(filename: Option<&str>, size: usize) -> Result<&str, ApiError> {
    let filename = match filename.map(naming::sanitize_filename) {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ApiError::validation("No file provided")),
    };
    if !naming::has_extension(filename) {
        return Err(ApiError::validation("Invalid file name"));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ApiError::validation("File size exceeds 5MB"));
    }
    Ok(filename)
}

pub async fn decompile(
    state: &AppState,
    filename: Option<&str>,
    data: Vec<u8>,
) -> Result<Annotation, ApiError> {
    let filename = validate_upload(filename, data.len())?;
    let job = Job::new(filename);
    info!(job_id = %job.id, blob = %job.input_blob, size = data.len(), "Job accepted");

    state.blobs.ensure_container().await?;
    state.blobs.upload(&job.input_blob, data).await?;

    let result = run_sandbox(state, &job).await;
    remove_blobs(state.blobs.as_ref(), &job).await;

    match &result {
        Ok(annotation) => info!(job_id = %job.id, outcome = annotation.outcome(), "Job finished"),
        Err(e) => warn!(job_id = %job.id, error = %e, "Job failed"),
    }
    result
}

#[instrument(skip_all, fields(job_id = %job.id))]
async fn run_sandbox(state: &AppState, job: &Job) -> Result<Annotation, ApiError> {
    let guard = SandboxGuard::new(state.sandbox.clone(), naming::sandbox_name());

    let result: Result<Annotation, ApiError> = async {
        state.sandbox.create(guard.name(), &job.input_blob).await?;
        info!(sandbox = %guard.name(), "Sandbox created");

        wait_for_terminal(state.sandbox.as_ref(), guard.name(), state.sandbox_poll).await?;
        wait_for_blob(state.blobs.as_ref(), &job.output_blob, state.output_poll).await?;

        let bytes = state.blobs.download(&job.output_blob).await?;
        let code = String::from_utf8_lossy(&bytes);
        info!(blob = %job.output_blob, chars = code.len(), "Decompiled output fetched");

        annotate(state.ai.as_ref(), &prompts::analysis(&code), &code).await
    }
    .await;

    guard.release().await;
    result
}

/// Check for the blob, sleeping between checks; `policy.attempts` sleeps at most
async fn wait_for_blob(
    blobs: &dyn BlobStore,
    name: &str,
    policy: PollPolicy,
) -> Result<(), ApiError> {
    for attempt in 0..=policy.attempts {
        if blobs.exists(name).await? {
            return Ok(());
        }
        if attempt < policy.attempts {
            info!(blob = %name, attempt = attempt + 1, "Output not ready yet");
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(ApiError::OutputMissing(name.to_string()))
}

async fn remove_blobs(blobs: &dyn BlobStore, job: &Job) {
    for name in [&job.input_blob, &job.output_blob] {
        if let Err(e) = blobs.delete(name).await {
            warn!(blob = %name, error = %e, "Blob cleanup failed");
        }
    }
}

pub async fn translate(state: &AppState, body: &[u8]) -> Result<Annotation, ApiError> {
    let request: TranslateRequest = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Rejected translate body");
        ApiError::validation("Invalid JSON body")
    })?;

    if request.pseudo_code.is_empty() || request.method.is_empty() {
        return Err(ApiError::validation(
            "Missing required fields: pseudo_code or method",
        ));
    }

    let prompt = match request.method.parse::<TranslateMethod>() {
        Ok(TranslateMethod::Recode) => prompts::recode(&request.pseudo_code),
        Ok(TranslateMethod::Translate) => {
            if request.lang.is_empty() {
                return Err(ApiError::validation(
                    "Missing required field: lang for translation method",
                ));
            }
            prompts::translate(&request.lang, &request.pseudo_code)
        }
        Err(e) => {
            warn!(error = %e, "Rejected translate method");
            return Err(ApiError::validation("Invalid method"));
        }
    };

    info!(method = %request.method, lang = %request.lang, chars = request.pseudo_code.len(), "Translate request");
    annotate(state.ai.as_ref(), &prompt, &request.pseudo_code).await
}

async fn annotate(ai: &dyn TextGenerator, prompt: &str, code: &str) -> Result<Annotation, ApiError> {
    match ai.generate(prompt).await? {
        Generation::Text(text) => Ok(Annotation::Generated(text)),
        Generation::NoContent => Ok(Annotation::Fallback(prompts::fallback(code))),
    }
}
