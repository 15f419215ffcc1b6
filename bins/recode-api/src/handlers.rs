// HTTP route handlers for the Recode API

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use recode_common::types::Envelope;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::metrics;
use crate::pipeline::{self, Annotation};
use crate::AppState;

/// Multipart field carrying the binary
const FILE_FIELD: &str = "file";

/// Pull the `file` field out of the form; `None` filename when the field is absent
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(Option<String>, Vec<u8>), ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "Rejected multipart request");
        ApiError::validation("No file provided")
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok((None, Vec::new())),
            Err(e) => {
                warn!(error = %e, "Failed to read multipart field");
                return Err(ApiError::validation(format!("Invalid upload: {}", e.body_text())));
            }
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            warn!(error = %e, "Failed to read uploaded file");
            ApiError::validation(format!("Invalid upload: {}", e.body_text()))
        })?;
        return Ok((filename, data.to_vec()));
    }
}

async fn decompile_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Annotation, ApiError> {
    let (filename, data) = read_upload(multipart).await?;
    pipeline::decompile(state, filename.as_deref(), data).await
}

/// Record the outcome and render it either as the JSON envelope or as raw text
fn respond(route: &'static str, result: Result<Annotation, ApiError>, raw: bool) -> Response {
    match result {
        Ok(annotation) => {
            metrics::record(route, annotation.outcome());
            if raw {
                (StatusCode::OK, annotation.into_text()).into_response()
            } else {
                (StatusCode::OK, Json(annotation.into_envelope())).into_response()
            }
        }
        Err(e) => {
            metrics::record(route, e.outcome());
            e.into_response()
        }
    }
}

/// POST /api/decompile - Decompile and annotate, JSON envelope
pub async fn api_decompile(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let route = "/api/decompile";
    let timer = metrics::PIPELINE_SECONDS.with_label_values(&[route]).start_timer();
    let result = decompile_upload(&state, multipart).await;
    timer.observe_duration();
    respond(route, result, false)
}

/// POST /decompile - Decompile and annotate, plain text body
pub async fn raw_decompile(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let route = "/decompile";
    let timer = metrics::PIPELINE_SECONDS.with_label_values(&[route]).start_timer();
    let result = decompile_upload(&state, multipart).await;
    timer.observe_duration();
    respond(route, result, true)
}

/// POST /api/translate - Translate or recode pseudo-code, JSON envelope
///
/// The body is read as JSON whatever its content type.
pub async fn api_translate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let route = "/api/translate";
    let timer = metrics::PIPELINE_SECONDS.with_label_values(&[route]).start_timer();
    let result = pipeline::translate(&state, &body).await;
    timer.observe_duration();
    respond(route, result, false)
}

/// POST /translate - Translate or recode pseudo-code, plain text body
pub async fn raw_translate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let route = "/translate";
    let timer = metrics::PIPELINE_SECONDS.with_label_values(&[route]).start_timer();
    let result = pipeline::translate(&state, &body).await;
    timer.observe_duration();
    respond(route, result, true)
}

pub async fn method_not_allowed() -> impl IntoResponse {
    info!("Rejected request with unsupported method");
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(Envelope::failure("Method not allowed")),
    )
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
