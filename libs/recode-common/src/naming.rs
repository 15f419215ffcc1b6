//! Blob naming rules - shared by the API and the in-sandbox worker so the
//! output object the API waits for is exactly the one the worker writes.

use uuid::Uuid;

/// Extension of the decompiled output object
pub const OUTPUT_EXTENSION: &str = "c";

/// Prefix of every sandbox instance name
pub const SANDBOX_PREFIX: &str = "ghidra";

/// Strip any directory components a client put in the uploaded filename
pub fn sanitize_filename(filename: &str) -> &str {
    filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename)
        .trim()
}

/// True when the name carries a non-empty extension after its last dot
pub fn has_extension(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => !ext.is_empty(),
        None => false,
    }
}

/// Unique input blob name for an upload
pub fn input_blob_name(job_id: &Uuid, filename: &str) -> String {
    format!("{}_{}", job_id.simple(), sanitize_filename(filename))
}

/// Output blob name: the input name with its last extension replaced
pub fn output_blob_name(input_blob: &str) -> String {
    let stem = match input_blob.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => input_blob,
    };
    format!("{}.{}", stem, OUTPUT_EXTENSION)
}

/// Generate a fresh sandbox instance name
pub fn sandbox_name() -> String {
    format!("{}-{}", SANDBOX_PREFIX, Uuid::new_v4())
}
