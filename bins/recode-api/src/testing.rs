//! In-memory doubles for the pipeline's collaborators

use async_trait::async_trait;
use recode_common::blob::{BlobStore, StorageError, StorageResult};
use recode_common::naming;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::ai::{AiError, Generation, TextGenerator};
use crate::sandbox::{SandboxControl, SandboxError, SandboxResult, SandboxState};

#[derive(Default)]
pub struct MockBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_upload: bool,
    fail_download: bool,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    pub fn insert(&self, name: &str, data: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(name)
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn failure(operation: &'static str) -> StorageError {
        StorageError::Status {
            operation,
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "storage offline".into(),
        }
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn ensure_container(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> StorageResult<()> {
        if self.fail_upload {
            return Err(Self::failure("upload"));
        }
        self.uploads.lock().unwrap().push(name.to_string());
        self.blobs.lock().unwrap().insert(name.to_string(), data);
        Ok(())
    }

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>> {
        if self.fail_download {
            return Err(Self::failure("download"));
        }
        self.blobs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.contains(name))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        self.blobs.lock().unwrap().remove(name);
        Ok(())
    }
}

/// One scripted answer to a state query
#[derive(Debug, Clone, Copy)]
pub enum Poll {
    State(SandboxState),
    NotFound,
    Error,
}

/// Sandbox control plane that answers from a script
///
/// Once the script runs out every query reports `Running`.
pub struct MockSandbox {
    script: Mutex<VecDeque<Poll>>,
    polls: Mutex<usize>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_create: bool,
    fail_delete: bool,
    output: Option<(Arc<MockBlobStore>, Vec<u8>)>,
}

impl MockSandbox {
    pub fn scripted(script: Vec<Poll>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            polls: Mutex::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_create: false,
            fail_delete: false,
            output: None,
        }
    }

    pub fn running() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn succeeding() -> Self {
        Self::scripted(vec![Poll::State(SandboxState::Succeeded)])
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    /// Write `contents` to the job's output blob when the sandbox is created
    pub fn producing(mut self, blobs: Arc<MockBlobStore>, contents: &str) -> Self {
        self.output = Some((blobs, contents.as_bytes().to_vec()));
        self
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxControl for MockSandbox {
    async fn create(&self, name: &str, input_blob: &str) -> SandboxResult<()> {
        if self.fail_create {
            return Err(SandboxError::Credential("no token".into()));
        }
        self.created.lock().unwrap().push(name.to_string());
        if let Some((blobs, contents)) = &self.output {
            blobs.insert(&naming::output_blob_name(input_blob), contents);
        }
        Ok(())
    }

    async fn state(&self, name: &str) -> SandboxResult<SandboxState> {
        *self.polls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Poll::State(SandboxState::Running)) {
            Poll::State(state) => Ok(state),
            Poll::NotFound => Err(SandboxError::NotFound(name.to_string())),
            Poll::Error => Err(SandboxError::Status {
                operation: "get",
                status: StatusCode::FORBIDDEN,
                body: "AuthorizationFailed".into(),
            }),
        }
    }

    async fn delete(&self, name: &str) -> SandboxResult<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        if self.fail_delete {
            return Err(SandboxError::Status {
                operation: "delete",
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

pub struct MockAi {
    reply: Result<Generation, StatusCode>,
    prompts: Mutex<Vec<String>>,
}

impl MockAi {
    pub fn text(reply: &str) -> Self {
        Self::with(Ok(Generation::Text(reply.to_string())))
    }

    pub fn no_content() -> Self {
        Self::with(Ok(Generation::NoContent))
    }

    pub fn failing() -> Self {
        Self::with(Err(StatusCode::SERVICE_UNAVAILABLE))
    }

    fn with(reply: Result<Generation, StatusCode>) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for MockAi {
    async fn generate(&self, prompt: &str) -> Result<Generation, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(generation) => Ok(generation.clone()),
            Err(status) => Err(AiError::Status {
                status: *status,
                body: "overloaded".into(),
            }),
        }
    }
}

/// App state over mocks, with polling shortened to whole seconds
pub fn app_state(
    blobs: Arc<MockBlobStore>,
    sandbox: Arc<MockSandbox>,
    ai: Arc<MockAi>,
) -> crate::AppState {
    use crate::sandbox::lifecycle::PollPolicy;
    use std::time::Duration;

    crate::AppState {
        blobs,
        sandbox,
        ai,
        sandbox_poll: PollPolicy {
            attempts: 3,
            interval: Duration::from_secs(1),
        },
        output_poll: PollPolicy {
            attempts: 2,
            interval: Duration::from_secs(1),
        },
    }
}
