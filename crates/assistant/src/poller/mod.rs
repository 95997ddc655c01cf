//! Drives an assistant run to completion for one user query.
//!
//! Each poll observes the run status. A `requires_action` run gets its first
//! tool call answered through the [`ActionDispatcher`]; a terminal run has its
//! latest assistant message rendered (annotations replaced, attachments saved)
//! and the loop ends. Service failures are logged and end the query with an
//! empty response.

pub mod attachments;
pub mod session;

use serde::Serialize;
use shared_types::{
    error_result, ActionRequest, Annotation, FileObject, MessageContent, MessageRole, Run,
    RunStatus, TextContent, ToolOutput,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::assistant_api::AssistantApi;
use crate::dispatcher::ActionDispatcher;
use crate::error::ApiError;
use crate::wait::{sleep_or_cancelled, with_deadline};

pub use attachments::{extension_for, save_attachment, FALLBACK_EXTENSION, MIME_EXTENSIONS};
pub use session::SessionStore;

/// `image_file` parts carry no MIME type; the service always renders PNG.
const IMAGE_FILE_MIME: &str = "image/png";

/// What a query hands back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssistantResponse {
    pub text: Vec<String>,
    /// Always empty; attachments are written to the download directory.
    pub in_memory_files: Vec<InMemoryFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InMemoryFile {
    pub name: String,
    pub content: Vec<u8>,
}

pub fn citation_text(filename: &str) -> String {
    format!("[Cited from {}]", filename)
}

pub fn download_link(file: &FileObject) -> String {
    format!(
        "<https://platform.openai.com/files/{}|Download {}>",
        file.id, file.filename
    )
}

pub struct RunPoller {
    api: Arc<dyn AssistantApi>,
    dispatcher: Arc<ActionDispatcher>,
    sessions: SessionStore,
    download_dir: PathBuf,
    poll_interval: Duration,
    run_timeout: Option<Duration>,
}

impl RunPoller {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        dispatcher: Arc<ActionDispatcher>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            dispatcher,
            sessions: SessionStore::new(),
            download_dir: download_dir.into(),
            poll_interval: Duration::from_secs(1),
            run_timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Send `query` on the session's thread and wait for the assistant's answer.
    ///
    /// Never fails: errors and cancellation yield an empty response.
    pub async fn process_query(
        &self,
        session_key: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> AssistantResponse {
        let cancel = with_deadline(cancel, self.run_timeout);
        let result = self.drive(session_key, query, &cancel).await;
        // Stops the deadline task, if any.
        cancel.cancel();

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Query on session {} failed: {}", session_key, e);
                AssistantResponse::default()
            }
        }
    }

    async fn drive(
        &self,
        session_key: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantResponse, ApiError> {
        let thread_id = self
            .sessions
            .thread_for(session_key, self.api.as_ref())
            .await?;
        self.api.add_user_message(&thread_id, query).await?;
        let run = self.api.create_run(&thread_id).await?;
        tracing::debug!("Created run {} on thread {} ({})", run.id, thread_id, run.status);

        loop {
            if cancel.is_cancelled() {
                tracing::warn!("Run {} abandoned: cancelled", run.id);
                return Ok(AssistantResponse::default());
            }

            let current = self
                .api
                .retrieve_run(&thread_id, &run.id)
                .await
                .inspect_err(|e| tracing::error!("Run status unavailable for {}: {}", run.id, e))?;
            tracing::debug!("Run {} status: {}", current.id, current.status);

            if current.status.is_terminal() {
                if let Some(err) = &current.last_error {
                    tracing::warn!(
                        "Run {} ended {}: {} ({})",
                        current.id,
                        current.status,
                        err.message,
                        err.code
                    );
                }
                return Ok(self.collect_response(&thread_id).await);
            }

            if current.status == RunStatus::RequiresAction {
                self.answer_tool_call(&thread_id, &current, cancel).await;
            }

            if !sleep_or_cancelled(self.poll_interval, cancel).await {
                tracing::warn!("Run {} abandoned: cancelled", run.id);
                return Ok(AssistantResponse::default());
            }
        }
    }

    /// Answer the first pending tool call. Further calls in the batch are left
    /// unanswered.
    async fn answer_tool_call(&self, thread_id: &str, run: &Run, cancel: &CancellationToken) {
        let calls = run.pending_tool_calls();
        let Some(call) = calls.first() else {
            tracing::warn!("Run {} requires action but lists no tool calls", run.id);
            return;
        };
        if calls.len() > 1 {
            tracing::warn!(
                "Run {} requested {} tool calls; answering {} only, ignoring {}",
                run.id,
                calls.len(),
                call.function.name,
                calls.len() - 1
            );
        }

        let output = match ActionRequest::from_tool_call(call) {
            Ok(request) => {
                tracing::debug!("Executing {} for call {}", request.name, request.call_id);
                self.dispatcher
                    .execute(&request.name, &request.arguments, cancel)
                    .await
            }
            Err(e) => {
                tracing::error!("Unparseable arguments for {}: {}", call.function.name, e);
                error_result(format!("Invalid arguments: {}", e))
            }
        };

        let outputs = [ToolOutput {
            tool_call_id: call.id.clone(),
            output: output.to_string(),
        }];
        match self
            .api
            .submit_tool_outputs(thread_id, &run.id, &outputs)
            .await
        {
            Ok(_) => tracing::debug!("Tool output submitted for call {}", call.id),
            Err(e) => tracing::error!("Failed to submit tool outputs for run {}: {}", run.id, e),
        }
    }

    async fn collect_response(&self, thread_id: &str) -> AssistantResponse {
        let messages = match self.api.list_messages_desc(thread_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("Failed to fetch messages for thread {}: {}", thread_id, e);
                return AssistantResponse::default();
            }
        };

        let Some(message) = messages
            .into_iter()
            .find(|m| m.role == MessageRole::Assistant)
        else {
            tracing::debug!("No assistant messages found on thread {}", thread_id);
            return AssistantResponse::default();
        };

        let mut text = Vec::new();
        let mut files = Vec::new();
        for content in message.content {
            match content {
                MessageContent::Text { text: part } => text.push(self.render_text(part).await),
                MessageContent::File { file } => files.push((file.file_id, file.mime_type)),
                MessageContent::ImageFile { image_file } => {
                    files.push((image_file.file_id, IMAGE_FILE_MIME.to_string()))
                }
                MessageContent::Unsupported => {}
            }
        }

        for (file_id, mime_type) in files {
            self.download(&file_id, &mime_type).await;
        }

        AssistantResponse {
            text,
            in_memory_files: Vec::new(),
        }
    }

    /// Replace each annotation marker with a readable citation or link.
    async fn render_text(&self, content: TextContent) -> String {
        let mut value = content.value;
        for annotation in &content.annotations {
            let (marker, file_id, as_link) = match annotation {
                Annotation::FileCitation {
                    text,
                    file_citation,
                } => (text, &file_citation.file_id, false),
                Annotation::FilePath { text, file_path } => (text, &file_path.file_id, true),
                Annotation::Other => continue,
            };

            let file = match self.api.retrieve_file(file_id).await {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Could not look up {} for {}: {}", file_id, marker, e);
                    continue;
                }
            };
            let replacement = if as_link {
                download_link(&file)
            } else {
                citation_text(&file.filename)
            };
            tracing::debug!("Replacing {} with {}", marker, replacement);
            value = value.replace(marker.as_str(), &replacement);
        }
        value
    }

    async fn download(&self, file_id: &str, mime_type: &str) {
        let content = match self.api.file_content(file_id).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to retrieve content for file {}: {}", file_id, e);
                return;
            }
        };
        if let Err(e) = save_attachment(&self.download_dir, file_id, mime_type, &content).await {
            tracing::error!("Failed to save file {}: {}", file_id, e);
        }
    }
}
