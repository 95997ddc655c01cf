//! HTTP client for the hosted assistant service (threads, runs, files).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use shared_types::{FileObject, ListResponse, Run, Thread, ThreadMessage, ToolOutput};
use std::time::Duration;

use crate::error::ApiError;

/// Query for the latest page of thread messages.
const NEWEST_FIRST: [(&str, &str); 2] = [("order", "desc"), ("limit", "20")];

/// Operations the run poller needs from the assistant service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<Thread, ApiError>;

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<(), ApiError>;

    async fn create_run(&self, thread_id: &str) -> Result<Run, ApiError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError>;

    /// Messages on the thread, newest first.
    async fn list_messages_desc(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError>;

    async fn retrieve_file(&self, file_id: &str) -> Result<FileObject, ApiError>;

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, ApiError>;
}

/// OpenAI Assistants (v2) over reqwest.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    assistant_id: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: String, assistant_id: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            assistant_id,
            model,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!("Assistant service returned {}: {}", status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, ApiError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl AssistantApi for OpenAiClient {
    async fn create_thread(&self) -> Result<Thread, ApiError> {
        self.send_json(self.client.post(self.api_url("threads")).json(&json!({})))
            .await
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<(), ApiError> {
        let url = self.api_url(&format!("threads/{}/messages", thread_id));
        let body = json!({ "role": "user", "content": content });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<Run, ApiError> {
        let url = self.api_url(&format!("threads/{}/runs", thread_id));
        let body = json!({ "assistant_id": self.assistant_id, "model": self.model });
        self.send_json(self.client.post(url).json(&body)).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        let url = self.api_url(&format!("threads/{}/runs/{}", thread_id, run_id));
        self.send_json(self.client.get(url)).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError> {
        let url = self.api_url(&format!(
            "threads/{}/runs/{}/submit_tool_outputs",
            thread_id, run_id
        ));
        let body = json!({ "tool_outputs": outputs });
        self.send_json(self.client.post(url).json(&body)).await
    }

    async fn list_messages_desc(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        let url = self.api_url(&format!("threads/{}/messages", thread_id));
        let page: ListResponse<ThreadMessage> = self
            .send_json(self.client.get(url).query(&NEWEST_FIRST))
            .await?;
        Ok(page.data)
    }

    async fn retrieve_file(&self, file_id: &str) -> Result<FileObject, ApiError> {
        let url = self.api_url(&format!("files/{}", file_id));
        self.send_json(self.client.get(url)).await
    }

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.api_url(&format!("files/{}/content", file_id));
        let response = self.send(self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::serve_json_once;
    use shared_types::RunStatus;

    fn client_for(url: &str) -> OpenAiClient {
        OpenAiClient::new(
            url.trim_end_matches("/token"),
            "sk-test".to_string(),
            "asst_1".to_string(),
            "gpt-3.5-turbo-1106".to_string(),
        )
    }

    #[test]
    fn test_api_url_joins_paths() {
        let client = client_for("https://api.openai.com/v1/");
        assert_eq!(
            client.api_url("/threads/t1/runs"),
            "https://api.openai.com/v1/threads/t1/runs"
        );
    }

    #[tokio::test]
    async fn test_retrieve_run_decodes_status() {
        let url = serve_json_once(
            200,
            r#"{"id": "run_1", "object": "thread.run", "thread_id": "t1", "status": "in_progress"}"#,
        )
        .await;

        let run = client_for(&url).retrieve_run("t1", "run_1").await.unwrap();
        assert_eq!(run.id, "run_1");
        assert_eq!(run.status, RunStatus::InProgress);
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let url = serve_json_once(401, r#"{"error": {"message": "Incorrect API key"}}"#)
            .await;

        let err = client_for(&url).create_thread().await.unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Incorrect API key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_messages_unwraps_page() {
        let url = serve_json_once(
            200,
            r#"{"object": "list", "data": [
                {"id": "msg_2", "role": "assistant", "content": []},
                {"id": "msg_1", "role": "user", "content": []}
            ], "has_more": false}"#,
        )
        .await;

        let messages = client_for(&url).list_messages_desc("t1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "msg_2");
    }
}
