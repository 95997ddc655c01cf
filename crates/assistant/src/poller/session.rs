use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::assistant_api::AssistantApi;
use crate::error::ApiError;

/// Conversation threads keyed by caller-chosen session key.
#[derive(Default)]
pub struct SessionStore {
    threads: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread id for `session_key`, creating the thread on first use.
    ///
    /// Concurrent first queries on one key share a single creation; other
    /// keys are not held up by it. A failed creation is retried on the next
    /// query.
    pub async fn thread_for(
        &self,
        session_key: &str,
        api: &dyn AssistantApi,
    ) -> Result<String, ApiError> {
        let cell = self
            .threads
            .lock()
            .await
            .entry(session_key.to_string())
            .or_default()
            .clone();

        let thread_id = cell
            .get_or_try_init(|| async {
                let thread = api.create_thread().await?;
                tracing::info!("Created thread {} for session {}", thread.id, session_key);
                Ok::<_, ApiError>(thread.id)
            })
            .await?;
        Ok(thread_id.clone())
    }

    /// Forget a session; the next query starts a new thread.
    pub async fn forget(&self, session_key: &str) -> Option<String> {
        self.threads
            .lock()
            .await
            .remove(session_key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Sessions that have a thread.
    pub async fn len(&self) -> usize {
        self.threads
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
