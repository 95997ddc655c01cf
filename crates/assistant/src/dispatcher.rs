//! Routes an action request to the provider once a usable credential exists.

use serde_json::Value;
use shared_types::{is_valid_email, ActionName, Arguments};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::credentials::{Credential, CredentialSource};
use crate::error::DispatchError;
use crate::provider::Provider;
use crate::wait::sleep_or_cancelled;

/// An action with its declared arguments pulled out of the argument object.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionCall<'a> {
    FetchUnreadEmails,
    FetchEmailContent {
        email_id: &'a str,
    },
    DraftEmail {
        to: &'a str,
        subject: &'a str,
        message_text: &'a str,
    },
    SendEmail {
        draft_id: &'a str,
    },
    ListUpcomingEvents,
}

fn string_arg<'a>(arguments: &'a Arguments, key: &'static str) -> Result<&'a str, DispatchError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or(DispatchError::MissingArgument(key))
}

impl<'a> ActionCall<'a> {
    fn parse(name: &str, arguments: &'a Arguments) -> Result<Self, DispatchError> {
        let action = ActionName::parse(name)
            .ok_or_else(|| DispatchError::ActionNotRecognized(name.to_string()))?;

        for key in action.required_args() {
            string_arg(arguments, *key)?;
        }

        let call = match action {
            ActionName::FetchUnreadEmails => ActionCall::FetchUnreadEmails,
            ActionName::FetchEmailContent => ActionCall::FetchEmailContent {
                email_id: string_arg(arguments, "email_id")?,
            },
            ActionName::DraftEmail => {
                let to = string_arg(arguments, "to")?;
                if !is_valid_email(to) {
                    return Err(DispatchError::InvalidEmail(to.to_string()));
                }
                ActionCall::DraftEmail {
                    to,
                    subject: string_arg(arguments, "subject")?,
                    message_text: string_arg(arguments, "message_text")?,
                }
            }
            ActionName::SendEmail => ActionCall::SendEmail {
                draft_id: string_arg(arguments, "draft_id")?,
            },
            ActionName::ListUpcomingEvents => ActionCall::ListUpcomingEvents,
        };
        Ok(call)
    }
}

/// Executes named actions against the provider.
pub struct ActionDispatcher {
    credentials: Arc<dyn CredentialSource>,
    provider: Arc<dyn Provider>,
    credential_poll_interval: Duration,
}

impl ActionDispatcher {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        provider: Arc<dyn Provider>,
        credential_poll_interval: Duration,
    ) -> Self {
        Self {
            credentials,
            provider,
            credential_poll_interval,
        }
    }

    /// Run an action and return its result, or the error record on failure.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Arguments,
        cancel: &CancellationToken,
    ) -> Value {
        match self.try_execute(name, arguments, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Action {} failed: {}", name, e);
                e.into_result()
            }
        }
    }

    pub async fn try_execute(
        &self,
        name: &str,
        arguments: &Arguments,
        cancel: &CancellationToken,
    ) -> Result<Value, DispatchError> {
        // Argument and recipient checks run before any credential or network work.
        let call = ActionCall::parse(name, arguments)?;
        tracing::debug!("Dispatching {:?}", call);

        let credential = self.acquire_credential(cancel).await?;

        let result = match call {
            ActionCall::FetchUnreadEmails => self.provider.fetch_unread_emails(&credential).await?,
            ActionCall::FetchEmailContent { email_id } => {
                self.provider
                    .fetch_email_content(&credential, email_id)
                    .await?
            }
            ActionCall::DraftEmail {
                to,
                subject,
                message_text,
            } => {
                self.provider
                    .draft_email(&credential, to, subject, message_text)
                    .await?
            }
            ActionCall::SendEmail { draft_id } => {
                self.provider.send_email(&credential, draft_id).await?
            }
            ActionCall::ListUpcomingEvents => {
                self.provider.list_upcoming_events(&credential).await?
            }
        };
        Ok(result)
    }

    /// Return a valid credential, authorizing and then waiting for one if needed.
    async fn acquire_credential(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Credential, DispatchError> {
        if let Some(credential) = self.credentials.get_valid_credential().await {
            return Ok(credential);
        }

        tracing::info!("No valid credential, starting authorization");
        tokio::select! {
            _ = cancel.cancelled() => return Err(DispatchError::CredentialUnavailable),
            result = self.credentials.begin_interactive_authorization() => {
                if let Err(e) = result {
                    tracing::error!("Authorization failed: {}", e);
                }
            }
        }

        loop {
            if let Some(credential) = self.credentials.get_valid_credential().await {
                return Ok(credential);
            }
            tracing::debug!(
                "Waiting {:?} for a valid credential",
                self.credential_poll_interval
            );
            if !sleep_or_cancelled(self.credential_poll_interval, cancel).await {
                tracing::warn!("Gave up waiting for a credential");
                return Err(DispatchError::CredentialUnavailable);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, ProviderError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn credential() -> Credential {
        Credential {
            access_token: "ya29.test".to_string(),
            refresh_token: None,
            token_uri: "http://127.0.0.1:9/token".to_string(),
            client_id: None,
            client_secret: None,
            scopes: vec![],
            expiry: None,
        }
    }

    /// Hands out scripted answers, then keeps repeating the fallback.
    struct ScriptedCredentials {
        answers: Mutex<VecDeque<Option<Credential>>>,
        fallback: Option<Credential>,
        lookups: AtomicUsize,
        authorizations: AtomicUsize,
    }

    impl ScriptedCredentials {
        fn new(answers: Vec<Option<Credential>>, fallback: Option<Credential>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                fallback,
                lookups: AtomicUsize::new(0),
                authorizations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialSource for ScriptedCredentials {
        async fn get_valid_credential(&self) -> Option<Credential> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }

        async fn begin_interactive_authorization(&self) -> Result<(), CredentialError> {
            self.authorizations.fetch_add(1, Ordering::SeqCst);
            Err(CredentialError::AuthorizationAborted("no browser".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        async fn fetch_unread_emails(&self, _: &Credential) -> Result<Value, ProviderError> {
            self.record("fetch_unread".to_string());
            Ok(json!([{"id": "m1", "subject": "Hello"}]))
        }

        async fn fetch_email_content(
            &self,
            _: &Credential,
            email_id: &str,
        ) -> Result<Value, ProviderError> {
            self.record(format!("fetch_content:{}", email_id));
            Ok(json!({"snippet": "hi", "email_details": {}}))
        }

        async fn draft_email(
            &self,
            _: &Credential,
            to: &str,
            subject: &str,
            message_text: &str,
        ) -> Result<Value, ProviderError> {
            self.record(format!("draft:{}:{}:{}", to, subject, message_text));
            Ok(json!({"status": "success", "draft_id": "r1"}))
        }

        async fn send_email(&self, _: &Credential, draft_id: &str) -> Result<Value, ProviderError> {
            self.record(format!("send:{}", draft_id));
            Err(ProviderError::google("drafts.send", "Requested entity was not found."))
        }

        async fn list_upcoming_events(&self, _: &Credential) -> Result<Value, ProviderError> {
            self.record("events".to_string());
            Ok(json!([]))
        }
    }

    fn dispatcher(
        credentials: Arc<ScriptedCredentials>,
        provider: Arc<RecordingProvider>,
    ) -> ActionDispatcher {
        ActionDispatcher::new(credentials, provider, Duration::from_millis(5))
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected_without_credentials() {
        let credentials = ScriptedCredentials::new(vec![], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials.clone(), provider.clone());

        let result = dispatcher
            .execute(
                "delete_everything",
                &Arguments::new(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            result,
            json!({"status": "error", "message": "Function not recognized"})
        );
        assert_eq!(credentials.lookups.load(Ordering::SeqCst), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_each_action_routes_with_declared_arguments() {
        let credentials = ScriptedCredentials::new(vec![], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials, provider.clone());
        let cancel = CancellationToken::new();

        dispatcher
            .execute("fetch_unread_emails", &Arguments::new(), &cancel)
            .await;
        dispatcher
            .execute(
                "fetch_email_content",
                &args(json!({"email_id": "18c2", "extra": "ignored"})),
                &cancel,
            )
            .await;
        let drafted = dispatcher
            .execute(
                "draft_email",
                &args(json!({"to": "bob@example.com", "subject": "Hi", "message_text": "Body"})),
                &cancel,
            )
            .await;
        dispatcher
            .execute("get_events_for_next_10_days", &Arguments::new(), &cancel)
            .await;

        assert_eq!(drafted, json!({"status": "success", "draft_id": "r1"}));
        assert_eq!(
            provider.calls(),
            vec![
                "fetch_unread",
                "fetch_content:18c2",
                "draft:bob@example.com:Hi:Body",
                "events",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_recipient_never_reaches_provider() {
        let credentials = ScriptedCredentials::new(vec![], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials.clone(), provider.clone());

        let result = dispatcher
            .execute(
                "draft_email",
                &args(json!({"to": "not-an-email", "subject": "Hi", "message_text": "Body"})),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result["message"], "Invalid email address");
        assert_eq!(credentials.lookups.load(Ordering::SeqCst), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_argument_is_reported() {
        let credentials = ScriptedCredentials::new(vec![], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials, provider.clone());

        let result = dispatcher
            .execute(
                "fetch_email_content",
                &args(json!({"email_id": 42})),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result["message"], "Missing required argument: email_id");
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_error_result() {
        let credentials = ScriptedCredentials::new(vec![], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials, provider.clone());

        let result = dispatcher
            .execute(
                "send_email",
                &args(json!({"draft_id": "r9"})),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result["status"], "error");
        assert_eq!(
            result["message"],
            "drafts.send failed: Requested entity was not found."
        );
        assert_eq!(provider.calls(), vec!["send:r9"]);
    }

    #[tokio::test]
    async fn test_waits_for_credential_after_authorization() {
        let credentials = ScriptedCredentials::new(vec![None, None, None], Some(credential()));
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials.clone(), provider.clone());

        let result = dispatcher
            .execute(
                "fetch_unread_emails",
                &Arguments::new(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result[0]["id"], "m1");
        assert_eq!(credentials.authorizations.load(Ordering::SeqCst), 1);
        assert_eq!(credentials.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_wait_reports_unavailable_credential() {
        let credentials = ScriptedCredentials::new(vec![], None);
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = dispatcher(credentials, provider.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result = dispatcher
            .execute("fetch_unread_emails", &Arguments::new(), &cancel)
            .await;

        assert_eq!(
            result["message"],
            "Failed to obtain valid access token after waiting."
        );
        assert!(provider.calls().is_empty());
    }

    /// Authorization that waits on a user who never responds.
    struct UnansweredConsent;

    #[async_trait]
    impl CredentialSource for UnansweredConsent {
        async fn get_valid_credential(&self) -> Option<Credential> {
            None
        }

        async fn begin_interactive_authorization(&self) -> Result<(), CredentialError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_authorization() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = ActionDispatcher::new(
            Arc::new(UnansweredConsent),
            provider.clone(),
            Duration::from_millis(5),
        );
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let name = "get_events_for_next_10_days";
        let args = Arguments::new();
        let events = dispatcher.execute(name, &args, &cancel);
        let result = tokio::time::timeout(Duration::from_secs(5), events)
            .await
            .unwrap();

        assert_eq!(
            result["message"],
            "Failed to obtain valid access token after waiting."
        );
        assert!(provider.calls().is_empty());
    }
}
