//! Mail and calendar actions backed by Google APIs.

pub mod calendar_client;
pub mod gmail_client;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ProviderSettings;
use crate::credentials::Credential;
use crate::error::ProviderError;

pub use calendar_client::{CalendarClient, EventSummary};
pub use gmail_client::{EmailContent, EmailSummary, GmailClient};

/// The remote operations the dispatcher can route to.
///
/// Results are the JSON values handed back to the assistant unchanged.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn fetch_unread_emails(&self, credential: &Credential) -> Result<Value, ProviderError>;

    async fn fetch_email_content(
        &self,
        credential: &Credential,
        email_id: &str,
    ) -> Result<Value, ProviderError>;

    async fn draft_email(
        &self,
        credential: &Credential,
        to: &str,
        subject: &str,
        message_text: &str,
    ) -> Result<Value, ProviderError>;

    async fn send_email(&self, credential: &Credential, draft_id: &str)
        -> Result<Value, ProviderError>;

    async fn list_upcoming_events(&self, credential: &Credential) -> Result<Value, ProviderError>;
}

/// Gmail + Google Calendar, one hub per call built from the caller's token.
pub struct GoogleProvider {
    settings: ProviderSettings,
    gmail_root_url: Option<String>,
}

impl GoogleProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            gmail_root_url: None,
        }
    }

    fn gmail(&self, credential: &Credential) -> Result<GmailClient, ProviderError> {
        let client = GmailClient::new(credential)?;
        Ok(match &self.gmail_root_url {
            Some(root_url) => client.with_root_url(root_url),
            None => client,
        })
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ProviderError> {
    serde_json::to_value(value).map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn fetch_unread_emails(&self, credential: &Credential) -> Result<Value, ProviderError> {
        let emails = self
            .gmail(credential)?
            .fetch_unread(self.settings.unread_max_results)
            .await?;
        to_value(emails)
    }

    async fn fetch_email_content(
        &self,
        credential: &Credential,
        email_id: &str,
    ) -> Result<Value, ProviderError> {
        let content = self.gmail(credential)?.fetch_content(email_id).await?;
        to_value(content)
    }

    async fn draft_email(
        &self,
        credential: &Credential,
        to: &str,
        subject: &str,
        message_text: &str,
    ) -> Result<Value, ProviderError> {
        let draft_id = self
            .gmail(credential)?
            .create_draft(to, subject, message_text)
            .await?;
        Ok(json!({ "status": "success", "draft_id": draft_id }))
    }

    async fn send_email(
        &self,
        credential: &Credential,
        draft_id: &str,
    ) -> Result<Value, ProviderError> {
        let sent_id = self.gmail(credential)?.send_draft(draft_id).await?;
        Ok(json!({ "status": "success", "sent_message_id": sent_id }))
    }

    async fn list_upcoming_events(&self, credential: &Credential) -> Result<Value, ProviderError> {
        let events = CalendarClient::new(credential)?
            .upcoming_events(self.settings.events_days_ahead)
            .await?;
        to_value(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::serve_json;

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

    fn provider_against(base: &str) -> GoogleProvider {
        // The hub's connector needs a process-wide crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        GoogleProvider {
            settings: ProviderSettings::default(),
            gmail_root_url: Some(format!("{}/", base)),
        }
    }

    #[tokio::test]
    async fn test_draft_is_uploaded_as_rfc822() {
        let (base, mut requests) =
            serve_json(vec![(200, r#"{"id": "r-123", "message": {"id": "m1"}}"#)]).await;
        let provider = provider_against(&base);

        let result = provider
            .draft_email(&credential(), "bob@example.com", "Hi", "Body")
            .await
            .unwrap();
        assert_eq!(result, json!({"status": "success", "draft_id": "r-123"}));

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /upload/gmail/v1/users/me/drafts?"));
        assert!(request.contains("uploadType=multipart"));
        assert!(request.contains("message/rfc822"));
        assert!(request.contains("To: bob@example.com\r\nFrom: me\r\nSubject: Hi"));
    }

    #[tokio::test]
    async fn test_send_resends_the_stored_draft() {
        // "VG86IGJvYkBleGFtcGxlLmNvbQ" is base64url for "To: bob@example.com".
        let (base, mut requests) = serve_json(vec![
            (
                200,
                r#"{"id": "r-123", "message": {"id": "m1", "raw": "VG86IGJvYkBleGFtcGxlLmNvbQ"}}"#,
            ),
            (200, r#"{"id": "m-456", "threadId": "t1"}"#),
        ])
        .await;
        let provider = provider_against(&base);

        let result = provider.send_email(&credential(), "r-123").await.unwrap();
        assert_eq!(
            result,
            json!({"status": "success", "sent_message_id": "m-456"})
        );

        let lookup = requests.recv().await.unwrap();
        assert!(lookup.starts_with("GET /gmail/v1/users/me/drafts/r-123?"));
        assert!(lookup.contains("format=raw"));

        let send = requests.recv().await.unwrap();
        assert!(send.starts_with("POST /upload/gmail/v1/users/me/drafts/send?"));
        assert!(send.contains(r#""id":"r-123""#));
        assert!(send.contains("To: bob@example.com"));
    }

    #[tokio::test]
    async fn test_missing_draft_is_provider_error() {
        let (base, _requests) =
            serve_json(vec![(404, r#"{"error": {"code": 404, "message": "Not Found"}}"#)]).await;
        let provider = provider_against(&base);

        let err = provider.send_email(&credential(), "missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::Google { call: "drafts.get", .. }));
    }
}
