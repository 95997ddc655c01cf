//! Gmail API client for the mail actions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use google_gmail1::api::{Draft, Message};
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::credentials::Credential;
use crate::error::ProviderError;

/// MIME type of the draft media uploads.
const RFC822: &str = "message/rfc822";

/// Headers reported by `fetch_email_content`.
const CONTENT_HEADERS: &[&str] = &["From", "To", "Cc", "Subject", "Date"];

/// Client for interacting with Gmail API
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

/// One line of the unread listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub subject: String,
}

/// Snippet plus selected headers of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    pub snippet: String,
    pub email_details: BTreeMap<String, String>,
}

impl GmailClient {
    /// Build a client that authenticates with the credential's access token.
    pub fn new(credential: &Credential) -> Result<Self, ProviderError> {
        let connector = google_gmail1::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ProviderError::Connector(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = Gmail::new(client, credential.access_token.clone());

        Ok(Self { hub })
    }

    /// Point every call (uploads included) at `root_url` instead of Google.
    pub fn with_root_url(mut self, root_url: &str) -> Self {
        self.hub.root_url(root_url.to_string());
        self.hub.base_url(root_url.to_string());
        self
    }

    /// Unread inbox messages that are not replies, newest first.
    pub async fn fetch_unread(&self, max_results: u32) -> Result<Vec<EmailSummary>, ProviderError> {
        let (_, list_response) = self
            .hub
            .users()
            .messages_list("me")
            .add_label_ids("INBOX")
            .q("is:unread -in:replies")
            .max_results(max_results)
            .doit()
            .await
            .map_err(|e| ProviderError::google("messages.list", e))?;

        let messages = list_response.messages.unwrap_or_default();
        tracing::debug!("Total unread messages retrieved: {}", messages.len());

        let mut emails = Vec::new();
        for msg in messages {
            let Some(id) = msg.id else { continue };
            match self.get_metadata(&id, &["Subject"]).await {
                Ok(message) => {
                    let subject = header_value(&message, "subject")
                        .unwrap_or_else(|| "No Subject".to_string());
                    tracing::debug!("Message ID: {} has subject: {}", id, subject);
                    emails.push(EmailSummary { id, subject });
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch message {}: {}", id, e);
                }
            }
        }

        Ok(emails)
    }

    /// Snippet and the From/To/Cc/Subject/Date headers of a message.
    pub async fn fetch_content(&self, message_id: &str) -> Result<EmailContent, ProviderError> {
        let message = self.get_metadata(message_id, CONTENT_HEADERS).await?;
        Ok(content_from_message(&message))
    }

    /// Create a draft from a plain-text message and return its id.
    pub async fn create_draft(
        &self,
        to: &str,
        subject: &str,
        message_text: &str,
    ) -> Result<String, ProviderError> {
        let raw = build_raw_message(to, subject, message_text);
        let (_, draft) = self
            .hub
            .users()
            .drafts_create(Draft::default(), "me")
            .upload(Cursor::new(raw.into_bytes()), rfc822()?)
            .await
            .map_err(|e| ProviderError::google("drafts.create", e))?;

        let draft_id = draft
            .id
            .ok_or_else(|| ProviderError::UnexpectedResponse("draft has no id".to_string()))?;
        tracing::info!("Draft created: {}", draft_id);
        Ok(draft_id)
    }

    /// Send an existing draft unchanged and return the sent message id.
    pub async fn send_draft(&self, draft_id: &str) -> Result<String, ProviderError> {
        // drafts.send only takes a media upload, so resend the draft's own message.
        let (_, existing) = self
            .hub
            .users()
            .drafts_get("me", draft_id)
            .format("raw")
            .doit()
            .await
            .map_err(|e| ProviderError::google("drafts.get", e))?;
        let raw = existing.message.and_then(|m| m.raw).ok_or_else(|| {
            ProviderError::UnexpectedResponse(format!("draft {} has no raw message", draft_id))
        })?;

        let request = Draft {
            id: Some(draft_id.to_string()),
            ..Default::default()
        };
        let (_, sent) = self
            .hub
            .users()
            .drafts_send(request, "me")
            .upload(Cursor::new(raw), rfc822()?)
            .await
            .map_err(|e| ProviderError::google("drafts.send", e))?;

        let sent_id = sent.id.ok_or_else(|| {
            ProviderError::UnexpectedResponse("sent message has no id".to_string())
        })?;
        tracing::info!("Draft {} sent as message {}", draft_id, sent_id);
        Ok(sent_id)
    }

    async fn get_metadata(
        &self,
        message_id: &str,
        headers: &[&str],
    ) -> Result<Message, ProviderError> {
        let mut call = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("metadata");
        for header in headers {
            call = call.add_metadata_headers(header);
        }

        let (_, message) = call
            .doit()
            .await
            .map_err(|e| ProviderError::google("messages.get", e))?;
        Ok(message)
    }
}

fn rfc822() -> Result<mime::Mime, ProviderError> {
    RFC822
        .parse()
        .map_err(|e: mime::FromStrError| ProviderError::UnexpectedResponse(e.to_string()))
}

fn header_value(message: &Message, name: &str) -> Option<String> {
    message
        .payload
        .as_ref()?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .and_then(|h| h.value.clone())
}

fn content_from_message(message: &Message) -> EmailContent {
    let mut email_details = BTreeMap::new();
    if let Some(headers) = message.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                if CONTENT_HEADERS.contains(&name.as_str()) {
                    email_details.insert(name.clone(), value.clone());
                }
            }
        }
    }

    EmailContent {
        snippet: message
            .snippet
            .clone()
            .unwrap_or_else(|| "No snippet available".to_string()),
        email_details,
    }
}

/// Strip line breaks so a header value cannot start a new header.
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn encode_subject(subject: &str) -> String {
    let subject = header_safe(subject);
    if subject.is_ascii() {
        subject
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject.as_bytes()))
    }
}

/// Plain-text RFC 822 message, uploaded as the draft's media.
pub fn build_raw_message(to: &str, subject: &str, message_text: &str) -> String {
    format!(
        "To: {}\r\nFrom: me\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"utf-8\"\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{}",
        header_safe(to),
        encode_subject(subject),
        message_text
    )
}
