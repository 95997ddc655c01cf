//! Action requests exchanged between the assistant's function calling and the
//! mail/calendar provider.
//!
//! The set of actions is fixed: the wire names below must match the function
//! names declared on the assistant, otherwise every call comes back as
//! "Function not recognized".

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::assistant::ToolCall;

/// Argument object passed with an action.
pub type Arguments = Map<String, Value>;

/// The actions the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionName {
    FetchUnreadEmails,
    FetchEmailContent,
    DraftEmail,
    SendEmail,
    ListUpcomingEvents,
}

/// Static description of one action: its wire name and required arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: ActionName,
    pub wire_name: &'static str,
    pub required_args: &'static [&'static str],
}

pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: ActionName::FetchUnreadEmails,
        wire_name: "fetch_unread_emails",
        required_args: &[],
    },
    ActionSpec {
        name: ActionName::FetchEmailContent,
        wire_name: "fetch_email_content",
        required_args: &["email_id"],
    },
    ActionSpec {
        name: ActionName::DraftEmail,
        wire_name: "draft_email",
        required_args: &["to", "subject", "message_text"],
    },
    ActionSpec {
        name: ActionName::SendEmail,
        wire_name: "send_email",
        required_args: &["draft_id"],
    },
    ActionSpec {
        name: ActionName::ListUpcomingEvents,
        wire_name: "get_events_for_next_10_days",
        required_args: &[],
    },
];

impl ActionName {
    /// Look up an action by the name the assistant uses for it.
    pub fn parse(wire_name: &str) -> Option<Self> {
        ACTIONS
            .iter()
            .find(|spec| spec.wire_name == wire_name)
            .map(|spec| spec.name)
    }

    /// This action's row in [`ACTIONS`].
    pub fn spec(&self) -> Option<&'static ActionSpec> {
        ACTIONS.iter().find(|spec| spec.name == *self)
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().map_or("unknown", |spec| spec.wire_name)
    }

    pub fn required_args(&self) -> &'static [&'static str] {
        self.spec().map(|spec| spec.required_args).unwrap_or_default()
    }
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named action with its arguments and the tool call id it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Arguments,
}

impl ActionRequest {
    /// Build a request from a pending tool call, decoding its JSON arguments.
    ///
    /// An empty argument string is treated as `{}`.
    pub fn from_tool_call(call: &ToolCall) -> Result<Self, serde_json::Error> {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Arguments::new()
        } else {
            serde_json::from_str::<Arguments>(raw)?
        };

        Ok(Self {
            call_id: call.id.clone(),
            name: call.function.name.clone(),
            arguments,
        })
    }
}

/// The error record returned to the assistant in place of an action result.
pub fn error_result(message: impl Into<String>) -> Value {
    serde_json::json!({
        "status": "error",
        "message": message.into(),
    })
}

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // local-part "@" domain "." tld, anchored at the start only
            Regex::new(r"^[^@]+@[^@]+\.[^@]+")
                .map_err(|e| tracing::error!("Invalid email pattern: {}", e))
                .ok()
        })
        .as_ref()
}

/// Cheap syntactic check for a recipient address.
pub fn is_valid_email(address: &str) -> bool {
    email_pattern().is_some_and(|pattern| pattern.is_match(address))
}
