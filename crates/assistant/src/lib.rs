//! Bridges an OpenAI assistant to Gmail and Google Calendar.
//!
//! The [`poller::RunPoller`] drives assistant runs, the
//! [`dispatcher::ActionDispatcher`] answers their function calls through a
//! [`provider::Provider`], and [`credentials::CredentialStore`] keeps the
//! Google OAuth token usable.

pub mod assistant_api;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod poller;
pub mod provider;
pub mod wait;

pub use assistant_api::{AssistantApi, OpenAiClient};
pub use config::{AppConfig, ProviderSettings};
pub use credentials::{Credential, CredentialSource, CredentialStore};
pub use dispatcher::ActionDispatcher;
pub use error::{ApiError, CredentialError, DispatchError, ProviderError};
pub use poller::{AssistantResponse, InMemoryFile, RunPoller};
pub use provider::{GoogleProvider, Provider};
