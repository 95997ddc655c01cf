use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Longest list-events window accepted from the environment.
pub const MAX_EVENTS_DAYS_AHEAD: i64 = 366;

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub assistant_id: Option<String>,
    pub model: String,
    pub client_secret_path: PathBuf,
    pub credentials_path: PathBuf,
    pub download_dir: PathBuf,
    pub run_poll_interval: Duration,
    pub credential_poll_interval: Duration,
    pub run_timeout: Option<Duration>,
    pub unread_max_results: u32,
    pub events_days_ahead: i64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// `OPENAI_API_KEY` and `ASSISTANT_ID` are only checked by
    /// [`AppConfig::assistant_keys`], so the provider-only commands run
    /// without them.
    pub fn from_env() -> Result<Self> {
        let events_days_ahead = env::var("EVENTS_DAYS_AHEAD")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("EVENTS_DAYS_AHEAD must be a valid number")?;
        check_events_days_ahead(events_days_ahead)?;

        Ok(Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            assistant_id: env::var("ASSISTANT_ID").ok(),
            model: env::var("ASSISTANT_MODEL")
                .unwrap_or_else(|_| "gpt-3.5-turbo-1106".to_string()),
            client_secret_path: env::var("GOOGLE_CLIENT_SECRET_FILE")
                .unwrap_or_else(|_| "client_secret.json".to_string())
                .into(),
            credentials_path: env::var("GOOGLE_CREDENTIALS_FILE")
                .unwrap_or_else(|_| "gmail-api-credentials.json".to_string())
                .into(),
            download_dir: env::var("DOWNLOAD_DIR")
                .unwrap_or_else(|_| ".".to_string())
                .into(),
            run_poll_interval: Duration::from_millis(
                env::var("RUN_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .context("RUN_POLL_INTERVAL_MS must be a valid number")?,
            ),
            credential_poll_interval: Duration::from_secs(
                env::var("CREDENTIAL_POLL_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("CREDENTIAL_POLL_INTERVAL_SECS must be a valid number")?,
            ),
            run_timeout: match env::var("RUN_TIMEOUT_SECS") {
                Ok(secs) => Some(Duration::from_secs(
                    secs.parse()
                        .context("RUN_TIMEOUT_SECS must be a valid number")?,
                )),
                Err(_) => None,
            },
            unread_max_results: env::var("UNREAD_MAX_RESULTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("UNREAD_MAX_RESULTS must be a valid number")?,
            events_days_ahead,
        })
    }

    /// API key and assistant id, both required to talk to the assistant service.
    pub fn assistant_keys(&self) -> Result<(String, String)> {
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY must be set")?;
        let assistant_id = self
            .assistant_id
            .clone()
            .context("ASSISTANT_ID must be set")?;
        Ok((api_key, assistant_id))
    }

    /// Settings the Google provider needs, split out so the provider can be
    /// built without the assistant-service keys.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            unread_max_results: self.unread_max_results,
            events_days_ahead: self.events_days_ahead,
        }
    }
}

fn check_events_days_ahead(days: i64) -> Result<()> {
    anyhow::ensure!(
        (1..=MAX_EVENTS_DAYS_AHEAD).contains(&days),
        "EVENTS_DAYS_AHEAD must be between 1 and {}, got {}",
        MAX_EVENTS_DAYS_AHEAD,
        days
    );
    Ok(())
}

/// Tunables for the Gmail / Calendar actions.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSettings {
    /// Maximum messages returned by `fetch_unread_emails`
    pub unread_max_results: u32,
    /// Window for `get_events_for_next_10_days`
    pub events_days_ahead: i64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            unread_max_results: 5,
            events_days_ahead: 10,
        }
    }
}
