use anyhow::Context;
use assistant::{
    ActionDispatcher, AppConfig, AssistantResponse, CredentialSource, CredentialStore,
    GoogleProvider, OpenAiClient, RunPoller,
};
use clap::{Parser, Subcommand};
use shared_types::Arguments;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "assistant")]
#[command(about = "Ask an OpenAI assistant that can read your Gmail and Calendar")]
#[command(
    long_about = "Sends queries to an OpenAI assistant and answers its function calls \
    (fetch, draft and send email, list upcoming events) against Gmail and Google Calendar.\n\n\
    Configuration is read from the environment and from a .env file."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single query and print the assistant's reply
    Ask {
        /// The question or instruction for the assistant
        query: String,

        /// Session key; queries sharing a key share a conversation thread
        #[arg(short, long, default_value = "default")]
        session: String,
    },

    /// Interactive conversation, one query per line
    ///
    /// Ctrl+C cancels the query in flight; end input (Ctrl+D) to quit.
    Chat {
        /// Session key; defaults to a fresh random key
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Authorize Google access now and store the credential
    Auth,

    /// Check whether a usable Google credential is stored, refreshing it if needed
    Token,

    /// Run one action directly and print its JSON result
    Action {
        /// Action name, e.g. fetch_unread_emails or draft_email
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant=debug,shared_types=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Both reqwest and the Google hubs use rustls; pin the provider once.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("TLS crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Ask { query, session } => {
            let poller = build_poller(&config)?;
            let response = run_cancellable(&poller, &session, &query).await;
            print_response(&response);
        }
        Commands::Chat { session } => {
            let poller = build_poller(&config)?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat(&poller, &session).await?;
        }
        Commands::Auth => {
            let store = credential_store(&config);
            store
                .begin_interactive_authorization()
                .await
                .context("Authorization failed")?;
            println!("Credential stored at {}", store.path().display());
        }
        Commands::Token => match credential_store(&config).get_valid_credential().await {
            Some(credential) => match credential.expiry {
                Some(expiry) => println!("Valid credential, expires {}", expiry.to_rfc3339()),
                None => println!("Valid credential, no expiry recorded"),
            },
            None => println!("No valid credential; run `assistant auth`"),
        },
        Commands::Action { name, args } => {
            let arguments: Arguments =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let dispatcher = build_dispatcher(&config);
            let cancel = CancellationToken::new();
            let action = dispatcher.execute(&name, &arguments, &cancel);
            tokio::pin!(action);

            let result = tokio::select! {
                result = &mut action => result,
                _ = signal::ctrl_c() => {
                    eprintln!("Cancelling...");
                    cancel.cancel();
                    action.await
                }
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn credential_store(config: &AppConfig) -> CredentialStore {
    CredentialStore::new(&config.credentials_path, &config.client_secret_path)
}

fn build_dispatcher(config: &AppConfig) -> ActionDispatcher {
    ActionDispatcher::new(
        Arc::new(credential_store(config)),
        Arc::new(GoogleProvider::new(config.provider_settings())),
        config.credential_poll_interval,
    )
}

fn build_poller(config: &AppConfig) -> anyhow::Result<RunPoller> {
    let (api_key, assistant_id) = config.assistant_keys()?;
    let api = OpenAiClient::new(
        &config.openai_base_url,
        api_key,
        assistant_id,
        config.model.clone(),
    );

    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!(
            "Failed to create download directory {}",
            config.download_dir.display()
        )
    })?;

    Ok(RunPoller::new(
        Arc::new(api),
        Arc::new(build_dispatcher(config)),
        &config.download_dir,
    )
    .with_poll_interval(config.run_poll_interval)
    .with_run_timeout(config.run_timeout))
}

/// Run one query; Ctrl+C cancels it and returns whatever the poller yields.
async fn run_cancellable(poller: &RunPoller, session: &str, query: &str) -> AssistantResponse {
    let cancel = CancellationToken::new();
    let query = poller.process_query(session, query, &cancel);
    tokio::pin!(query);

    tokio::select! {
        response = &mut query => response,
        _ = signal::ctrl_c() => {
            eprintln!("Cancelling...");
            cancel.cancel();
            query.await
        }
    }
}

async fn chat(poller: &RunPoller, session: &str) -> anyhow::Result<()> {
    eprintln!("Session {} (Ctrl+D to quit)", session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let response = run_cancellable(poller, session, query).await;
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &AssistantResponse) {
    if response.text.is_empty() {
        println!("(no response)");
        return;
    }
    for text in &response.text {
        println!("{}", text);
    }
}
