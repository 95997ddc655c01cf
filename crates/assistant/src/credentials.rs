//! OAuth credential storage for the mail/calendar provider.
//!
//! The credential lives in a single JSON file whose layout matches what
//! google-auth writes (`token` is accepted as an alias of `access_token`), so
//! a file produced by other tooling can be dropped in place.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use yup_oauth2::ApplicationSecret;

use crate::error::CredentialError;

/// Scopes requested for Gmail and Calendar access.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/calendar",
];

/// Treat a token as expired this long before its stated expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Access token + refresh capability for the provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential without an expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + TimeDelta::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_uri", &self.token_uri)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Where the dispatcher gets a usable credential from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The stored credential if it is (or could be refreshed to be) valid.
    ///
    /// Any failure along the way is logged and reported as `None`.
    async fn get_valid_credential(&self) -> Option<Credential>;

    /// Run the out-of-band consent flow and persist the resulting credential.
    /// May block on user input.
    async fn begin_interactive_authorization(&self) -> Result<(), CredentialError>;
}

/// Authorization code plus the redirect URI it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub redirect_uri: String,
}

/// Shows the consent URL and captures the resulting authorization code.
///
/// Dropping the returned future abandons the flow.
#[async_trait]
pub trait AuthorizationCodeReader: Send + Sync {
    async fn read_code(
        &self,
        secret: &ApplicationSecret,
    ) -> Result<AuthorizationCode, CredentialError>;
}

/// Receives the code on a loopback redirect (`http://127.0.0.1:<port>`).
pub struct LoopbackCodeReader;

#[async_trait]
impl AuthorizationCodeReader for LoopbackCodeReader {
    async fn read_code(
        &self,
        secret: &ApplicationSecret,
    ) -> Result<AuthorizationCode, CredentialError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
        let auth_url = CredentialStore::authorization_url(secret, &redirect_uri);

        tracing::info!("Please go to this URL and authorize the application");
        eprintln!("\n{}\n", auth_url);
        tracing::debug!("Waiting for the redirect on {}", redirect_uri);

        let code = accept_redirect(&listener).await?;
        Ok(AuthorizationCode { code, redirect_uri })
    }
}

/// Serve redirect requests until one carries `code` or `error`.
async fn accept_redirect(listener: &TcpListener) -> Result<String, CredentialError> {
    loop {
        let (mut socket, _) = listener.accept().await?;
        let mut buf = vec![0u8; 8192];
        let n = socket.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let outcome = redirect_outcome(&request);

        let page = match &outcome {
            Some(Ok(_)) => "Authorization received. You can close this tab.",
            Some(Err(_)) => "Authorization was not granted. You can close this tab.",
            None => "Waiting for authorization.",
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            page.len(),
            page
        );
        if let Err(e) = socket.write_all(response.as_bytes()).await {
            tracing::debug!("Failed to answer redirect request: {}", e);
        }

        match outcome {
            Some(result) => return result,
            // Favicon and other stray requests.
            None => continue,
        }
    }
}

/// `code` or `error` from the query string of the request line.
fn redirect_outcome(request: &str) -> Option<Result<String, CredentialError>> {
    let target = request.lines().next()?.split_whitespace().nth(1)?;
    let (_, query) = target.split_once('?')?;

    let mut error = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "code" if !value.is_empty() => return Some(Ok(value)),
            "error" => error = Some(value),
            _ => {}
        }
    }
    error.map(|e| Err(CredentialError::AuthorizationAborted(e)))
}

/// Absolute expiry for an `expires_in` lifetime in seconds.
fn expiry_after(expires_in: Option<i64>) -> Result<Option<DateTime<Utc>>, CredentialError> {
    let Some(secs) = expires_in else {
        return Ok(None);
    };
    TimeDelta::try_seconds(secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .map(Some)
        .ok_or(CredentialError::InvalidLifetime(secs))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// File-backed credential store with refresh and interactive authorization.
pub struct CredentialStore {
    path: PathBuf,
    client_secret_path: PathBuf,
    http: reqwest::Client,
    code_reader: Box<dyn AuthorizationCodeReader>,
    // Serializes load/refresh/save so concurrent callers refresh once.
    io_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, client_secret_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            client_secret_path: client_secret_path.into(),
            http: reqwest::Client::new(),
            code_reader: Box::new(LoopbackCodeReader),
            io_lock: Mutex::new(()),
        }
    }

    pub fn with_code_reader(mut self, reader: impl AuthorizationCodeReader + 'static) -> Self {
        self.code_reader = Box::new(reader);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(credential)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        tokio::fs::rename(&tmp_path, &self.path).await?;
        tracing::debug!("Credentials saved to {}", self.path.display());
        Ok(())
    }

    async fn read_client_secret(&self) -> Result<ApplicationSecret, CredentialError> {
        yup_oauth2::read_application_secret(&self.client_secret_path)
            .await
            .map_err(|e| CredentialError::ClientSecret {
                path: self.client_secret_path.clone(),
                reason: e.to_string(),
            })
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(CredentialError::NoRefreshToken)?;

        let (client_id, client_secret) = match (&credential.client_id, &credential.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                let secret = self.read_client_secret().await?;
                (secret.client_id, secret.client_secret)
            }
        };

        let response = self
            .http
            .post(&credential.token_uri)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let tokens = Self::parse_token_response(response).await?;

        Ok(Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(Some(refresh_token)),
            token_uri: credential.token_uri.clone(),
            client_id: Some(client_id),
            client_secret: Some(client_secret),
            scopes: tokens
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| credential.scopes.clone()),
            expiry: expiry_after(tokens.expires_in)?,
        })
    }

    async fn parse_token_response(
        response: reqwest::Response,
    ) -> Result<TokenResponse, CredentialError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenEndpoint { status, body });
        }
        Ok(response.json().await?)
    }

    /// Consent URL for the installed-app flow, asking for offline access.
    pub fn authorization_url(secret: &ApplicationSecret, redirect_uri: &str) -> String {
        let scopes = SCOPES.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            secret.auth_uri,
            urlencoding::encode(&secret.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
        )
    }

    async fn exchange_code(
        &self,
        secret: &ApplicationSecret,
        redirect_uri: &str,
        code: &str,
    ) -> Result<Credential, CredentialError> {
        let response = self
            .http
            .post(&secret.token_uri)
            .form(&[
                ("code", code),
                ("client_id", secret.client_id.as_str()),
                ("client_secret", secret.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let tokens = Self::parse_token_response(response).await?;
        if tokens.refresh_token.is_none() {
            tracing::warn!("No refresh token received; re-authorization needed on expiry");
        }

        Ok(Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_uri: secret.token_uri.clone(),
            client_id: Some(secret.client_id.clone()),
            client_secret: Some(secret.client_secret.clone()),
            scopes: tokens
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect()),
            expiry: expiry_after(tokens.expires_in)?,
        })
    }

    async fn try_get_valid_credential(&self) -> Result<Option<Credential>, CredentialError> {
        let _guard = self.io_lock.lock().await;

        let Some(credential) = self.load().await? else {
            tracing::debug!("Credentials file not found at {}", self.path.display());
            return Ok(None);
        };

        if !credential.is_expired() {
            tracing::debug!("Credentials are valid");
            return Ok(Some(credential));
        }

        if credential.refresh_token.is_none() {
            tracing::debug!("Credentials expired and cannot be refreshed");
            return Ok(None);
        }

        tracing::debug!("Credentials expired, refreshing token");
        let refreshed = self.refresh(&credential).await?;
        self.save(&refreshed).await?;
        tracing::info!("Credentials refreshed and saved");
        Ok(Some(refreshed))
    }
}

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn get_valid_credential(&self) -> Option<Credential> {
        match self.try_get_valid_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!("Could not obtain a valid credential: {}", e);
                None
            }
        }
    }

    async fn begin_interactive_authorization(&self) -> Result<(), CredentialError> {
        let secret = self.read_client_secret().await?;
        let AuthorizationCode { code, redirect_uri } = self.code_reader.read_code(&secret).await?;

        let credential = self.exchange_code(&secret, &redirect_uri, &code).await?;
        let _guard = self.io_lock.lock().await;
        self.save(&credential).await?;
        tracing::info!("Authorization complete, credentials stored");
        Ok(())
    }
}
