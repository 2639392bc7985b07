//! Gmail OAuth 2.0 authentication.
//!
//! Produces the [`GmailCapability`] a batch sends through. A cached token is
//! reused while valid and refreshed when expired; otherwise the installed-app
//! loopback flow runs once and its token is cached for later runs.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::send::GmailCapability;

pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Client that can only hit the token endpoint (code exchange, refresh).
type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Client that can also build the consent URL.
type ConsentClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "{} not found. Please download it from Google Cloud Console.\nVisit: https://console.cloud.google.com/apis/credentials",
        .0.display()
    )]
    MissingCredentials(PathBuf),

    #[error("Authentication failed: {0}")]
    Failed(String),
}

impl AuthError {
    fn failed(context: &str, err: impl std::fmt::Display) -> Self {
        AuthError::Failed(format!("{}: {}", context, err))
    }
}

/// OAuth client from a Google Cloud "Desktop app" credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// Token cache persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub client_id: String,
    pub client_secret: String,
}

impl StoredToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => true,
        }
    }

    /// Cache entry for a token endpoint response. Refresh responses usually
    /// omit the refresh token, so the previous one is kept.
    fn from_response(
        response: &BasicTokenResponse,
        previous_refresh: Option<String>,
        client_id: String,
        client_secret: String,
    ) -> Self {
        StoredToken {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or(previous_refresh),
            expires_at: response
                .expires_in()
                .and_then(|d| ChronoDuration::from_std(d).ok())
                .map(|d| Utc::now() + d),
            client_id,
            client_secret,
        }
    }
}

/// Authenticate and return a send capability.
pub async fn authenticate(config: &Config, client: &Client) -> Result<GmailCapability, AuthError> {
    let token = obtain_token(config).await?;
    info!("auth_complete");
    Ok(GmailCapability::new(
        client.clone(),
        config.gmail_api_url.clone(),
        token.access_token,
    ))
}

async fn obtain_token(config: &Config) -> Result<StoredToken, AuthError> {
    let cached = read_cached_token(&config.token_file);

    if let Some(token) = &cached {
        if token.is_valid(Utc::now()) {
            info!(token_file = %config.token_file.display(), "auth_cached_token_valid");
            return Ok(token.clone());
        }
    }

    let http = token_http_client(config)?;
    let token = match cached {
        Some(token) if token.refresh_token.is_some() => {
            info!("auth_refreshing_token");
            refresh(&http, &config.oauth_token_url, token).await?
        }
        _ => {
            let secrets = read_client_secrets(&config.credentials_file)?;
            run_loopback_flow(&http, &config.oauth_token_url, &secrets).await?
        }
    };

    write_cached_token(&config.token_file, &token)?;
    Ok(token)
}

/// Token requests must not follow redirects.
fn token_http_client(config: &Config) -> Result<Client, AuthError> {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| AuthError::failed("Could not build HTTP client", e))
}

fn read_cached_token(path: &Path) -> Option<StoredToken> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(token_file = %path.display(), error = %e, "auth_cached_token_unreadable");
            None
        }
    }
}

fn write_cached_token(path: &Path, token: &StoredToken) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| AuthError::failed("Could not encode token", e))?;
    fs::write(path, json).map_err(|e| AuthError::failed("Could not cache token", e))?;
    info!(token_file = %path.display(), "auth_token_cached");
    Ok(())
}

/// Read client secrets from a Google credentials file.
pub fn read_client_secrets(path: &Path) -> Result<ClientSecrets, AuthError> {
    if !path.exists() {
        return Err(AuthError::MissingCredentials(path.to_path_buf()));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AuthError::failed("Could not read credentials file", e))?;
    let file: CredentialsFile = serde_json::from_str(&raw)
        .map_err(|e| AuthError::failed("Malformed credentials file", e))?;

    file.installed
        .or(file.web)
        .ok_or_else(|| AuthError::Failed("Credentials file has no client configuration".into()))
}

fn token_client(client_id: &str, client_secret: &str, token_url: &str) -> Result<TokenClient, AuthError> {
    let token_url = TokenUrl::new(token_url.to_string())
        .map_err(|e| AuthError::failed("Invalid token URL", e))?;

    Ok(BasicClient::new(ClientId::new(client_id.to_string()))
        .set_client_secret(ClientSecret::new(client_secret.to_string()))
        .set_auth_type(AuthType::RequestBody)
        .set_token_uri(token_url))
}

fn consent_client(
    secrets: &ClientSecrets,
    token_url: &str,
    redirect_uri: &str,
) -> Result<ConsentClient, AuthError> {
    let auth_url = AuthUrl::new(secrets.auth_uri.clone())
        .map_err(|e| AuthError::failed("Invalid auth_uri", e))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| AuthError::failed("Invalid redirect URI", e))?;

    Ok(token_client(&secrets.client_id, &secrets.client_secret, token_url)?
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url))
}

/// Consent URL with a fresh CSRF state and PKCE S256 challenge.
fn consent_url(client: &ConsentClient) -> (Url, CsrfToken, PkceCodeVerifier) {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

    let (url, state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(GMAIL_SEND_SCOPE.to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge)
        .url();

    (url, state, verifier)
}

fn token_error<RE>(context: &str, err: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + Send + Sync + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let mut message = format!("{}: {}", context, response.error());
            if let Some(description) = response.error_description() {
                message.push_str(&format!(" ({})", description));
            }
            AuthError::Failed(message)
        }
        other => AuthError::Failed(format!("{}: {:#}", context, anyhow::Error::new(other))),
    }
}

async fn refresh(http: &Client, token_url: &str, token: StoredToken) -> Result<StoredToken, AuthError> {
    let Some(refresh_token) = token.refresh_token.clone() else {
        return Err(AuthError::Failed("Cached token has no refresh token".into()));
    };

    let client = token_client(&token.client_id, &token.client_secret, token_url)?;
    let grant = RefreshToken::new(refresh_token.clone());
    let response = client
        .exchange_refresh_token(&grant)
        .request_async(http)
        .await
        .map_err(|e| token_error("Token refresh failed", e))?;

    Ok(StoredToken::from_response(
        &response,
        Some(refresh_token),
        token.client_id,
        token.client_secret,
    ))
}

/// Extract the authorization code from the redirect's HTTP request line.
fn parse_redirect(request_line: &str, expected_state: &CsrfToken) -> Result<String, AuthError> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AuthError::Failed("Malformed redirect request".into()))?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target))
        .map_err(|e| AuthError::failed("Malformed redirect URL", e))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::Failed(format!("Consent denied: {}", value))),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state.secret().as_str()) {
        return Err(AuthError::Failed("OAuth state mismatch".into()));
    }

    code.ok_or_else(|| AuthError::Failed("Redirect carried no authorization code".into()))
}

/// Accept one browser redirect on the listener and answer it.
async fn accept_redirect(listener: TcpListener, state: &CsrfToken) -> Result<String, AuthError> {
    let (stream, _) = listener
        .accept()
        .await
        .map_err(|e| AuthError::failed("Loopback redirect failed", e))?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| AuthError::failed("Loopback redirect failed", e))?;

    let code = parse_redirect(&request_line, state);

    let reply = match &code {
        Ok(_) => "Authorization complete. You can close this window.\n",
        Err(_) => "Authorization failed. Return to the terminal for details.\n",
    };
    let mut stream = reader.into_inner();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.len(),
        reply
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "auth_redirect_reply_failed");
    }

    code
}

async fn run_loopback_flow(
    http: &Client,
    token_url: &str,
    secrets: &ClientSecrets,
) -> Result<StoredToken, AuthError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| AuthError::failed("Could not open loopback listener", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| AuthError::failed("Could not open loopback listener", e))?
        .port();

    let client = consent_client(secrets, token_url, &format!("http://127.0.0.1:{}/", port))?;
    let (url, state, verifier) = consent_url(&client);

    info!(port = port, "auth_consent_waiting");
    eprintln!("Open this URL in your browser to authorize bulkmailer:\n\n{}\n", url);

    let code = accept_redirect(listener, &state).await?;
    let response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(http)
        .await
        .map_err(|e| token_error("Code exchange failed", e))?;

    Ok(StoredToken::from_response(
        &response,
        None,
        secrets.client_id.clone(),
        secrets.client_secret.clone(),
    ))
}
