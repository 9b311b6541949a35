//! OAuth 2.0 for the Google Sheets API.
//!
//! `TokenProvider::initialize` runs the installed-app consent flow: it prints the consent URL,
//! receives Google's redirect on a one-shot local listener and exchanges the authorization code
//! (with PKCE) for tokens. Afterwards `TokenProvider::load` reads the saved tokens and refreshes
//! them without any browser interaction.

use crate::api::files::{File, SecretFile, TokenFile};
use crate::api::OAUTH_SCOPES;
use crate::error::Res;
use anyhow::{bail, Context};
use chrono::Utc;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

const OAUTH_CALLBACK_PORT: u16 = 3030;
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const SUCCESS_PAGE: &str = "<html><body><h2>Authorization complete.</h2>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const NOT_FOUND_PAGE: &str = "<html><body>Not found</body></html>";

type GoogleClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Provides access tokens for Google APIs, refreshing them when they are about to expire.
#[derive(Debug, Clone)]
pub(crate) struct TokenProvider {
    secret: SecretFile,
    token: File<TokenFile>,
    http: reqwest::Client,
}

impl TokenProvider {
    /// Loads previously saved tokens. Never opens a browser.
    pub(crate) async fn load(
        secret_path: impl AsRef<Path>,
        token_path: impl Into<PathBuf>,
    ) -> Res<Self> {
        let secret = SecretFile::load(secret_path.as_ref()).await?;
        let token: File<TokenFile> = File::load(token_path)
            .await
            .context("Unable to read the token JSON file")?;
        token.data().validate_scopes()?;
        Ok(Self {
            secret,
            token,
            http: http_client()?,
        })
    }

    /// Runs the consent flow and saves the resulting tokens to `token_path`.
    pub(crate) async fn initialize(
        secret_path: impl AsRef<Path>,
        token_path: impl Into<PathBuf>,
    ) -> Res<Self> {
        let secret = SecretFile::load(secret_path.as_ref()).await?;
        let http = http_client()?;
        let token_file = tokio::time::timeout(CONSENT_TIMEOUT, consent(&secret, &http))
            .await
            .context("Timed out waiting for the OAuth consent")??;
        let token = File::new(token_path, token_file);
        token.save().await?;
        info!("Authorization successful, tokens saved");
        Ok(Self {
            secret,
            token,
            http,
        })
    }

    /// Exchanges the refresh token for a new access token and saves it.
    pub(crate) async fn refresh(&mut self) -> Res<()> {
        let client = oauth_client(&self.secret)?;
        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .context("Failed to refresh the OAuth token")?;

        let expires_at = Utc::now() + lifetime(response.expires_in())?;
        self.token.data_mut().update(
            response.access_token().secret().clone(),
            expires_at,
            response.refresh_token().map(|t| t.secret().clone()),
        );
        self.token.save().await?;
        debug!("Token refreshed, valid until {expires_at}");
        Ok(())
    }

    /// The current access token, which may be expired.
    pub(crate) fn token(&self) -> &str {
        self.token.data().access_token()
    }

    /// Returns an access token, refreshing it first if it is expired or about to expire.
    pub(crate) async fn token_with_refresh(&mut self) -> Res<String> {
        if self.token.data().is_expired(Utc::now()) {
            self.refresh().await?;
        }
        Ok(self.token().to_string())
    }

    pub(crate) fn expires_at(&self) -> chrono::DateTime<Utc> {
        self.token.data().expires_at()
    }
}

/// The oauth2 documentation asks for redirects to be disabled to avoid SSRF.
fn http_client() -> Res<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to build the HTTP client")
}

fn oauth_client(secret: &SecretFile) -> Res<GoogleClient> {
    Ok(BasicClient::new(ClientId::new(secret.client_id().to_string()))
        .set_client_secret(ClientSecret::new(secret.client_secret().to_string()))
        .set_auth_uri(AuthUrl::new(secret.auth_uri().to_string()).context("Invalid auth_uri")?)
        .set_token_uri(
            TokenUrl::new(secret.token_uri().to_string()).context("Invalid token_uri")?,
        ))
}

fn lifetime(expires_in: Option<Duration>) -> Res<chrono::Duration> {
    match expires_in {
        Some(d) => chrono::Duration::from_std(d).context("Token lifetime out of range"),
        None => Ok(chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)),
    }
}

async fn consent(secret: &SecretFile, http: &reqwest::Client) -> Res<TokenFile> {
    let listener = TcpListener::bind(("127.0.0.1", OAUTH_CALLBACK_PORT))
        .await
        .with_context(|| format!("Unable to listen on port {OAUTH_CALLBACK_PORT}"))?;
    let redirect = format!("http://localhost:{OAUTH_CALLBACK_PORT}");
    let client =
        oauth_client(secret)?.set_redirect_uri(RedirectUrl::new(redirect).context("Bad redirect")?);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(OAUTH_SCOPES.iter().map(|s| Scope::new(s.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    info!("Open this URL in your browser to authorize access:\n\n{auth_url}\n");
    let query = wait_for_callback(listener).await?;
    let params = callback_params(&query);

    if let Some(error) = params.get("error") {
        bail!("Authorization was denied: {error}");
    }
    let state = params
        .get("state")
        .context("The OAuth callback is missing the state parameter")?;
    if state != csrf.secret() {
        bail!("The OAuth callback state does not match, refusing the authorization code");
    }
    let code = params
        .get("code")
        .context("The OAuth callback is missing the authorization code")?;

    let response = client
        .exchange_code(AuthorizationCode::new(code.clone()))
        .set_pkce_verifier(pkce_verifier)
        .request_async(http)
        .await
        .context("Failed to exchange the authorization code")?;

    let refresh_token = response
        .refresh_token()
        .context("Google did not return a refresh token")?
        .secret()
        .clone();
    let scopes = match response.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.to_string()).collect(),
        None => OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
    };
    Ok(TokenFile::new(
        scopes,
        response.access_token().secret().clone(),
        refresh_token,
        Utc::now() + lifetime(response.expires_in())?,
    ))
}

fn callback_params(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Serves connections until a request to `/` with a query string arrives and returns that query.
/// Browsers also ask for things like `/favicon.ico`; those get a 404 page.
async fn wait_for_callback(listener: TcpListener) -> Res<String> {
    let (tx, mut rx) = mpsc::channel::<String>(1);
    loop {
        tokio::select! {
            Some(query) = rx.recv() => return Ok(query),
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("Failed to accept the OAuth callback")?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let tx = tx.clone();
                        async move {
                            let page = match req.uri().query() {
                                Some(query) if req.uri().path() == "/" => {
                                    let _ = tx.send(query.to_string()).await;
                                    SUCCESS_PAGE
                                }
                                _ => NOT_FOUND_PAGE,
                            };
                            Ok::<_, Infallible>(Response::new(page.to_string()))
                        }
                    });
                    if let Err(e) = http1::Builder::new()
                        .keep_alive(false)
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("OAuth callback connection error: {e}");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params() {
        let params = callback_params("state=abc%3D&code=4%2F0Ab&scope=x+y");
        assert_eq!(params["state"], "abc=");
        assert_eq!(params["code"], "4/0Ab");
        assert_eq!(params["scope"], "x y");
    }

    #[test]
    fn test_lifetime_default() {
        assert_eq!(lifetime(None).unwrap(), chrono::Duration::seconds(3600));
        assert_eq!(
            lifetime(Some(Duration::from_secs(10))).unwrap(),
            chrono::Duration::seconds(10)
        );
    }

    #[tokio::test]
    async fn test_wait_for_callback_ignores_favicon() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(wait_for_callback(listener));

        for path in ["/favicon.ico", "/?state=s1&code=c1"] {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await.unwrap();
        }

        let query = waiter.await.unwrap().unwrap();
        assert_eq!(query, "state=s1&code=c1");
    }
}
