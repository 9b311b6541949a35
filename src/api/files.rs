//! On-disk formats of the Google OAuth credential files.
//! - `client_secret.json`: OAuth 2.0 client credentials downloaded from Google Cloud Console
//! - `token.json`: the access and refresh tokens we obtained

use crate::api::OAUTH_SCOPES;
use crate::error::Res;
use crate::utils;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Loopback redirects accepted for the installed-app flow. The port is chosen at runtime.
const REDIRECTS: &[&str] = &["http://localhost", "http://127.0.0.1"];

/// Tokens are refreshed when they are this close to expiring.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A JSON file held in memory together with the path it is saved to.
#[derive(Debug, Clone)]
pub(super) struct File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    path: PathBuf,
    data: F,
}

impl<F> File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    pub(super) async fn load(path: impl Into<PathBuf>) -> Res<Self> {
        let path = path.into();
        let data: F = utils::deserialize(&path).await?;
        Ok(Self { path, data })
    }

    pub(super) fn new(path: impl Into<PathBuf>, data: F) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Saves the data with owner-only permissions.
    pub(super) async fn save(&self) -> Res<()> {
        let json =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize data to JSON")?;
        utils::write(&self.path, json).await?;
        utils::restrict_permissions(&self.path)
    }

    pub(super) fn data(&self) -> &F {
        &self.data
    }

    pub(super) fn data_mut(&mut self) -> &mut F {
        &mut self.data
    }
}

/// The `client_secret.json` file of a Desktop OAuth client. Google wraps the credentials in an
/// `installed` object:
///
/// ```json
/// {
///   "installed": {
///     "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
///     "client_secret": "YOUR_CLIENT_SECRET",
///     "redirect_uris": ["http://localhost"],
///     "auth_uri": "https://accounts.google.com/o/oauth2/auth",
///     "token_uri": "https://oauth2.googleapis.com/token"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct SecretFile {
    installed: InstalledCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    #[serde(deserialize_with = "loopback_redirects")]
    redirect_uris: Vec<String>,
    auth_uri: String,
    token_uri: String,
}

impl SecretFile {
    pub(super) async fn load(path: &Path) -> Res<SecretFile> {
        utils::deserialize(path)
            .await
            .context("Unable to read the OAuth client secret file")
    }

    pub(super) fn client_id(&self) -> &str {
        &self.installed.client_id
    }

    pub(super) fn client_secret(&self) -> &str {
        &self.installed.client_secret
    }

    pub(super) fn auth_uri(&self) -> &str {
        &self.installed.auth_uri
    }

    pub(super) fn token_uri(&self) -> &str {
        &self.installed.token_uri
    }
}

fn loopback_redirects<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let uris = Vec::<String>::deserialize(deserializer)?;
    if !uris.iter().any(|s| REDIRECTS.contains(&s.as_str())) {
        return Err(D::Error::custom(format!(
            "At least one of the redirects needs to be {}, but this was not found. When creating \
            the OAuth client, choose the Desktop application type",
            REDIRECTS[0]
        )));
    }
    Ok(uris)
}

/// What we persist after a successful OAuth exchange.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(super) struct TokenFile {
    scopes: Vec<String>,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenFile {
    pub(super) fn new(
        scopes: Vec<String>,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scopes,
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Fails when a scope this program needs was not granted.
    pub(super) fn validate_scopes(&self) -> Res<()> {
        let found: HashSet<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
        for &required in OAUTH_SCOPES {
            if !found.contains(required) {
                bail!("OAuth scope '{required}' is missing.");
            }
        }
        Ok(())
    }

    pub(super) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(super) fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub(super) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS)
    }

    pub(super) fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Stores a refreshed access token. Google only sometimes rotates the refresh token.
    pub(super) fn update(
        &mut self,
        access_token: String,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
    ) {
        self.access_token = access_token;
        self.expires_at = expires_at;
        if let Some(rt) = refresh_token {
            self.refresh_token = rt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_temp(json: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");
        utils::write(&path, json).await.unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_client_secret_good_redirect() {
        let (_dir, path) = write_temp(
            r#"{
                "installed": {
                    "client_id": "id.apps.googleusercontent.com",
                    "client_secret": "shh",
                    "redirect_uris": ["http://localhost", "https://example.com/x"],
                    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                    "token_uri": "https://oauth2.googleapis.com/token"
                }
            }"#,
        )
        .await;
        let secret = SecretFile::load(&path).await.unwrap();
        assert_eq!(secret.client_id(), "id.apps.googleusercontent.com");
        assert_eq!(secret.token_uri(), "https://oauth2.googleapis.com/token");
    }

    #[tokio::test]
    async fn test_client_secret_bad_redirect() {
        let (_dir, path) = write_temp(
            r#"{
                "installed": {
                    "client_id": "id",
                    "client_secret": "shh",
                    "redirect_uris": ["https://example.com:4040/whatever"],
                    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                    "token_uri": "https://oauth2.googleapis.com/token"
                }
            }"#,
        )
        .await;
        let err = SecretFile::load(&path).await.unwrap_err();
        assert!(format!("{err:?}").contains("At least one of the redirects needs to be"));
    }

    #[test]
    fn test_token_scopes() {
        let now = Utc::now();
        let missing = TokenFile::new(vec![], "a".into(), "r".into(), now);
        assert!(missing.validate_scopes().is_err());

        let good = TokenFile::new(
            OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
            "a".into(),
            "r".into(),
            now,
        );
        assert!(good.validate_scopes().is_ok());
    }

    #[test]
    fn test_token_expiry_and_update() {
        let now = Utc::now();
        let mut token = TokenFile::new(vec![], "old".into(), "r1".into(), now);
        assert!(token.is_expired(now));

        token.update("new".into(), now + chrono::Duration::hours(1), None);
        assert!(!token.is_expired(now));
        assert_eq!(token.access_token(), "new");
        assert_eq!(token.refresh_token(), "r1");

        token.update("newer".into(), now, Some("r2".into()));
        assert_eq!(token.refresh_token(), "r2");
    }

    #[tokio::test]
    async fn test_file_save_restricts_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        let file = File::new(&path, TokenFile::default());
        file.save().await.unwrap();
        let loaded: File<TokenFile> = File::load(&path).await.unwrap();
        assert_eq!(loaded.data().access_token(), "");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
