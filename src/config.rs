//! Configuration file handling.
//!
//! The configuration file is stored at `$SPENDSHEET_HOME/config.json` and contains the Google
//! Sheet URL, the mirror locale, the LLM endpoint, cache and pacing settings, and the paths of the
//! authentication files.

use crate::db::Db;
use crate::error::{ErrorType, IntoResult, Res};
use crate::Result;
use crate::model::Locale;
use crate::utils;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "spendsheet";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";
const SPENDSHEET_SQLITE: &str = "spendsheet.sqlite";
const CACHE_DAYS: u32 = 7;

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$SPENDSHEET_HOME` and from there it loads `$SPENDSHEET_HOME/config.json`. It
/// provides paths to other items that are either configurable or are expected in a certain
/// location within the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    spreadsheet_id: String,
    sqlite_path: PathBuf,
}

impl Config {
    /// Creates the data directory, its subdirectories and:
    /// - Creates an initial `config.json` file using `sheet_url` along with default settings
    /// - Moves `secret_file` into its default location in the data dir
    /// - Creates the SQLite transaction store
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of data directory, e.g. `$HOME/spendsheet`
    /// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON. This will be moved from
    ///   the `secret_file` path to its default location and name in the data directory.
    /// - `sheet_url` - The URL of the Google Sheet that mirrors the transactions.
    /// - `locale` - The language of sheet names and headers in the mirror.
    pub(crate) async fn create(
        dir: impl Into<PathBuf>,
        secret_file: &Path,
        sheet_url: &str,
        locale: Locale,
    ) -> Res<Self> {
        // Extract first so that a bad URL leaves nothing behind
        let spreadsheet_id = extract_spreadsheet_id(sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the spendsheet home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let secrets_dir = root.join(SECRETS);
        utils::make_dir(&secrets_dir).await?;

        let secret_destination = secrets_dir.join(CLIENT_SECRET_JSON);
        utils::rename(secret_file, &secret_destination).await?;
        utils::restrict_permissions(&secret_destination)?;

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            sheet_url: sheet_url.to_string(),
            locale,
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        let db_path = root.join(SPENDSHEET_SQLITE);
        let db = Db::init(&db_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root,
            secrets: secrets_dir,
            config_path,
            config_file,
            db,
            spreadsheet_id,
            sqlite_path: db_path,
        })
    }

    /// This will
    /// - validate that the home directory and the config file exist
    /// - load the config file
    /// - validate that the secrets directory exists
    /// - open (and migrate if needed) the SQLite store
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        Self::load_inner(home.into())
            .await
            .pub_result(ErrorType::Config)
    }

    async fn load_inner(home: PathBuf) -> Res<Self> {
        let maybe_relative = home;
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The spendsheet home directory is missing, run 'spendsheet init' first")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let spreadsheet_id = extract_spreadsheet_id(&config_file.sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        let secrets = root.join(SECRETS);
        if !secrets.is_dir() {
            bail!("The secrets directory is missing '{}'", secrets.display())
        }

        let db_path = root.join(SPENDSHEET_SQLITE);
        let db = Db::load(&db_path)
            .await
            .context("Unable to load SQLite DB")?;

        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            db,
            spreadsheet_id,
            sqlite_path: db_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn sheet_url(&self) -> &str {
        &self.config_file.sheet_url
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub fn locale(&self) -> Locale {
        self.config_file.locale
    }

    pub(crate) fn llm(&self) -> &LlmConfig {
        &self.config_file.llm
    }

    /// How long interpretations stay in the cache.
    pub(crate) fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.config_file.cache_days))
    }

    pub(crate) fn pacing(&self) -> Pacing {
        self.config_file.pacing
    }

    #[cfg(test)]
    pub(crate) fn set_pacing(&mut self, pacing: Pacing) {
        self.config_file.pacing = pacing;
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the relative
    /// path against the home directory.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.token_path())
    }

    fn resolve_secrets_file_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Settings of the OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub(crate) struct LlmConfig {
    /// Base URL without the `/v1/...` path, e.g. `https://api.openai.com`
    pub(crate) base_url: String,
    pub(crate) model: String,
    /// Name of the environment variable that holds the API key
    pub(crate) api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Pauses between spreadsheet calls during bulk operations. The Sheets API rejects requests when
/// they arrive too fast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub(crate) struct Pacing {
    /// Between months of a bulk sync
    pub(crate) month_ms: u64,
    /// Between sheets of a clean
    pub(crate) sheet_ms: u64,
    /// Between row deletions of a clean
    pub(crate) row_ms: u64,
}

impl Pacing {
    #[cfg(test)]
    pub(crate) const NONE: Pacing = Pacing {
        month_ms: 0,
        sheet_ms: 0,
        row_ms: 0,
    };

    pub(crate) fn month(&self) -> Duration {
        Duration::from_millis(self.month_ms)
    }

    pub(crate) fn sheet(&self) -> Duration {
        Duration::from_millis(self.sheet_ms)
    }

    pub(crate) fn row(&self) -> Duration {
        Duration::from_millis(self.row_ms)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            month_ms: 500,
            sheet_ms: 300,
            row_ms: 100,
        }
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "spendsheet",
///   "config_version": 1,
///   "sheet_url": "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
///   "locale": "pt_br",
///   "llm": {
///     "base_url": "https://api.openai.com",
///     "model": "gpt-3.5-turbo",
///     "api_key_env": "OPENAI_API_KEY"
///   },
///   "cache_days": 7,
///   "pacing": { "month_ms": 500, "sheet_ms": 300, "row_ms": 100 },
///   "client_secret_path": ".secrets/client_secret.json",
///   "token_path": ".secrets/token.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "spendsheet"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// URL of the Google Sheet that mirrors the store
    sheet_url: String,

    #[serde(default)]
    locale: Locale,

    #[serde(default)]
    llm: LlmConfig,

    #[serde(default = "default_cache_days")]
    cache_days: u32,

    #[serde(default)]
    pacing: Pacing,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to the home directory or
    /// absolute). Defaults to $SPENDSHEET_HOME/.secrets/client_secret.json
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file. Defaults to $SPENDSHEET_HOME/.secrets/token.json
    #[serde(skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

fn default_cache_days() -> u32 {
    CACHE_DAYS
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            sheet_url: String::new(),
            locale: Locale::default(),
            llm: LlmConfig::default(),
            cache_days: CACHE_DAYS,
            pacing: Pacing::default(),
            client_secret_path: None,
            token_path: None,
        }
    }
}

impl ConfigFile {
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .with_context(|| format!("Failed to load config file at {}", path.display()))?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        anyhow::ensure!(
            config.config_version <= CONFIG_VERSION,
            "Config file version {} is newer than this program supports ({})",
            config.config_version,
            CONFIG_VERSION
        );
        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(path, data)
            .await
            .context("Unable to write config file")
    }

    fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }
}

/// Extracts the spreadsheet ID from a Google Sheets URL of the form
/// `https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/...`
fn extract_spreadsheet_id(url: &str) -> Res<&str> {
    let mut parts = url.split('/');
    while let Some(part) = parts.next() {
        if part == "d" {
            let id = parts
                .next()
                .unwrap_or_default()
                .split(['?', '#'])
                .next()
                .unwrap_or_default();
            if id.is_empty() {
                break;
            }
            return Ok(id);
        }
    }
    bail!(
        "Invalid Google Sheets URL format. Expected: \
        https://docs.google.com/spreadsheets/d/SPREADSHEET_ID"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str =
        "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL/edit";

    #[tokio::test]
    async fn test_config_create_and_load() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("spendsheet_home");
        let secret_source_file = dir.path().join("x.txt");
        utils::write(&secret_source_file, "12345").await.unwrap();

        let config = Config::create(&home_dir, &secret_source_file, URL, Locale::PtBr)
            .await
            .unwrap();
        assert_eq!(URL, config.sheet_url());
        assert_eq!(
            "7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
            config.spreadsheet_id()
        );
        assert_eq!(
            "12345",
            utils::read(&config.client_secret_path()).await.unwrap()
        );
        assert!(!secret_source_file.exists());
        assert!(config.secrets().is_dir());
        assert!(config.sqlite_path().is_file());

        let loaded = Config::load(&home_dir).await.unwrap();
        assert_eq!(loaded.locale(), Locale::PtBr);
        assert_eq!(loaded.pacing(), Pacing::default());
        assert_eq!(loaded.cache_ttl(), chrono::Duration::days(7));
        assert_eq!(loaded.token_path(), loaded.secrets().join(TOKEN_JSON));
    }

    #[tokio::test]
    async fn test_config_create_bad_url() {
        let dir = TempDir::new().unwrap();
        let secret = dir.path().join("secret.json");
        utils::write(&secret, "{}").await.unwrap();
        let result = Config::create(
            dir.path().join("home"),
            &secret,
            "https://example.com/x",
            Locale::En,
        )
        .await;
        assert!(result.is_err());
        assert!(!dir.path().join("home").exists());
    }

    #[tokio::test]
    async fn test_load_missing_home() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let json = r#"{
            "app_name": "spendsheet",
            "config_version": 1,
            "sheet_url": "https://docs.google.com/spreadsheets/d/minimal",
            "pacing": { "row_ms": 5 }
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(config.locale, Locale::En);
        assert_eq!(config.cache_days, 7);
        assert_eq!(config.llm, LlmConfig::default());
        assert_eq!(config.pacing.row_ms, 5);
        assert_eq!(config.pacing.month_ms, 500);
        assert_eq!(
            config.client_secret_path(),
            PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON)
        );
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let json = r#"{
            "app_name": "wrong_app",
            "config_version": 1,
            "sheet_url": "https://docs.google.com/spreadsheets/d/test"
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let result = ConfigFile::load(&config_path).await;
        assert!(format!("{:#}", result.unwrap_err()).contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_config_file_save_and_load() {
        let t = TempDir::new().unwrap();
        let path = t.path().join("file.json");
        let original = ConfigFile {
            sheet_url: "https://docs.google.com/spreadsheets/d/test".to_string(),
            locale: Locale::PtBr,
            cache_days: 3,
            token_path: Some(PathBuf::from("/abs/token.json")),
            ..ConfigFile::default()
        };
        original.save(&path).await.unwrap();
        assert_eq!(original, ConfigFile::load(&path).await.unwrap());

        let json = serde_json::to_string(&ConfigFile::default()).unwrap();
        assert!(!json.contains("client_secret_path"));
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        assert_eq!(
            extract_spreadsheet_id(URL).unwrap(),
            "7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL"
        );
        assert_eq!(
            extract_spreadsheet_id("https://docs.google.com/spreadsheets/d/ABC123?foo=bar")
                .unwrap(),
            "ABC123"
        );
        assert_eq!(
            extract_spreadsheet_id("https://docs.google.com/spreadsheets/d/ABC#gid=0").unwrap(),
            "ABC"
        );
        assert!(extract_spreadsheet_id("https://example.com/invalid").is_err());
        assert!(extract_spreadsheet_id("").is_err());
        assert!(extract_spreadsheet_id("https://docs.google.com/spreadsheets/d/").is_err());
    }
}
