//! These structs provide the CLI interface for the spendsheet CLI.

use crate::model::Locale;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// spendsheet: turns free-text expense messages into a spending spreadsheet.
///
/// Send it messages like "lunch 25.50" or "saved 300 in the reserve". A language model turns each
/// message into a transaction, the transaction is stored in a local SQLite database, and a Google
/// sheet with one tab per month and a summary tab is kept in line with the database.
///
/// You will need a Google OAuth client for the Sheets API and an API key for an OpenAI-compatible
/// chat completions endpoint.
///
/// There is also a mode in which an AI agent can use this program through the mcp subcommand.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration files.
    ///
    /// This is the first command you should run. Beforehand:
    ///
    /// - Decide what directory you want to store data in and pass this as --home. By default it
    ///   will be $HOME/spendsheet.
    ///
    /// - Get the URL of the Google Sheet that should mirror your transactions and pass it as
    ///   --sheet-url. The month and summary tabs are created for you.
    ///
    /// - Create a Desktop OAuth client in Google Cloud Console, download its JSON and pass it as
    ///   --client-secret.
    Init(InitArgs),
    /// Authenticate with Google Sheets via OAuth.
    Auth(AuthArgs),
    /// Interpret a message and record the transaction it describes.
    Record(RecordArgs),
    /// Bring the spreadsheet in line with the local database.
    Sync(SyncArgs),
    /// Report rows in the spreadsheet that do not match the database, without changing anything.
    Check,
    /// Show spending totals for a month or a year.
    Summary(SummaryArgs),
    /// Show overall statistics of the database.
    Stats,
    /// Run as an MCP server over stdin/stdout.
    Mcp(McpArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where spendsheet data and configuration is held. Defaults to ~/spendsheet
    #[arg(long, env = "SPENDSHEET_HOME", default_value_t = default_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `spendsheet init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The URL of the Google sheet. It looks like this:
    /// https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
    #[arg(long)]
    sheet_url: String,

    /// The path to your downloaded OAuth client credentials. This file will be moved to the
    /// secrets directory inside the data directory.
    #[arg(long)]
    client_secret: PathBuf,

    /// The language of sheet names and headers in the spreadsheet.
    #[arg(long, value_enum, default_value_t = Locale::En)]
    locale: Locale,
}

impl InitArgs {
    pub fn new(
        sheet_url: impl Into<String>,
        client_secret: impl Into<PathBuf>,
        locale: Locale,
    ) -> Self {
        Self {
            sheet_url: sheet_url.into(),
            client_secret: client_secret.into(),
            locale,
        }
    }

    pub fn sheet_url(&self) -> &str {
        &self.sheet_url
    }

    pub fn client_secret(&self) -> &Path {
        &self.client_secret
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }
}

/// (Not shown): Args for the `spendsheet auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    /// Verify and refresh authentication.
    #[arg(long)]
    verify: bool,
}

impl AuthArgs {
    pub fn new(verify: bool) -> Self {
        Self { verify }
    }

    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// (Not shown): Args for the `spendsheet record` command.
#[derive(Debug, Parser, Clone)]
pub struct RecordArgs {
    /// The message, e.g. "lunch 25.50 yesterday"
    text: String,

    /// Who sent the message, when it came from a chat.
    #[arg(long)]
    sender: Option<String>,

    /// The chat the message came from.
    #[arg(long)]
    conversation: Option<String>,

    /// The id of the message within its chat.
    #[arg(long)]
    message: Option<String>,
}

impl RecordArgs {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: None,
            conversation: None,
            message: None,
        }
    }

    /// Sets where the message came from.
    pub fn with_source(
        mut self,
        sender: Option<String>,
        conversation: Option<String>,
        message: Option<String>,
    ) -> Self {
        self.sender = sender;
        self.conversation = conversation;
        self.message = message;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn conversation(&self) -> Option<&str> {
        self.conversation.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// (Not shown): Args for the `spendsheet sync` command.
#[derive(Debug, Parser, Clone)]
pub struct SyncArgs {
    /// Remove rows without an id and rows whose id is not in the database instead of syncing.
    #[arg(long, conflicts_with = "force")]
    clean: bool,

    /// Write every month whose sheet is empty without checking first.
    #[arg(long)]
    force: bool,
}

impl SyncArgs {
    pub fn new(clean: bool, force: bool) -> Self {
        Self { clean, force }
    }

    pub fn clean(&self) -> bool {
        self.clean
    }

    pub fn force(&self) -> bool {
        self.force
    }
}

/// (Not shown): Args for the `spendsheet summary` command.
#[derive(Debug, Parser, Clone)]
pub struct SummaryArgs {
    /// The month by name (in the configured language or English) or number. Defaults to the
    /// current month.
    month: Option<String>,

    /// The year. Defaults to the current year.
    #[arg(long)]
    year: Option<i32>,

    /// Summarize the whole year instead of one month.
    #[arg(long, conflicts_with = "month")]
    yearly: bool,
}

impl SummaryArgs {
    pub fn new(month: Option<String>, year: Option<i32>, yearly: bool) -> Self {
        Self {
            month,
            year,
            yearly,
        }
    }

    pub fn month(&self) -> Option<&str> {
        self.month.as_deref()
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn yearly(&self) -> bool {
        self.yearly
    }
}

/// (Not shown): Args for the `spendsheet mcp` command.
#[derive(Debug, Parser, Clone)]
pub struct McpArgs {
    /// Skip the spreadsheet structure check that normally runs before serving.
    #[arg(long)]
    skip_structure_check: bool,
}

impl McpArgs {
    pub fn new(skip_structure_check: bool) -> Self {
        Self {
            skip_structure_check,
        }
    }

    pub fn skip_structure_check(&self) -> bool {
        self.skip_structure_check
    }
}

fn default_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("spendsheet"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or SPENDSHEET_HOME instead of relying on the default \
                home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("spendsheet")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let args = Args::try_parse_from([
            "spendsheet",
            "--home",
            "/tmp/x",
            "record",
            "lunch 20",
            "--sender",
            "42",
        ])
        .unwrap();
        assert_eq!(args.common().home().path(), Path::new("/tmp/x"));
        match args.command() {
            Command::Record(record) => {
                assert_eq!(record.text(), "lunch 20");
                assert_eq!(record.sender(), Some("42"));
                assert_eq!(record.message(), None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_sync_flags_conflict() {
        assert!(Args::try_parse_from(["spendsheet", "sync", "--clean", "--force"]).is_err());
        let args = Args::try_parse_from(["spendsheet", "sync", "--clean"]).unwrap();
        assert!(matches!(args.command(), Command::Sync(s) if s.clean() && !s.force()));
    }

    #[test]
    fn test_init_locale() {
        let args = Args::try_parse_from([
            "spendsheet",
            "init",
            "--sheet-url",
            "https://docs.google.com/spreadsheets/d/abc",
            "--client-secret",
            "secret.json",
            "--locale",
            "pt_br",
        ])
        .unwrap();
        assert!(matches!(args.command(), Command::Init(i) if i.locale() == Locale::PtBr));
    }

    #[test]
    fn test_summary_yearly_conflicts_with_month() {
        assert!(Args::try_parse_from(["spendsheet", "summary", "march", "--yearly"]).is_err());
        let args = Args::try_parse_from(["spendsheet", "summary", "--yearly", "--year", "2024"])
            .unwrap();
        assert!(matches!(args.command(), Command::Summary(s) if s.yearly() && s.year() == Some(2024)));
    }
}
