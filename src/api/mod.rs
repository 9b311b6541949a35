//! Access to the spreadsheet that mirrors the transaction store.
//!
//! Everything above this module talks to a `Sheet`: a small, row-oriented view of a spreadsheet.
//! `Mode::Google` gives a `GoogleSheet` that calls the Google Sheets API, `Mode::Testing` gives an
//! in-memory `TestSheet`.

mod files;
mod google_sheet;
mod oauth;
mod test_sheet;

use crate::error::Res;
use crate::Config;
use google_sheet::GoogleSheet;

pub(crate) use oauth::TokenProvider;
pub(crate) use test_sheet::TestSheet;
#[cfg(test)]
pub(crate) use test_sheet::TestSheetState;

/// OAuth scopes required for reading and writing spreadsheet values and tabs.
const OAUTH_SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

/// Environment variable that switches the program to in-memory collaborators.
pub const TEST_MODE_ENV: &str = "SPENDSHEET_TEST_MODE";

/// Selects real external services or in-memory/offline stand-ins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Google,
    Testing,
}

impl Mode {
    /// `Testing` when `SPENDSHEET_TEST_MODE` is set to anything non-empty.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(v) if !v.trim().is_empty() => Mode::Testing,
            _ => Mode::Google,
        }
    }
}

/// A row-oriented view of one spreadsheet. Row numbers are 1-based and row 1 is the header row.
/// Every call may be a network round trip subject to rate limiting.
#[async_trait::async_trait]
pub(crate) trait Sheet: Send {
    /// Titles of all tabs, in spreadsheet order.
    async fn sheet_names(&mut self) -> Res<Vec<String>>;

    /// Adds an empty tab.
    async fn add_sheet(&mut self, sheet_name: &str) -> Res<()>;

    /// All non-empty rows of a tab, header included. Trailing empty cells may be missing.
    async fn get(&mut self, sheet_name: &str) -> Res<Vec<Vec<String>>>;

    /// Writes `rows` after the last row that has data.
    async fn append_rows(&mut self, sheet_name: &str, rows: &[Vec<String>]) -> Res<()>;

    /// Overwrites cells starting at column A of `start_row`.
    async fn update_range(
        &mut self,
        sheet_name: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Res<()>;

    /// Removes a row, shifting the rows below it up by one.
    async fn delete_row(&mut self, sheet_name: &str, row: usize) -> Res<()>;
}

/// Creates the `Sheet` for the configured spreadsheet.
pub(crate) async fn sheet(config: &Config, mode: Mode) -> Res<Box<dyn Sheet>> {
    match mode {
        Mode::Google => {
            let token_provider =
                TokenProvider::load(config.client_secret_path(), config.token_path()).await?;
            Ok(Box::new(
                GoogleSheet::new(config.spreadsheet_id(), token_provider).await?,
            ))
        }
        Mode::Testing => Ok(Box::new(TestSheet::new(config.spreadsheet_id()))),
    }
}
