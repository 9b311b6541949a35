use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::model::Locale;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its subdirectories and:
/// - Creates an initial `config.json` file using `sheet_url` and `locale` along with default
///   settings
/// - Moves `secret_file` into its default location in the data dir.
/// - Creates the SQLite transaction store
///
/// # Arguments
/// - `home` - The directory that will be the root of data directory, e.g. `$HOME/spendsheet`
/// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON needed to start the Google
///   OAuth workflow.
/// - `sheet_url` - The URL of the Google Sheet that mirrors the transactions.
///   e.g. https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
/// - `locale` - The language of sheet names and headers.
///
/// # Errors
/// - Returns an error if any file operations fail.
pub async fn init(
    home: &Path,
    secret_file: &Path,
    url: &str,
    locale: Locale,
) -> Result<Out<()>> {
    let config = Config::create(home, secret_file, url, locale)
        .await
        .context("Unable to create the data directory and configs")
        .pub_result(ErrorType::Config)?;
    Ok(format!(
        "Successfully created the spendsheet directory at {}. Run 'spendsheet auth' next.",
        config.root().display()
    )
    .into())
}
