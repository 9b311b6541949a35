//! Authentication command handlers for the Google OAuth flow.
//!
//! - `spendsheet auth` runs the consent flow
//! - `spendsheet auth --verify` refreshes the stored token without a browser

use crate::api::TokenProvider;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;

/// Handles `spendsheet auth`. This is the only command that asks the user to visit a consent URL.
/// The resulting tokens are saved to the token file with the spreadsheet scope.
///
/// # Errors
/// Returns an error if the OAuth flow fails or if the client secret file is missing.
pub async fn auth(config: &Config) -> Result<Out<()>> {
    let _ = TokenProvider::initialize(config.client_secret_path(), config.token_path())
        .await
        .pub_result(ErrorType::Auth)?;
    Ok(format!(
        "Authorization saved to {}",
        config.token_path().display()
    )
    .into())
}

/// Handles `spendsheet auth --verify`. This never opens a browser; when the stored token cannot be
/// used the error tells the user to run `spendsheet auth`.
pub async fn auth_verify(config: &Config) -> Result<Out<()>> {
    let mut token_provider = TokenProvider::load(config.client_secret_path(), config.token_path())
        .await
        .context(
            "Unable to use the existing tokens found in the token JSON file. \n\n\
            You should run 'spendsheet auth' (without the --verify flag).",
        )
        .pub_result(ErrorType::Auth)?;
    token_provider
        .refresh()
        .await
        .context("Unable to refresh the token")
        .pub_result(ErrorType::Auth)?;
    Ok(format!(
        "Your OAuth token is valid until {}",
        token_provider.expires_at().format("%Y-%m-%d %H:%M UTC")
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_verify_without_token_is_an_auth_error() {
        let env = TestEnv::new().await;
        let err = auth_verify(&env.config()).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Auth);
        assert!(err.to_string().contains("spendsheet auth"));
    }
}
