use clap::Parser;
use spendsheet::args::{Args, Command};
use spendsheet::{commands, Config, Mode, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    // Setting SPENDSHEET_TEST_MODE to a non-empty value swaps Google Sheets and the language model
    // for in-memory stand-ins.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.client_secret(),
            init_args.sheet_url(),
            init_args.locale(),
        )
        .await?
        .print(),

        Command::Auth(auth_args) => {
            let config = Config::load(home).await?;
            if auth_args.verify() {
                commands::auth_verify(&config).await?.print()
            } else {
                commands::auth(&config).await?.print()
            }
        }

        Command::Record(record_args) => {
            let config = Config::load(home).await?;
            commands::record(config, mode, record_args.clone())
                .await?
                .print()
        }

        Command::Sync(sync_args) => {
            let config = Config::load(home).await?;
            commands::sync(config, mode, sync_args.clone())
                .await?
                .print()
        }

        Command::Check => {
            let config = Config::load(home).await?;
            commands::check(config, mode).await?.print()
        }

        Command::Summary(summary_args) => {
            let config = Config::load(home).await?;
            commands::summary(config, summary_args.clone())
                .await?
                .print()
        }

        Command::Stats => commands::stats(Config::load(home).await?).await?.print(),

        Command::Mcp(mcp_args) => commands::mcp(
            Config::load(home).await?,
            mode,
            !mcp_args.skip_structure_check(),
        )
        .await?
        .print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
