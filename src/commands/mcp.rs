//! MCP server command handler.
//!
//! This module implements the `spendsheet mcp` command which runs an MCP server for AI agent
//! integration.

use crate::commands::Out;
use crate::mcp::Io;
use crate::reconcile::Reconciler;
use crate::{mcp, Config, Mode, Result};
use tracing::{info, warn};

/// Runs the MCP server.
///
/// This launches a long-running process that communicates via JSON-RPC over stdin/stdout.
/// MCP clients launch this as a subprocess. When `check_structure` is set the spreadsheet is
/// brought in line with the store before serving; a failure there is logged and the server starts
/// anyway.
pub async fn mcp(config: Config, mode: Mode, check_structure: bool) -> Result<Out<()>> {
    if check_structure {
        ensure_structure(&config, mode).await;
    }
    mcp::run_server(config, mode, Io::Stdio).await?;
    Ok("Done running MCP server".into())
}

async fn ensure_structure(config: &Config, mode: Mode) {
    let result = match Reconciler::open(config, mode).await {
        Ok(mut reconciler) => reconciler.ensure_structure(false).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(report) => info!(
            "Spreadsheet structure checked: {} sheets created, sync {}",
            report.sheets_created.len(),
            if report.sync_performed {
                "performed"
            } else {
                "not needed"
            }
        ),
        Err(e) => warn!("Unable to check the spreadsheet structure: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_structure_check_fills_the_mirror() {
        let env = TestEnv::new().await;
        env.insert_transaction("2025-06-01", "9.90", Category::Leisure).await;

        ensure_structure(&env.config(), Mode::Testing).await;
        let state = env.get_state();
        assert_eq!(state.sheet_names().len(), 13);
        assert_eq!(state.rows("June").unwrap().len(), 2);

        let writes = state.writes;
        ensure_structure(&env.config(), Mode::Testing).await;
        assert_eq!(env.get_state().writes, writes);
    }
}
