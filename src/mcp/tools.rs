//! The tools the MCP server exposes. Each one delegates to the command of the same name.

use crate::args::{RecordArgs, SummaryArgs, SyncArgs};
use crate::commands;
use crate::error::Error;
use crate::mcp::mcp_utils::tool_result;
use crate::mcp::SpendsheetServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ErrorData as McpError;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

/// Parameters for the record tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(title = "RecordParams")]
pub struct RecordParams {
    /// The message as the user wrote it, e.g. "lunch 25.50" or "guardei 300 na caixinha".
    pub text: String,

    /// The id of the person who sent the message, if it came from a chat.
    #[serde(default)]
    pub sender_id: Option<String>,

    /// The id of the chat the message came from.
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// The id of the message within its chat.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Parameters for the sync tool.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(title = "SyncParams")]
pub struct SyncParams {
    /// Remove rows without an id and rows whose id is not in the store instead of syncing.
    #[serde(default)]
    pub clean: bool,

    /// Write every month whose sheet has no data rows without checking first. Cannot be combined
    /// with `clean`.
    #[serde(default)]
    pub force: bool,
}

/// Parameters for the summary tool.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(title = "SummaryParams")]
pub struct SummaryParams {
    /// The month by name or number (1-12). Defaults to the current month.
    #[serde(default)]
    pub month: Option<String>,

    /// The year. Defaults to the current year.
    #[serde(default)]
    pub year: Option<i32>,

    /// Summarize the whole year. Cannot be combined with `month`.
    #[serde(default)]
    pub yearly: bool,
}

#[tool_router(vis = "pub(super)")]
impl SpendsheetServer {
    #[tool]
    /// Initialize the spendsheet MCP service for this session and return usage instructions. You
    /// **MUST** call this **ONCE** before using other tools so that you have the full usage
    /// instructions. You **MAY** call it more than once if you have forgotten the usage
    /// instructions.
    async fn initialize_service(&self) -> Result<CallToolResult, McpError> {
        let mut initialized = self.initialized.lock().await;
        *initialized = true;
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            include_str!("docs/INSTRUCTIONS.md"),
        )]))
    }

    /// Interpret a free-text message about an expense or a saving, store the resulting transaction
    /// and write it to the spreadsheet.
    ///
    /// The message is interpreted into a description, an amount, one of the categories Food,
    /// Transport, Health, Leisure, Home, Savings or Other, and a date. The transaction is stored in
    /// the local database first. If the spreadsheet cannot be updated the call still succeeds and
    /// the returned `warnings` explain what went wrong; call `sync` later to repair the
    /// spreadsheet.
    ///
    /// # Returns
    ///
    /// A confirmation message and a JSON object with the stored `transaction`, its `mirror_ref`
    /// (sheet and row) and any `warnings`.
    #[tool]
    async fn record(
        &self,
        Parameters(params): Parameters<RecordParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: record called");
        let args = RecordArgs::new(params.text).with_source(
            params.sender_id,
            params.conversation_id,
            params.message_id,
        );
        let config = (*self.config).clone();
        tool_result(commands::record(config, self.mode, args).await)
    }

    /// Bring the spreadsheet in line with the local database, which is the source of truth.
    ///
    /// - Default: creates missing sheets, then writes every month whose sheet has no data rows
    ///   but has transactions in the database. A month sheet that already has any data row is
    ///   left alone.
    /// - `force`: writes months with empty sheets without checking first.
    /// - `clean`: deletes rows without an id and rows whose id is not in the database, and
    ///   reports integrity before and after.
    ///
    /// The summary sheet is recomputed at the end in every case.
    #[tool]
    async fn sync(
        &self,
        Parameters(params): Parameters<SyncParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!(
            "MCP: sync called with clean={}, force={}",
            params.clean, params.force
        );
        if params.clean && params.force {
            return tool_result::<()>(Err(Error::validation(
                "'clean' and 'force' cannot be combined",
            )));
        }
        let config = (*self.config).clone();
        let args = SyncArgs::new(params.clean, params.force);
        tool_result(commands::sync(config, self.mode, args).await)
    }

    /// Count the rows of every month sheet that match the database, that have an id the database
    /// does not know, and that have no id. This never changes the spreadsheet.
    #[tool]
    async fn check(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: check called");
        let config = (*self.config).clone();
        tool_result(commands::check(config, self.mode).await)
    }

    /// Spending totals for a month, by category, with savings reported separately. With `yearly`
    /// the totals cover a whole year and include a breakdown of each month that has transactions.
    #[tool]
    async fn summary(
        &self,
        Parameters(params): Parameters<SummaryParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: summary called");
        if params.yearly && params.month.is_some() {
            return tool_result::<()>(Err(Error::validation(
                "'month' and 'yearly' cannot be combined",
            )));
        }
        let config = (*self.config).clone();
        let args = SummaryArgs::new(params.month, params.year, params.yearly);
        tool_result(commands::summary(config, args).await)
    }

    /// The number of transactions, the dates of the first and last one, the number of days
    /// between them and the total spent, excluding savings.
    #[tool]
    async fn stats(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: stats called");
        let config = (*self.config).clone();
        tool_result(commands::stats(config).await)
    }
}
