//! MCP (Model Context Protocol) server implementation.
//!
//! This module provides an MCP server that exposes spendsheet functionality as tools for AI agent
//! integration. The server communicates via JSON-RPC over stdio.

/// Checks if the server has been initialized and returns an error if not.
macro_rules! require_init {
    ($self:expr) => {
        if !$self.check_initialized().await {
            return Self::uninitialized();
        }
    };
}

mod mcp_utils;
mod tools;

use crate::{Config, Mode};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::{
    CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::transport::stdio;
use rmcp::ErrorData as McpError;
use rmcp::{tool_handler, ServerHandler, ServiceExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// The spendsheet MCP server.
#[derive(Debug, Clone)]
pub struct SpendsheetServer {
    initialized: Arc<Mutex<bool>>,
    mode: Mode,
    config: Arc<Config>,
    tool_router: ToolRouter<SpendsheetServer>,
}

impl SpendsheetServer {
    pub fn new(config: Config, mode: Mode) -> Self {
        Self {
            initialized: Arc::new(Mutex::new(false)),
            mode,
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    async fn check_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    fn uninitialized() -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::error(vec![rmcp::model::Content::text(
            "You have not yet initialized the service. Please call initialize_service first.",
        )]))
    }
}

#[tool_handler]
impl ServerHandler for SpendsheetServer {
    /// Returns server information sent to the MCP client during initialization.
    ///
    /// Agents tend to treat `instructions` as optional reading, so the full usage instructions are
    /// returned by the `initialize_service` tool, which must be called before any other tool.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "spendsheet".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(include_str!("docs/INTRO.md").into()),
        }
    }
}

/// Transport type for the MCP server.
#[derive(Debug, Default)]
pub(crate) enum Io {
    #[default]
    Stdio,
    /// Mock transport for testing - holds one end of a duplex channel.
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

/// Runs the MCP server with stdio transport or mock transport. This function starts the MCP server
/// and blocks until the client disconnects or an error occurs.
///
/// # Arguments
/// - `config`: The `Config` object
/// - `mode`: Whether we are running against Google and the language model or in testing mode
/// - `io`: Whether we are using stdio as the transport or using mock io for testing
pub(crate) async fn run_server(config: Config, mode: Mode, io: Io) -> crate::Result<()> {
    use crate::error::{ErrorType, IntoResult};
    let server = SpendsheetServer::new(config, mode);
    info!("Starting MCP server...");

    let service = match io {
        Io::Stdio => server
            .serve(stdio())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))
            .pub_result(ErrorType::Service)?,
        #[cfg(test)]
        Io::Mock(stream) => server
            .serve(stream)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))
            .pub_result(ErrorType::Service)?,
    };

    info!("MCP server running, waiting for requests...");

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))
        .pub_result(ErrorType::Service)?;

    info!("MCP server shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use rmcp::model::{CallToolRequestParam, CallToolResult};
    use rmcp::service::{RoleClient, RunningService};
    use rmcp::ServiceExt;
    use tokio::io::duplex;

    async fn call(
        client: &RunningService<RoleClient, ()>,
        name: &'static str,
        arguments: serde_json::Value,
    ) -> CallToolResult {
        client
            .call_tool(CallToolRequestParam {
                name: name.into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .unwrap_or_else(|e| panic!("{name} call failed: {e}"))
    }

    fn text(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Integration test for the MCP server using an in-memory transport.
    #[tokio::test]
    async fn test_mcp_server_integration() {
        let (client_io, server_io) = duplex(4096);
        let env = TestEnv::new().await;
        let config = env.config();
        let server_handle =
            tokio::spawn(
                async move { run_server(config, Mode::Testing, Io::Mock(server_io)).await },
            );
        let client = ().serve(client_io).await.expect("Failed to create client");

        // Tools refuse to run before initialize_service
        let early = call(&client, "stats", serde_json::Value::Null).await;
        assert!(early.is_error.unwrap_or(false));
        assert!(text(&early).contains("initialize_service"));

        let init = call(&client, "initialize_service", serde_json::Value::Null).await;
        assert!(!init.is_error.unwrap_or(false), "{:?}", init.content);

        let recorded = call(
            &client,
            "record",
            serde_json::json!({"text": "coffee 4,50", "sender_id": "7"}),
        )
        .await;
        assert!(!recorded.is_error.unwrap_or(false), "{:?}", recorded.content);
        assert!(text(&recorded).contains("4.50"));

        let synced = call(&client, "sync", serde_json::json!({})).await;
        assert!(!synced.is_error.unwrap_or(false), "{:?}", synced.content);

        let checked = call(&client, "check", serde_json::Value::Null).await;
        assert!(!checked.is_error.unwrap_or(false), "{:?}", checked.content);
        assert!(text(&checked).contains("match the store"));

        let summary = call(&client, "summary", serde_json::json!({"yearly": true})).await;
        assert!(!summary.is_error.unwrap_or(false), "{:?}", summary.content);

        let bad = call(&client, "summary", serde_json::json!({"month": "Smarch"})).await;
        assert!(bad.is_error.unwrap_or(false));
        assert!(text(&bad).contains("validation"));

        let conflicting = call(
            &client,
            "sync",
            serde_json::json!({"clean": true, "force": true}),
        )
        .await;
        assert!(conflicting.is_error.unwrap_or(false));

        let stats = call(&client, "stats", serde_json::Value::Null).await;
        assert!(text(&stats).contains("1 transactions"));

        let txns = env.config().db().list_processed(crate::db::PeriodFilter::All).await.unwrap();
        assert_eq!(txns[0].sender_id.as_deref(), Some("7"));

        drop(client);
        let server_result = tokio::time::timeout(std::time::Duration::from_secs(5), server_handle)
            .await
            .expect("Server timed out")
            .expect("Server task panicked");
        assert!(server_result.is_ok(), "Server returned error: {server_result:?}");
    }
}
