//! MCP server implementation using rmcp.
//!
//! Exposes sandboxed code execution as MCP tools.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::orchestrator::{Executor, SandboxDescription};
use crate::request::{ExecuteResponse, ExecutionRequest, RequestPolicy};

/// Source run by the `diagnostics` tool.
const DIAGNOSTIC_CODE: &str = "print(\"Hello, World!\")\n";
const DIAGNOSTIC_OUTPUT: &str = "Hello, World!\n";

/// MCP server for sandboxed code execution.
#[derive(Clone)]
pub struct SandboxServer<E: Clone> {
    executor: Arc<E>,
    policy: RequestPolicy,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// The code to execute in the sandbox.
    #[schemars(description = "The Python source to execute in the sandbox")]
    pub code: String,

    /// Timeout in seconds.
    #[schemars(description = "CPU-time budget in seconds (default 5)")]
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Parameters for the diagnostics tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiagnosticsParams {
    /// Run the self-test program; `false` only reports the configuration.
    #[schemars(description = "Execute a hello-world program (default true); false is a cheap health check")]
    #[serde(default = "default_run")]
    pub run: bool,
}

const fn default_run() -> bool {
    true
}

/// Output of the diagnostics tool.
#[derive(Debug, Serialize)]
struct DiagnosticsReport {
    healthy: bool,
    sandbox: SandboxDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ExecuteResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tool_router]
impl<E: Executor + Clone + 'static> SandboxServer<E> {
    /// Create a new sandbox server.
    pub fn new(executor: E, policy: RequestPolicy) -> Self {
        Self {
            executor: Arc::new(executor),
            policy,
            tool_router: Self::tool_router(),
        }
    }

    /// Execute code in the sandbox.
    #[tool(description = "Execute Python code in an isolated, resource-limited sandbox")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = ExecutionRequest::new(params.code, params.timeout, &self.policy)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        info!(
            code_len = request.code().len(),
            timeout = request.timeout_seconds(),
            "Executing code"
        );

        let result = self.executor.execute(&request).await.map_err(|e| {
            error!(error = %e, "Execution failed");
            McpError::internal_error(format!("Execution error: {e}"), None)
        })?;

        let response = ExecuteResponse::from(&result);
        let body = serde_json::to_string_pretty(&response)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        if response.exit_code == 0 {
            Ok(CallToolResult::success(vec![Content::text(body)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(body)]))
        }
    }

    /// Run a known program through the whole pipeline, or with `run: false`
    /// just report that the server is up and how it is configured.
    #[tool(description = "Check that the sandbox works by running a hello-world program")]
    async fn diagnostics(
        &self,
        Parameters(params): Parameters<DiagnosticsParams>,
    ) -> Result<CallToolResult, McpError> {
        if !params.run {
            let report = DiagnosticsReport {
                healthy: true,
                sandbox: self.executor.describe(),
                result: None,
                error: None,
            };
            let body = serde_json::to_string_pretty(&report)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?;
            return Ok(CallToolResult::success(vec![Content::text(body)]));
        }

        let request = ExecutionRequest::new(DIAGNOSTIC_CODE.to_string(), None, &self.policy)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        let report = match self.executor.execute(&request).await {
            Ok(result) => DiagnosticsReport {
                healthy: result.is_success() && result.stdout == DIAGNOSTIC_OUTPUT,
                sandbox: self.executor.describe(),
                result: Some(ExecuteResponse::from(&result)),
                error: None,
            },
            Err(e) => {
                error!(error = %e, "Diagnostics execution failed");
                DiagnosticsReport {
                    healthy: false,
                    sandbox: self.executor.describe(),
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };

        info!(healthy = report.healthy, "Diagnostics finished");
        let body = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        if report.healthy {
            Ok(CallToolResult::success(vec![Content::text(body)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(body)]))
        }
    }
}

#[tool_handler]
impl<E: Executor + Clone + 'static> ServerHandler for SandboxServer<E> {
    fn get_info(&self) -> ServerInfo {
        let sandbox = self.executor.describe();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "code-sandbox".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Execute untrusted code in a one-shot sandbox ({isolation} isolation, \
                 interpreter {interpreter}).\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - code: the source to run\n\
                 - timeout: optional seconds, at most {max}\n\
                 \n\
                 The result is JSON with output, error and exit_code. \
                 No network, no subprocesses, no file writes.",
                isolation = sandbox.isolation,
                interpreter = sandbox.interpreter,
                max = self.policy.max_timeout_seconds,
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio<E: Executor + Clone + 'static>(
    executor: E,
    policy: RequestPolicy,
) -> anyhow::Result<()> {
    let server = SandboxServer::new(executor, policy);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use crate::orchestrator::{ExecutionResult, OrchestrationError, Termination};
    use async_trait::async_trait;

    #[derive(Clone)]
    struct MockExecutor {
        fail: bool,
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(
            &self,
            request: &ExecutionRequest,
        ) -> Result<ExecutionResult, OrchestrationError> {
            if self.fail {
                return Err(OrchestrationError::RestrictionSetup("seccomp unavailable".into()));
            }
            let exit_code = i32::from(request.code().contains("raise"));
            let stdout = if request.code() == DIAGNOSTIC_CODE {
                DIAGNOSTIC_OUTPUT.to_string()
            } else {
                format!("executed: {}", request.code())
            };
            Ok(ExecutionResult {
                stdout,
                stderr: String::new(),
                exit_code,
                timed_out: false,
                termination: Termination::Exited { code: exit_code },
                truncated: false,
            })
        }

        fn describe(&self) -> SandboxDescription {
            SandboxDescription {
                isolation: "mock".into(),
                interpreter: "/usr/bin/python3".into(),
                user: "nobody".into(),
                group: "nogroup".into(),
                memory_mb: 100,
                output_mb: 5,
                max_timeout_seconds: 30,
                deny_action: "errno".into(),
            }
        }
    }

    fn server(fail: bool) -> SandboxServer<MockExecutor> {
        SandboxServer::new(
            MockExecutor { fail },
            RequestPolicy::from(&LimitsConfig::default()),
        )
    }

    fn params(code: &str, timeout: Option<u64>) -> Parameters<ExecuteParams> {
        Parameters(ExecuteParams {
            code: code.to_string(),
            timeout,
        })
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = server(false).execute(params("hello", None)).await.unwrap();
        assert!(!result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_execute_guest_failure_is_tool_error() {
        let result = server(false)
            .execute(params("raise ValueError", Some(2)))
            .await
            .unwrap();
        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_timeout() {
        let result = server(false).execute(params("hello", Some(0))).await;
        assert!(result.is_err());

        let result = server(false).execute(params("hello", Some(31))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_orchestration_failure_is_error() {
        let result = server(true).execute(params("hello", None)).await;
        assert!(result.is_err());
    }

    fn diagnostics(run: bool) -> Parameters<DiagnosticsParams> {
        Parameters(DiagnosticsParams { run })
    }

    #[tokio::test]
    async fn test_diagnostics_healthy() {
        let result = server(false).diagnostics(diagnostics(true)).await.unwrap();
        assert!(!result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_diagnostics_reports_failure() {
        let result = server(true).diagnostics(diagnostics(true)).await.unwrap();
        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_health_check_skips_execution() {
        // A failing executor would make the full self-test unhealthy.
        let result = server(true).diagnostics(diagnostics(false)).await.unwrap();
        assert!(!result.is_error.unwrap_or(false));

        let body = serde_json::to_string(&result.content).unwrap();
        assert!(body.contains("healthy"));
        assert!(!body.contains("Hello, World!"));
    }

    #[test]
    fn test_diagnostics_runs_by_default() {
        let params: DiagnosticsParams = serde_json::from_str("{}").unwrap();
        assert!(params.run);
    }

    #[test]
    fn test_server_info_mentions_isolation() {
        let info = server(false).get_info();
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("mock isolation"));
        assert!(instructions.contains("at most 30"));
    }
}
