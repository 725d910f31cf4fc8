use crate::coverage::{
    CoverageMode, CoverageOrchestrator, CoverageOutcome, CoverageReport, TestReport,
    normalize_target,
};
use crate::progress::{PeerNotifier, ProgressReporter, progress_token};
use crate::runner::{CommandResult, Invocation};
use rmcp::{
    ErrorData, RoleServer, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars,
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct CoverageRequest {
    /// Path to the package or directory to analyze. Defaults to ./...
    pub path: Option<String>,
    /// Format of the coverage output: 'summary' (default) or 'func' (per function)
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct TestRequest {
    /// Package path or pattern. Defaults to ./...
    pub path: Option<String>,
}

/// Payload of a coverage run whose report step could not execute.
#[derive(Debug, Serialize)]
struct PartialCoverageReport<'a> {
    target: &'a str,
    mode: CoverageMode,
    test: &'a CommandResult,
    error: String,
}

const INSTRUCTIONS: &str = "Go test and coverage tools for the configured workspace.\n\n\
    - run_tests: run `go test` for a package or pattern (default ./...).\n\
    - analyze_coverage: `go test -cover` summary, or output_format='func' for a per-function report.\n\
    Failing tests are returned as normal results with a non-zero exit_code; a tool error means \
    the command itself could not run. Pass a progressToken to receive progress notifications.";

#[derive(Clone)]
pub struct GoTools {
    tool_router: ToolRouter<GoTools>,
    orchestrator: CoverageOrchestrator,
    shutdown: CancellationToken,
    availability: Option<String>,
}

#[tool_router]
impl GoTools {
    pub fn new(orchestrator: CoverageOrchestrator, shutdown: CancellationToken) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
            shutdown,
            availability: None,
        }
    }

    /// Append a toolchain availability line to the server instructions.
    pub fn with_availability(mut self, availability: impl Into<String>) -> Self {
        self.availability = Some(availability.into());
        self
    }

    /// Build the per-call context: progress goes to the calling peer, and the call is
    /// cancelled on server shutdown or when the client cancels the request.
    fn invocation(&self, context: &RequestContext<RoleServer>) -> Invocation {
        let progress = ProgressReporter::new(
            Arc::new(PeerNotifier::new(context.peer.clone())),
            progress_token(&context.meta),
        );
        let cancel = self.shutdown.child_token();
        let linked = cancel.clone();
        let request_ct = context.ct.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = request_ct.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        Invocation::new(progress, cancel)
    }

    #[tool(
        description = "Analyze test coverage for Go code. output_format='summary' (default) runs go test -cover; output_format='func' writes a coverage profile and reports coverage per function."
    )]
    async fn analyze_coverage(
        &self,
        Parameters(req): Parameters<CoverageRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let invocation = self.invocation(&context);
        let _done = invocation.cancel.clone().drop_guard();
        self.coverage_result(req, &invocation).await
    }

    #[tool(
        description = "Run go test for a package or pattern. Defaults to ./... (all packages). Failing tests are reported in the result, not as a tool error."
    )]
    async fn run_tests(
        &self,
        Parameters(req): Parameters<TestRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let invocation = self.invocation(&context);
        let _done = invocation.cancel.clone().drop_guard();
        self.test_result(req, &invocation).await
    }
}

impl GoTools {
    /// Body of `analyze_coverage`, usable without an MCP peer.
    pub async fn coverage_result(
        &self,
        req: CoverageRequest,
        invocation: &Invocation,
    ) -> Result<CallToolResult, ErrorData> {
        let target = normalize_target(self.orchestrator.workspace(), req.path.as_deref());
        let mode = CoverageMode::parse(req.output_format.as_deref());
        info!(id = %invocation.id, %target, %mode, "analyze_coverage");

        match mode {
            CoverageMode::Summary => {
                invocation
                    .progress
                    .report(format!("Running go test -cover for {target}"))
                    .await;
                match self.orchestrator.summary(invocation, &target).await {
                    Ok(test) => json_result(&CoverageReport {
                        target,
                        mode,
                        test,
                        cover: None,
                    }),
                    Err(e) => Ok(error_result("go test failed", &e)),
                }
            }
            CoverageMode::Func => {
                invocation
                    .progress
                    .report(format!("Running go test with coverage for {target}"))
                    .await;
                let outcome = self.orchestrator.by_function(invocation, &target).await;
                let result = match outcome {
                    CoverageOutcome::TotalFailure { error } => {
                        Ok(error_result("coverage analysis failed", &error))
                    }
                    CoverageOutcome::Partial { test, error } => {
                        let payload = PartialCoverageReport {
                            target: &target,
                            mode,
                            test: &test,
                            error: format!("coverage report failed: {error}"),
                        };
                        Ok(CallToolResult::error(vec![Content::json(&payload)?]))
                    }
                    CoverageOutcome::Complete { test, cover } => json_result(&CoverageReport {
                        target: target.clone(),
                        mode,
                        test,
                        cover: Some(cover),
                    }),
                };
                invocation
                    .progress
                    .report(format!("Coverage analysis finished for {target}"))
                    .await;
                result
            }
        }
    }

    /// Body of `run_tests`, usable without an MCP peer.
    pub async fn test_result(
        &self,
        req: TestRequest,
        invocation: &Invocation,
    ) -> Result<CallToolResult, ErrorData> {
        let target = normalize_target(self.orchestrator.workspace(), req.path.as_deref());
        info!(id = %invocation.id, %target, "run_tests");

        invocation
            .progress
            .report(format!("Running go test for {target}"))
            .await;
        match self.orchestrator.run_tests(invocation, &target).await {
            Ok(result) => json_result(&TestReport { target, result }),
            Err(e) => Ok(error_result("go test failed", &e)),
        }
    }
}

fn json_result<T: Serialize>(payload: &T) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::json(payload)?]))
}

fn error_result(context: &str, error: &dyn std::error::Error) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("{context}: {error}"))])
}

#[tool_handler]
impl ServerHandler for GoTools {
    fn get_info(&self) -> ServerInfo {
        let instructions = match &self.availability {
            Some(availability) => format!("{INSTRUCTIONS}\n\n{availability}"),
            None => INSTRUCTIONS.to_string(),
        };
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(instructions),
        }
    }
}
