//! MCP server adapter: tool registration and the error envelope.
//!
//! The transport is JSON-RPC over standard streams, handled entirely by
//! `rmcp`. This layer only maps tool calls onto the handlers in
//! [`crate::tools`] and converts domain errors into tool-level error
//! envelopes — a failed query is a readable markdown result with
//! `is_error`, never a protocol fault.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};

use crate::error::Result as HydraResult;
use crate::sessions::SessionReader;
use crate::smart::SmartBackend;
use crate::tools;
use crate::tools::analyze::{AnalyzeFileRequest, SmartReadRequest};
use crate::tools::ask::AskModelRequest;
use crate::tools::compare::CompareModelsRequest;
use crate::tools::consensus::ConsensusRequest;
use crate::tools::recap::SessionRecapRequest;
use crate::tools::synthesize::SynthesizeRequest;

#[derive(Clone)]
pub struct HydraServer {
    smart: Arc<SmartBackend>,
    sessions: Arc<SessionReader>,
    tool_router: ToolRouter<Self>,
}

fn envelope(result: HydraResult<String>) -> CallToolResult {
    match result {
        Ok(markdown) => CallToolResult::success(vec![Content::text(markdown)]),
        Err(e) => CallToolResult::error(vec![Content::text(tools::render_error(&e))]),
    }
}

#[tool_router]
impl HydraServer {
    pub fn new(smart: Arc<SmartBackend>, sessions: SessionReader) -> Self {
        Self {
            smart,
            sessions: Arc::new(sessions),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "List every model currently available across all configured providers, grouped by provider. Model IDs are provider-prefixed (e.g. openai/gpt-4o) and can be passed to every other tool."
    )]
    async fn list_models(&self) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::list::run(&self.smart).await))
    }

    #[tool(
        description = "Ask one model a question and get its answer with latency and token metadata. Set max_response_tokens to have a cheap model distill long answers down to budget."
    )]
    async fn ask_model(
        &self,
        Parameters(req): Parameters<AskModelRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::ask::run(&self.smart, req).await))
    }

    #[tool(
        description = "Send the same prompt to 2-5 models concurrently and compare their answers side by side, with a latency/token table. Failing models are reported inline without sinking the comparison."
    )]
    async fn compare_models(
        &self,
        Parameters(req): Parameters<CompareModelsRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::compare::run(&self.smart, req).await))
    }

    #[tool(
        description = "Poll 3-7 models on the same question and check whether they agree. A judge model partitions the answers into agreement groups; the chosen strategy (majority, supermajority, unanimous) decides whether consensus was reached."
    )]
    async fn consensus(
        &self,
        Parameters(req): Parameters<ConsensusRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::consensus::run(&self.smart, req).await))
    }

    #[tool(
        description = "Gather answers from 2-5 models and have a synthesizer model merge them into one unified answer that resolves disagreements."
    )]
    async fn synthesize(
        &self,
        Parameters(req): Parameters<SynthesizeRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::synthesize::run(&self.smart, req).await))
    }

    #[tool(
        description = "Analyze a file server-side with a large-context model and return prose analysis. The file never enters your context — only the analysis does, which is reported as context saved."
    )]
    async fn analyze_file(
        &self,
        Parameters(req): Parameters<AnalyzeFileRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::analyze::run_analyze(&self.smart, req).await))
    }

    #[tool(
        description = "Extract the relevant parts of a file verbatim, with line-range annotations, using a large-context model server-side. Use instead of reading big files directly."
    )]
    async fn smart_read(
        &self,
        Parameters(req): Parameters<SmartReadRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(tools::analyze::run_smart_read(&self.smart, req).await))
    }

    #[tool(
        description = "Summarize your recent work sessions on a project from its on-disk transcripts: files touched, decisions, errors fixed, and unfinished work. Auto-detects the most recent project when none is given."
    )]
    async fn session_recap(
        &self,
        Parameters(req): Parameters<SessionRecapRequest>,
    ) -> std::result::Result<CallToolResult, McpError> {
        Ok(envelope(
            tools::recap::run(&self.smart, &self.sessions, req).await,
        ))
    }
}

#[tool_handler]
impl ServerHandler for HydraServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Multi-model orchestration: consult other AI models through one tool \
                 surface. Start with list_models to see what is available; use \
                 ask_model for one opinion, compare_models or consensus for several, \
                 synthesize for a merged answer, and analyze_file/smart_read to \
                 process large files without spending your own context."
                    .into(),
            ),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    fn server_with(mock: MockBackend) -> HydraServer {
        let smart = Arc::new(SmartBackend::new(Arc::new(mock)));
        HydraServer::new(smart, SessionReader::new("/nonexistent"))
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                rmcp::model::RawContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn successful_call_is_not_an_error() {
        let server = server_with(MockBackend::fixed("a fine answer"));
        let result = server
            .ask_model(Parameters(AskModelRequest {
                model: "m1".into(),
                prompt: "hello".into(),
                system_prompt: None,
                temperature: None,
                max_tokens: None,
                max_response_tokens: None,
                format: None,
                include_raw: None,
            }))
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        assert!(text_of(&result).contains("a fine answer"));
    }

    #[tokio::test]
    async fn domain_failure_becomes_error_envelope() {
        let server = server_with(MockBackend::failing(500, "boom"));
        let result = server
            .ask_model(Parameters(AskModelRequest {
                model: "m1".into(),
                prompt: "hello".into(),
                system_prompt: None,
                temperature: None,
                max_tokens: None,
                max_response_tokens: None,
                format: None,
                include_raw: None,
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        let text = text_of(&result);
        assert!(text.contains("## Error"));
        assert!(text.contains("**Recovery:**"));
    }

    #[tokio::test]
    async fn partial_compare_failure_is_not_an_envelope_error() {
        use crate::backend::mock::MockOutcome;
        let server = server_with(MockBackend::new(vec![
            MockOutcome::Reply("works".into()),
            MockOutcome::HttpError(500, "boom".into()),
        ]));

        let result = server
            .compare_models(Parameters(CompareModelsRequest {
                models: vec!["m1".into(), "m2".into()],
                prompt: "p".into(),
                system_prompt: None,
                temperature: None,
                max_tokens: None,
            }))
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        let text = text_of(&result);
        assert!(text.contains("### Errors"));
    }

    #[tokio::test]
    async fn list_models_tool_renders_catalog() {
        let server = server_with(MockBackend::fixed("x").with_models(&["m1", "m2"]));
        let result = server.list_models().await.unwrap();
        assert_ne!(result.is_error, Some(true));
        assert!(text_of(&result).contains("## Available Models (2)"));
    }
}
