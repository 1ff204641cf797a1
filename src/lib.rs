//! Building blocks for a linear multi-agent documentation workflow.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an Azure OpenAI client.
//! - A tool interface (`Tool`, `ToolRegistry`) and an MCP toolset binding
//!   restricted by an operation allow-list.
//! - Stateless `Agent`s chained into a `Workflow` that streams `RunEvent`s.
//! - Three interchangeable runners: a CLI REPL, a browser dev inspector, and
//!   a hosted-agent endpoint.

mod agent;
mod agents;
mod config;
mod error;
#[cfg(feature = "server")]
mod hosted;
mod llm;
mod mcp;
mod message;
pub mod repl;
#[cfg(feature = "server")]
mod server;
mod tool;
mod workflow;

pub use agent::{Agent, OutputSchema};
pub use agents::{
    docs_agent, docs_response_schema, documentation_workflow, rewrite_agent, summarize_agent,
    DocsResponse,
};
pub use config::{
    AppConfig, Credential, DocsSearchConfig, InferenceConfig, Mode, ServerConfig,
};
pub use error::{DocsflowError, Result};
#[cfg(feature = "server")]
pub use hosted::HostedServer;
pub use llm::{AzureResponsesClient, LanguageModel, ModelCompletion, StubModel};
pub use mcp::{
    HttpTransport, JsonRpcRequest, JsonRpcResponse, McpClient, McpToolset, McpTransport,
};
pub use message::{Message, Role, ToolCall, ToolResult};
#[cfg(feature = "server")]
pub use server::DevServer;
pub use tool::{Tool, ToolDescription, ToolRegistry};
pub use workflow::{RunEvent, RunOptions, Workflow, WorkflowAgent, WorkflowBuilder};
