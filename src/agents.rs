//! The three agents of the documentation workflow.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{Agent, OutputSchema};
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::mcp::{McpToolset, McpTransport};
use crate::tool::ToolRegistry;
use crate::workflow::Workflow;

/// Structured output of the documentation agent. Callers may rely on this
/// exact shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocsResponse {
    pub answer: String,
    pub sources: Vec<String>,
}

pub fn docs_response_schema() -> OutputSchema {
    OutputSchema::new(
        "docs_response",
        json!({
            "type": "object",
            "properties": {
                "answer": {"type": "string"},
                "sources": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["answer", "sources"],
            "additionalProperties": false
        }),
    )
}

pub fn rewrite_agent<M: LanguageModel>(model: Arc<M>) -> Agent<M> {
    Agent::new("rewrite-agent", model).with_instructions(
        "You are an expert editor. Rewrite the user's input to be precise, \
         correcting grammar and spelling. Optimize it for a documentation \
         search query while preserving the original intent.",
    )
}

pub fn docs_agent<M: LanguageModel, T: McpTransport + 'static>(
    model: Arc<M>,
    toolset: &McpToolset<T>,
) -> Agent<M> {
    let mut tools = ToolRegistry::new();
    toolset.register_tools(&mut tools);

    Agent::new("microsoft-docs-agent", model)
        .with_instructions(
            "You are an expert assistant that answers questions about \
             Microsoft products and services. Use the Microsoft Learn MCP \
             server to ground your answers in official Microsoft \
             documentation whenever possible.",
        )
        .with_tools(tools)
        .with_output_schema(docs_response_schema())
}

pub fn summarize_agent<M: LanguageModel>(model: Arc<M>) -> Agent<M> {
    Agent::new("summarize-agent", model).with_instructions(
        "You are a helpful assistant that summarizes the provided text \
         into a concise bulleted list. Do not lose important information. \
         Always output your response in Markdown format.",
    )
}

/// rewrite → docs → summarize, with only the summarize output observable.
pub fn documentation_workflow<M: LanguageModel>(
    rewrite: Arc<Agent<M>>,
    docs: Arc<Agent<M>>,
    summarize: Arc<Agent<M>>,
) -> Result<Workflow<M>> {
    let mut builder = Workflow::builder("documentation-workflow");
    builder.add_agent(summarize.clone(), true);
    builder.add_edge(&rewrite, &docs);
    builder.add_edge(&docs, &summarize);
    builder.set_start(&rewrite);
    builder.build()
}
