//! End-to-end workflow scenarios with a scripted model and documentation
//! server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use docsflow::{
    docs_agent, documentation_workflow, rewrite_agent, summarize_agent, DocsResponse,
    DocsflowError, JsonRpcRequest, JsonRpcResponse, McpClient, McpToolset, McpTransport,
    ModelCompletion, Result, RunEvent, StubModel,
};

struct ScriptedTransport {
    responses: Mutex<VecDeque<Value>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let result = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Value::Null);
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: request.id,
            result: Some(result),
            error: None,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn handshake() -> Vec<Value> {
    vec![
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "stub-learn", "version": "1.0"}
        }),
        Value::Null, // notifications/initialized
        json!({
            "tools": [{
                "name": "microsoft_docs_search",
                "description": "Search official documentation",
                "inputSchema": {
                    "type": "object",
                    "properties": {"question": {"type": "string"}}
                }
            }]
        }),
    ]
}

fn docs_toolset(extra: Vec<Value>) -> McpToolset<ScriptedTransport> {
    let mut responses = handshake();
    responses.extend(extra);
    McpToolset::new(
        "Microsoft Learn MCP",
        McpClient::new(ScriptedTransport::new(responses)),
        vec!["microsoft_docs_search".into()],
    )
}

const DOCS_JSON: &str = r#"{"answer":"Azure Blob Storage is Microsoft's object storage solution for the cloud.","sources":["https://learn.microsoft.com/azure/storage/blobs/storage-blobs-introduction"]}"#;

const SUMMARY: &str = "- Azure Blob Storage stores unstructured objects in the cloud\n- Optimized for massive amounts of data";

#[tokio::test]
async fn misspelled_question_flows_through_all_three_agents() {
    let toolset = docs_toolset(vec![json!({
        "content": [{"type": "text", "text": "Blob storage documentation excerpt"}],
        "isError": false
    })]);
    toolset.connect().await.unwrap();

    let rewrite = Arc::new(rewrite_agent(Arc::new(StubModel::replies(&[
        "What is Azure Blob Storage?",
    ]))));
    let docs = Arc::new(docs_agent(
        Arc::new(StubModel::new(vec![
            ModelCompletion::tool_call(
                "microsoft_docs_search",
                json!({"question": "What is Azure Blob Storage?"}),
            ),
            ModelCompletion::text(DOCS_JSON),
        ])),
        &toolset,
    ));
    let summarize = Arc::new(summarize_agent(Arc::new(StubModel::replies(&[SUMMARY]))));

    let flow = documentation_workflow(rewrite, docs, summarize).unwrap();
    let events: Vec<_> = flow.run_stream("wut is Azure Blob torage").collect().await;
    let events: Vec<RunEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    // Only the summarize output reaches the runner.
    let outputs: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Output { data } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(outputs, vec![SUMMARY.to_string()]);

    let invoked: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::AgentInvoked { agent } => Some(agent.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        invoked,
        vec!["rewrite-agent", "microsoft-docs-agent", "summarize-agent"]
    );

    toolset.close().await.unwrap();
}

#[tokio::test]
async fn docs_output_satisfies_the_structured_contract() {
    let parsed: DocsResponse = serde_json::from_str(DOCS_JSON).unwrap();
    assert!(!parsed.answer.is_empty());
    assert_eq!(parsed.sources.len(), 1);
    assert!(parsed.sources[0].starts_with("https://learn.microsoft.com/"));
}

#[tokio::test]
async fn summarize_accepts_the_docs_agents_structured_output() {
    let summarize = summarize_agent(Arc::new(StubModel::replies(&[SUMMARY])));
    let reply = summarize.respond(DOCS_JSON).await.unwrap();
    assert_eq!(reply, SUMMARY);
}

#[tokio::test]
async fn construction_is_idempotent() {
    let build = || {
        let rewrite = Arc::new(rewrite_agent(Arc::new(StubModel::replies(&[]))));
        let toolset = docs_toolset(vec![]);
        let docs = Arc::new(docs_agent(Arc::new(StubModel::replies(&[])), &toolset));
        let summarize = Arc::new(summarize_agent(Arc::new(StubModel::replies(&[]))));
        documentation_workflow(rewrite, docs, summarize).unwrap()
    };

    let first = build();
    let second = build();
    assert_eq!(first.start_agent(), second.start_agent());
    assert_eq!(first.output_agents(), second.output_agents());
    assert_eq!(first.edge_names(), second.edge_names());
    assert_eq!(first.start_agent(), "rewrite-agent");
    assert_eq!(first.output_agents(), vec!["summarize-agent"]);
}

#[tokio::test]
async fn failed_documentation_search_aborts_before_summarize() {
    let toolset = docs_toolset(vec![json!({
        "content": [{"type": "text", "text": "search backend unavailable"}],
        "isError": true
    })]);
    toolset.connect().await.unwrap();

    let rewrite = Arc::new(rewrite_agent(Arc::new(StubModel::replies(&[
        "What is Azure Blob Storage?",
    ]))));
    let docs = Arc::new(docs_agent(
        Arc::new(StubModel::new(vec![ModelCompletion::tool_call(
            "microsoft_docs_search",
            json!({"question": "What is Azure Blob Storage?"}),
        )])),
        &toolset,
    ));
    let summarize = Arc::new(summarize_agent(Arc::new(StubModel::replies(&[SUMMARY]))));

    let flow = documentation_workflow(rewrite, docs, summarize).unwrap();
    let events: Vec<_> = flow.run_stream("wut is Azure Blob torage").collect().await;

    match events.last().unwrap() {
        Err(DocsflowError::Mcp(detail)) => assert!(detail.contains("unavailable")),
        other => panic!("expected an mcp failure, got {other:?}"),
    }
    assert!(!events
        .iter()
        .any(|e| matches!(e, Ok(RunEvent::Output { .. }))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Ok(RunEvent::AgentInvoked { agent }) if agent == "summarize-agent")));
}
