use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{DocsflowError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::tool::ToolRegistry;

/// Structured-output contract an agent's final reply must satisfy.
///
/// The schema rides along on the inference request as a `response_format`
/// and the returned content is checked against its `required` properties.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.schema,
            }
        })
    }

    fn check(&self, content: &str) -> std::result::Result<(), String> {
        let value: Value =
            serde_json::from_str(content).map_err(|err| format!("not valid JSON: {err}"))?;
        let object = value
            .as_object()
            .ok_or_else(|| "not a JSON object".to_string())?;
        if let Some(required) = self.schema.get("required").and_then(|r| r.as_array()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !object.contains_key(key) {
                    return Err(format!("missing required property `{key}`"));
                }
            }
        }
        Ok(())
    }
}

/// A named, stateless-between-calls wrapper around one system instruction,
/// an optional tool set, and an optional output schema. Every `respond`
/// builds a fresh transcript; nothing carries over between calls.
pub struct Agent<M: LanguageModel> {
    name: String,
    instructions: String,
    model: Arc<M>,
    tools: ToolRegistry,
    output_schema: Option<OutputSchema>,
    max_steps: usize,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(name: impl Into<String>, model: Arc<M>) -> Self {
        Self {
            name: name.into(),
            instructions: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            output_schema: None,
            max_steps: 6,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Run a single exchange. Tool calls requested by the model are resolved
    /// against this agent's registry; anything outside it is refused.
    pub async fn respond(&self, input: impl Into<String>) -> Result<String> {
        let mut transcript = vec![
            Message::system(&self.instructions),
            Message::user(input),
        ];
        let descriptions = self.tools.describe();
        let response_format = self.output_schema.as_ref().map(|s| s.response_format());

        for _ in 0..self.max_steps {
            let completion = self
                .model
                .complete_chat(&transcript, &descriptions, response_format.as_ref())
                .await?;

            if !completion.tool_calls.is_empty() {
                for call in completion.tool_calls {
                    if !self.tools.contains(&call.name) {
                        return Err(DocsflowError::ToolNotPermitted {
                            agent: self.name.clone(),
                            tool: call.name,
                        });
                    }
                    debug!(agent = %self.name, tool = %call.name, "invoking tool");
                    transcript.push(Message::tool_request(call.clone()));
                    let output = self.tools.call(&call.name, call.arguments).await?;
                    transcript.push(Message::tool(call.name, call.id, output));
                }
                continue;
            }

            if let Some(content) = completion.content {
                if let Some(schema) = &self.output_schema {
                    schema
                        .check(&content)
                        .map_err(|detail| DocsflowError::SchemaViolation {
                            agent: self.name.clone(),
                            detail,
                        })?;
                }
                return Ok(content);
            }

            return Err(DocsflowError::Inference(
                "completion carried neither content nor tool calls".into(),
            ));
        }

        Err(DocsflowError::Inference(format!(
            "agent `{}` reached the step limit without a final reply",
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::llm::{ModelCompletion, StubModel};
    use crate::tool::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` field back"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn returns_model_reply_without_tools() {
        let model = Arc::new(StubModel::replies(&["Hello!"]));
        let agent = Agent::new("greeter", model);

        let reply = agent.respond("hi").await.unwrap();
        assert_eq!(reply, "Hello!");
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = Arc::new(StubModel::new(vec![
            ModelCompletion::tool_call("echo", json!({"text": "ping"})),
            ModelCompletion::text("Echoed your request."),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);

        let agent = Agent::new("echoer", model).with_tools(tools);
        let reply = agent.respond("say ping").await.unwrap();
        assert_eq!(reply, "Echoed your request.");
    }

    #[tokio::test]
    async fn refuses_tool_outside_the_registry() {
        let model = Arc::new(StubModel::new(vec![ModelCompletion::tool_call(
            "shell_exec",
            json!({}),
        )]));
        let agent = Agent::new("restricted", model);

        let err = agent.respond("do something").await.unwrap_err();
        assert!(matches!(
            err,
            DocsflowError::ToolNotPermitted { agent, tool } if agent == "restricted" && tool == "shell_exec"
        ));
    }

    #[tokio::test]
    async fn enforces_output_schema() {
        let schema = OutputSchema::new(
            "reply",
            json!({
                "type": "object",
                "properties": {
                    "answer": {"type": "string"},
                    "sources": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["answer", "sources"]
            }),
        );

        let model = Arc::new(StubModel::replies(&[r#"{"answer": "A", "sources": []}"#]));
        let agent = Agent::new("structured", model).with_output_schema(schema.clone());
        assert!(agent.respond("q").await.is_ok());

        let model = Arc::new(StubModel::replies(&["plain prose, no JSON"]));
        let agent = Agent::new("structured", model).with_output_schema(schema);
        assert!(matches!(
            agent.respond("q").await.unwrap_err(),
            DocsflowError::SchemaViolation { .. }
        ));
    }

    #[tokio::test]
    async fn stops_at_the_step_limit() {
        let model = Arc::new(StubModel::new(vec![
            ModelCompletion::tool_call("echo", json!({})),
            ModelCompletion::tool_call("echo", json!({})),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);

        let agent = Agent::new("looper", model)
            .with_tools(tools)
            .with_max_steps(2);
        assert!(agent.respond("loop").await.is_err());
    }
}
