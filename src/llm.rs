//! Inference service abstraction and the Azure OpenAI client.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Credential, InferenceConfig};
use crate::error::{DocsflowError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: Some("call_0".into()),
                name: name.into(),
                arguments,
            }],
        }
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        response_format: Option<&Value>,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str) -> DocsflowError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return DocsflowError::Inference(format!("rate limit exceeded: {body}"));
    }
    DocsflowError::Inference(format!("request failed with {status}: {body}"))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

/// Chat completions against an Azure OpenAI deployment. Authenticates with
/// either a static API key or an ambient bearer token.
#[derive(Clone)]
pub struct AzureResponsesClient {
    http: reqwest::Client,
    endpoint: String,
    deployment: String,
    credential: Credential,
}

const API_VERSION: &str = "2024-10-21";

impl AzureResponsesClient {
    pub fn from_config(cfg: &InferenceConfig) -> Result<Self> {
        let endpoint = cfg.endpoint.clone().ok_or_else(|| {
            DocsflowError::Configuration("AZURE_OPENAI_ENDPOINT must be set".into())
        })?;
        let deployment = cfg.deployment.clone().ok_or_else(|| {
            DocsflowError::Configuration(
                "AZURE_OPENAI_RESPONSES_DEPLOYMENT_NAME must be set".into(),
            )
        })?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|err| DocsflowError::Inference(format!("http client error: {err}")))?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            credential: cfg.credential()?,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        )
    }

    fn to_wire_messages(&self, messages: &[Message]) -> Vec<AzureMessage> {
        let mut built = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let mut tool_calls = None;
            if let Some(call) = &message.tool_call {
                tool_calls = Some(vec![AzureToolCall {
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: AzureFunctionCall {
                        name: call.name.clone(),
                        arguments: serialize_tool_arguments(&call.arguments),
                    },
                }]);
            }

            let content = if message.role == Role::Tool {
                message
                    .tool_result
                    .as_ref()
                    .map(|result| serialize_tool_arguments(&result.output))
                    .unwrap_or_else(|| message.content.clone())
            } else {
                message.content.clone()
            };

            let tool_call_id = message
                .tool_result
                .as_ref()
                .and_then(|result| result.tool_call_id.clone());

            built.push(AzureMessage {
                role,
                content,
                tool_call_id,
                tool_calls,
            });
        }
        built
    }

    fn to_wire_tools(&self, tools: &[ToolDescription]) -> Option<Vec<AzureTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| AzureTool {
                    r#type: "function".to_string(),
                    function: AzureFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LanguageModel for AzureResponsesClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        response_format: Option<&Value>,
    ) -> Result<ModelCompletion> {
        let mut payload = json!({
            "messages": self.to_wire_messages(messages),
            "tools": self.to_wire_tools(tools),
            "tool_choice": if tools.is_empty() { Value::Null } else { Value::String("auto".to_string()) },
        });
        if let Some(format) = response_format {
            payload["response_format"] = format.clone();
        }

        let mut builder = self.http.post(self.completions_url());
        builder = match &self.credential {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer(token) => builder.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}"),
            ),
        };

        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| DocsflowError::Inference(format!("request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body));
        }

        let body: AzureResponse = resp
            .json()
            .await
            .map_err(|err| DocsflowError::Inference(format!("response parse error: {err}")))?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DocsflowError::Inference("completion returned no choices".into()))?;

        let mut tool_calls = Vec::new();
        if let Some(calls) = first.message.tool_calls {
            for call in calls {
                let args = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                tool_calls.push(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: args,
                });
            }
        }

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }
}

#[derive(Serialize)]
struct AzureMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<AzureToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct AzureToolCall {
    #[serde(default)]
    id: Option<String>,
    r#type: String,
    function: AzureFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct AzureFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct AzureTool {
    r#type: String,
    function: AzureFunction,
}

#[derive(Serialize)]
struct AzureFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Deserialize)]
struct AzureResponse {
    choices: Vec<AzureChoice>,
}

#[derive(Deserialize)]
struct AzureChoice {
    message: AzureChoiceMessage,
}

#[derive(Deserialize)]
struct AzureChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<AzureToolCall>>,
}

/// Scripted model for tests: returns queued completions in order and errors
/// once the queue is drained.
#[derive(Default)]
pub struct StubModel {
    completions: Mutex<VecDeque<ModelCompletion>>,
}

impl StubModel {
    pub fn new(completions: Vec<ModelCompletion>) -> Self {
        Self {
            completions: Mutex::new(completions.into()),
        }
    }

    pub fn replies(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ModelCompletion::text(*t)).collect())
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
        _response_format: Option<&Value>,
    ) -> Result<ModelCompletion> {
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DocsflowError::Inference("stub model exhausted".into()))
    }
}
