use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocsflowError>;

#[derive(Debug, Error)]
pub enum DocsflowError {
    /// Required startup configuration is missing or invalid. Fatal: the
    /// process exits before any workflow is built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The inference result could not be coerced into the agent's declared
    /// output schema. Aborts the current run only.
    #[error("agent `{agent}` produced output violating its schema: {detail}")]
    SchemaViolation { agent: String, detail: String },

    /// The model requested a tool operation outside the agent's allow-list.
    #[error("agent `{agent}` attempted disallowed tool `{tool}`")]
    ToolNotPermitted { agent: String, tool: String },

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    /// The inference endpoint is unreachable or returned an error.
    /// Propagated unchanged.
    #[error("inference service error: {0}")]
    Inference(String),

    /// The remote tool endpoint is unreachable or returned an error.
    /// Propagated unchanged.
    #[error("mcp error: {0}")]
    Mcp(String),

    /// Invalid workflow wiring detected at build time.
    #[error("workflow error: {0}")]
    Workflow(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
