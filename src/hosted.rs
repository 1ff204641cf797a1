//! Hosted-agent endpoint: the whole workflow exposed as one callable
//! agent-shaped entity. Request/response framing is owned here, not by the
//! workflow.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::workflow::WorkflowAgent;

pub struct HostedServer<M: LanguageModel + 'static> {
    agent: WorkflowAgent<M>,
}

#[derive(Deserialize)]
struct ResponsesRequest {
    input: String,
}

#[derive(Serialize)]
struct ResponsesReply {
    agent: String,
    output: String,
}

impl<M: LanguageModel + 'static> HostedServer<M> {
    pub fn new(agent: WorkflowAgent<M>) -> Self {
        Self { agent }
    }

    pub fn router(self) -> Router {
        let state = Arc::new(self);
        Router::new()
            .route("/health", get(Self::health))
            .route("/v1/responses", post(Self::respond))
            .with_state(state)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        info!(%addr, "hosted agent listening");
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    async fn health() -> impl IntoResponse {
        "ok"
    }

    async fn respond(
        State(state): State<Arc<Self>>,
        Json(payload): Json<ResponsesRequest>,
    ) -> Response {
        match state.agent.respond(payload.input).await {
            Ok(output) => Json(ResponsesReply {
                agent: state.agent.name().to_string(),
                output,
            })
            .into_response(),
            Err(err) => (
                axum::http::StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            )
                .into_response(),
        }
    }
}
