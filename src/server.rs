//! Browser dev inspector: registers the workflow and its agents with a
//! local serving surface. Business input only flows through `/workflows/run`;
//! every run event is mirrored onto the SSE feed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::workflow::{RunEvent, Workflow};

pub struct DevServer<M: LanguageModel + 'static> {
    workflow: Arc<Workflow<M>>,
    events: broadcast::Sender<String>,
}

#[derive(Serialize)]
struct AgentSummary {
    name: String,
    instructions: String,
    tools: Vec<String>,
}

#[derive(Serialize)]
struct WorkflowSummary {
    name: String,
    start: String,
    outputs: Vec<String>,
    edges: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct RunRequest {
    input: String,
}

impl<M: LanguageModel + 'static> DevServer<M> {
    pub fn new(workflow: Arc<Workflow<M>>) -> Self {
        let (events, _) = broadcast::channel(128);
        Self { workflow, events }
    }

    pub fn router(self) -> Router {
        let state = Arc::new(self);
        Router::new()
            .route("/", get(Self::dashboard))
            .route("/health", get(Self::health))
            .route("/agents", get(Self::agents))
            .route("/workflows", get(Self::workflows))
            .route("/workflows/run", post(Self::run_workflow))
            .route("/events", get(Self::events))
            .with_state(state)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        info!(%addr, "dev inspector listening");
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    async fn dashboard() -> impl IntoResponse {
        Html(DASHBOARD)
    }

    async fn health() -> impl IntoResponse {
        "ok"
    }

    async fn agents(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let payload: Vec<AgentSummary> = state
            .workflow
            .agents()
            .map(|agent| AgentSummary {
                name: agent.name().to_string(),
                instructions: agent.instructions().to_string(),
                tools: agent.tool_names(),
            })
            .collect();
        Json(payload)
    }

    async fn workflows(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let flow = &state.workflow;
        Json(vec![WorkflowSummary {
            name: flow.name().to_string(),
            start: flow.start_agent().to_string(),
            outputs: flow
                .output_agents()
                .into_iter()
                .map(String::from)
                .collect(),
            edges: flow
                .edge_names()
                .into_iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        }])
    }

    async fn run_workflow(
        State(state): State<Arc<Self>>,
        Json(payload): Json<RunRequest>,
    ) -> Response {
        let mut output = None;
        let mut events = Box::pin(state.workflow.run_stream(payload.input));
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        let _ = state.events.send(line);
                    }
                    if let RunEvent::Output { data } = event {
                        output = Some(data);
                    }
                }
                Err(err) => {
                    let _ = state
                        .events
                        .send(json!({"kind": "error", "detail": err.to_string()}).to_string());
                    return (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": err.to_string()})),
                    )
                        .into_response();
                }
            }
        }
        match output {
            Some(data) => Json(json!({"output": data})).into_response(),
            None => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "run finished without producing output"})),
            )
                .into_response(),
        }
    }

    async fn events(
        State(state): State<Arc<Self>>,
    ) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
        let stream = BroadcastStream::new(state.events.subscribe()).map(|msg| {
            msg.map(|line| Event::default().data(line))
                .map_err(axum::Error::new)
        });
        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

const DASHBOARD: &str = r#"
<!doctype html>
<html>
<head>
    <meta charset="utf-8" />
    <title>docsflow inspector</title>
    <style>
        body { font-family: sans-serif; margin: 2rem; }
        .column { float: left; width: 45%; margin-right: 5%; }
        .panel { border: 1px solid #ccc; padding: 1rem; margin-bottom: 1rem; border-radius: 8px; }
        h2 { margin-top: 0; }
        #events { background: #111; color: #0f0; height: 240px; overflow: auto; font-family: monospace; padding: 1rem; }
        #ask { width: 70%; }
    </style>
</head>
<body>
    <h1>docsflow</h1>
    <div class="column">
        <div class="panel">
            <h2>Agents</h2>
            <ul id="agents"></ul>
        </div>
        <div class="panel">
            <h2>Workflow</h2>
            <pre id="workflow"></pre>
        </div>
        <div class="panel">
            <h2>Ask</h2>
            <input id="ask" placeholder="Ask a question about Microsoft services" />
            <button onclick="ask()">Run</button>
            <pre id="answer"></pre>
        </div>
    </div>
    <div class="column">
        <div class="panel">
            <h2>Events</h2>
            <div id="events"></div>
        </div>
    </div>
    <script>
        async function load() {
            const agents = await fetch('/agents').then(r => r.json());
            document.getElementById('agents').innerHTML =
                agents.map(a => `<li><b>${a.name}</b> (${a.tools.length} tools)</li>`).join('');
            const flows = await fetch('/workflows').then(r => r.json());
            document.getElementById('workflow').innerText =
                flows.map(f => `${f.name}: ${f.edges.map(e => e.join(' -> ')).join(', ')}`).join('\n');
        }
        async function ask() {
            const input = document.getElementById('ask').value;
            const resp = await fetch('/workflows/run', {
                method: 'POST',
                headers: {'Content-Type': 'application/json'},
                body: JSON.stringify({ input })
            }).then(r => r.json());
            document.getElementById('answer').innerText = resp.output ?? resp.error;
        }
        load();
        const evt = new EventSource('/events');
        evt.onmessage = (ev) => {
            const node = document.getElementById('events');
            node.innerText += ev.data + "\n";
            node.scrollTop = node.scrollHeight;
        };
    </script>
</body>
</html>
"#;
