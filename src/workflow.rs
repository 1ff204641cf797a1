//! Directed chains of agents with one start node and one observable output.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::debug;

use crate::agent::Agent;
use crate::error::{DocsflowError, Result};
use crate::llm::LanguageModel;

/// Event emitted during a single workflow execution. Only `Output` is meant
/// for external consumption; runners match exhaustively and pass the rest
/// through their event feeds or drop them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    AgentInvoked { agent: String },
    AgentCompleted { agent: String },
    Output { data: String },
}

/// Options callers may attach to a run. The execution entry point accepts
/// the full set and forwards only what it supports; unsupported options are
/// discarded without changing the streaming contract.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub checkpoint_storage: Option<String>,
}

/// A fixed directed chain of agents. Built once at startup; one instance
/// serves all subsequent runs.
pub struct Workflow<M: LanguageModel> {
    name: String,
    nodes: Vec<Arc<Agent<M>>>,
    edges: Vec<(usize, usize)>,
    start: usize,
    outputs: HashSet<usize>,
}

impl<M: LanguageModel> Workflow<M> {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder<M> {
        WorkflowBuilder {
            name: name.into(),
            nodes: Vec::new(),
            index_by_name: HashMap::new(),
            edges: Vec::new(),
            outputs: HashSet::new(),
            start: None,
        }
    }

    /// Straight-line builder: first agent is the start node, consecutive
    /// edges link the sequence, the last agent is the sole output node.
    /// A single-agent chain is legal (start == output).
    pub fn chain(name: impl Into<String>, agents: Vec<Arc<Agent<M>>>) -> Result<Self> {
        if agents.is_empty() {
            return Err(DocsflowError::Workflow(
                "a workflow needs at least one agent".into(),
            ));
        }
        let mut builder = Self::builder(name);
        for pair in agents.windows(2) {
            builder.add_edge(&pair[0], &pair[1]);
        }
        builder.add_agent(agents.last().unwrap().clone(), true);
        builder.set_start(&agents[0]);
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agents(&self) -> impl Iterator<Item = &Arc<Agent<M>>> {
        self.nodes.iter()
    }

    pub fn start_agent(&self) -> &str {
        self.nodes[self.start].name()
    }

    pub fn output_agents(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| self.outputs.contains(index))
            .map(|(_, node)| node.name())
            .collect()
    }

    pub fn edge_names(&self) -> Vec<(&str, &str)> {
        self.edges
            .iter()
            .map(|(from, to)| (self.nodes[*from].name(), self.nodes[*to].name()))
            .collect()
    }

    fn successor(&self, index: usize) -> Option<usize> {
        self.edges
            .iter()
            .find(|(from, _)| *from == index)
            .map(|(_, to)| *to)
    }

    /// Walk the chain lazily, yielding events as each node finishes. A node
    /// failure yields the error and ends the stream; the sequence is finite
    /// and not restartable.
    pub fn run_stream(
        &self,
        input: impl Into<String>,
    ) -> impl Stream<Item = Result<RunEvent>> + '_ {
        let walk = Walk {
            flow: self,
            phase: Phase::Invoke {
                index: self.start,
                input: input.into(),
            },
            queued: VecDeque::new(),
        };
        stream::unfold(walk, |mut walk| async move {
            loop {
                if let Some(event) = walk.queued.pop_front() {
                    return Some((event, walk));
                }
                match std::mem::replace(&mut walk.phase, Phase::Done) {
                    Phase::Invoke { index, input } => {
                        let agent = walk.flow.nodes[index].name().to_string();
                        walk.phase = Phase::Run { index, input };
                        return Some((Ok(RunEvent::AgentInvoked { agent }), walk));
                    }
                    Phase::Run { index, input } => {
                        let flow = walk.flow;
                        let node = &flow.nodes[index];
                        match node.respond(input).await {
                            Ok(output) => {
                                walk.queued.push_back(Ok(RunEvent::AgentCompleted {
                                    agent: node.name().to_string(),
                                }));
                                if walk.flow.outputs.contains(&index) {
                                    walk.queued.push_back(Ok(RunEvent::Output {
                                        data: output.clone(),
                                    }));
                                }
                                walk.phase = match walk.flow.successor(index) {
                                    Some(next) => Phase::Invoke {
                                        index: next,
                                        input: output,
                                    },
                                    None => Phase::Done,
                                };
                            }
                            Err(err) => {
                                walk.phase = Phase::Done;
                                return Some((Err(err), walk));
                            }
                        }
                    }
                    Phase::Done => return None,
                }
            }
        })
    }

    /// Execution entry point for callers that carry extra options. Accepts
    /// the superset and forwards only the supported subset; the streaming
    /// contract is unchanged.
    pub fn run_stream_with_options(
        &self,
        input: impl Into<String>,
        options: RunOptions,
    ) -> impl Stream<Item = Result<RunEvent>> + '_ {
        if let Some(storage) = options.checkpoint_storage {
            debug!(workflow = %self.name, %storage, "checkpoint storage not supported, discarding");
        }
        self.run_stream(input)
    }

    /// Wrap the workflow as a single agent-shaped entity: one input in, the
    /// output node's data out.
    pub fn as_agent(self: &Arc<Self>) -> WorkflowAgent<M> {
        WorkflowAgent {
            flow: Arc::clone(self),
        }
    }
}

struct Walk<'a, M: LanguageModel> {
    flow: &'a Workflow<M>,
    phase: Phase,
    queued: VecDeque<Result<RunEvent>>,
}

enum Phase {
    Invoke { index: usize, input: String },
    Run { index: usize, input: String },
    Done,
}

/// Incrementally assembled workflow. Nodes are identified by agent name,
/// which must be unique within the workflow.
pub struct WorkflowBuilder<M: LanguageModel> {
    name: String,
    nodes: Vec<Arc<Agent<M>>>,
    index_by_name: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    outputs: HashSet<usize>,
    start: Option<usize>,
}

impl<M: LanguageModel> WorkflowBuilder<M> {
    /// Add an agent, optionally marking its output as externally observable.
    /// Adding a known name again only updates the output flag.
    pub fn add_agent(&mut self, agent: Arc<Agent<M>>, output_response: bool) -> &mut Self {
        let index = self.intern(agent);
        if output_response {
            self.outputs.insert(index);
        }
        self
    }

    pub fn add_edge(&mut self, from: &Arc<Agent<M>>, to: &Arc<Agent<M>>) -> &mut Self {
        let from = self.intern(from.clone());
        let to = self.intern(to.clone());
        self.edges.push((from, to));
        self
    }

    pub fn set_start(&mut self, agent: &Arc<Agent<M>>) -> &mut Self {
        let index = self.intern(agent.clone());
        self.start = Some(index);
        self
    }

    fn intern(&mut self, agent: Arc<Agent<M>>) -> usize {
        if let Some(index) = self.index_by_name.get(agent.name()) {
            return *index;
        }
        let index = self.nodes.len();
        self.index_by_name.insert(agent.name().to_string(), index);
        self.nodes.push(agent);
        index
    }

    /// Validate the wiring and freeze the workflow. The edge set must form a
    /// simple path from the start node through every node.
    pub fn build(self) -> Result<Workflow<M>> {
        let start = self
            .start
            .ok_or_else(|| DocsflowError::Workflow("no start agent designated".into()))?;

        let mut outgoing = vec![0usize; self.nodes.len()];
        let mut incoming = vec![0usize; self.nodes.len()];
        for (from, to) in &self.edges {
            outgoing[*from] += 1;
            incoming[*to] += 1;
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if outgoing[index] > 1 || incoming[index] > 1 {
                return Err(DocsflowError::Workflow(format!(
                    "agent `{}` is wired into a branch; only simple chains are supported",
                    node.name()
                )));
            }
        }
        if incoming[start] > 0 {
            return Err(DocsflowError::Workflow(format!(
                "start agent `{}` has incoming edges",
                self.nodes[start].name()
            )));
        }

        let flow = Workflow {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
            start,
            outputs: self.outputs,
        };

        let mut visited = HashSet::new();
        let mut cursor = Some(flow.start);
        while let Some(index) = cursor {
            if !visited.insert(index) {
                return Err(DocsflowError::Workflow(format!(
                    "cycle detected at agent `{}`",
                    flow.nodes[index].name()
                )));
            }
            cursor = flow.successor(index);
        }
        if visited.len() != flow.nodes.len() {
            return Err(DocsflowError::Workflow(
                "not every agent is reachable from the start agent".into(),
            ));
        }
        if flow.outputs.is_empty() {
            return Err(DocsflowError::Workflow(
                "no agent is marked as output-producing".into(),
            ));
        }

        Ok(flow)
    }
}

/// A workflow presented as a single agent: used by the hosted surface.
pub struct WorkflowAgent<M: LanguageModel> {
    flow: Arc<Workflow<M>>,
}

impl<M: LanguageModel> WorkflowAgent<M> {
    pub fn name(&self) -> &str {
        self.flow.name()
    }

    /// Run the full chain and return the output node's data.
    pub async fn respond(&self, input: impl Into<String>) -> Result<String> {
        use futures::StreamExt;

        let mut output = None;
        let mut events = Box::pin(self.flow.run_stream(input));
        while let Some(event) = events.next().await {
            match event? {
                RunEvent::Output { data } => output = Some(data),
                RunEvent::AgentInvoked { .. } | RunEvent::AgentCompleted { .. } => {}
            }
        }
        output.ok_or_else(|| {
            DocsflowError::Workflow("run finished without producing output".into())
        })
    }
}
