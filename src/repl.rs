//! Interactive read loop over stdin.

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::mcp::{McpToolset, McpTransport};
use crate::workflow::{RunEvent, Workflow};

/// What one line of input asks the loop to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplAction {
    /// Empty input: no agent is invoked, re-prompt immediately.
    Prompt,
    /// `exit` / `quit` (case-insensitive): release resources and stop.
    Quit,
    Query(String),
}

impl ReplAction {
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ReplAction::Prompt;
        }
        if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
            return ReplAction::Quit;
        }
        ReplAction::Query(trimmed.to_string())
    }
}

/// Run the loop with the toolset held open for its whole duration. The
/// connection is acquired before the first turn and released on every exit
/// path, including read failures.
pub async fn run<M: LanguageModel, T: McpTransport + 'static>(
    workflow: &Workflow<M>,
    toolset: &McpToolset<T>,
) -> Result<()> {
    toolset.connect().await?;
    let outcome = read_loop(workflow).await;
    if let Err(err) = toolset.close().await {
        warn!(toolset = %toolset.name(), %err, "failed to close toolset");
    }
    outcome
}

async fn read_loop<M: LanguageModel>(workflow: &Workflow<M>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            // stdin closed
            break;
        };
        match ReplAction::from_line(&line) {
            ReplAction::Prompt => continue,
            ReplAction::Quit => {
                println!("Goodbye!");
                break;
            }
            ReplAction::Query(query) => run_turn(workflow, query).await,
        }
    }
    Ok(())
}

/// One fully serialized turn. Failures abort the turn, never the session.
async fn run_turn<M: LanguageModel>(workflow: &Workflow<M>, query: String) {
    let mut events = Box::pin(workflow.run_stream(query));
    while let Some(event) = events.next().await {
        match event {
            Ok(RunEvent::Output { data }) => println!("Agent: {data}\n"),
            Ok(RunEvent::AgentInvoked { .. }) | Ok(RunEvent::AgentCompleted { .. }) => {}
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_reprompts_without_invoking_agents() {
        assert_eq!(ReplAction::from_line(""), ReplAction::Prompt);
        assert_eq!(ReplAction::from_line("   "), ReplAction::Prompt);
    }

    #[test]
    fn exit_and_quit_are_case_insensitive() {
        assert_eq!(ReplAction::from_line("exit"), ReplAction::Quit);
        assert_eq!(ReplAction::from_line("QUIT"), ReplAction::Quit);
        assert_eq!(ReplAction::from_line("  Exit  "), ReplAction::Quit);
    }

    #[test]
    fn anything_else_is_a_query() {
        assert_eq!(
            ReplAction::from_line("wut is Azure Blob torage"),
            ReplAction::Query("wut is Azure Blob torage".into())
        );
    }
}
