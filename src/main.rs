#[cfg(feature = "server")]
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use docsflow::{
    docs_agent, documentation_workflow, repl, rewrite_agent, summarize_agent, AppConfig,
    AzureResponsesClient, DocsflowError, McpToolset, Mode, Result,
};

const CONFIG_FILE: &str = "docsflow.toml";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsflow=info")),
        )
        .init();

    let config = if Path::new(CONFIG_FILE).exists() {
        AppConfig::from_env_or_file(CONFIG_FILE)
    } else {
        AppConfig::from_env()
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: AppConfig) -> Result<()> {
    let model = Arc::new(AzureResponsesClient::from_config(&config.inference)?);
    let toolset = McpToolset::streamable_http(
        "Microsoft Learn MCP",
        config.docs_search.url.clone(),
        config.docs_search.allowed_tools.clone(),
    );

    let rewrite = Arc::new(rewrite_agent(Arc::clone(&model)));
    let docs = Arc::new(docs_agent(Arc::clone(&model), &toolset));
    let summarize = Arc::new(summarize_agent(Arc::clone(&model)));
    let workflow = Arc::new(documentation_workflow(rewrite, docs, summarize)?);

    match config.mode {
        Mode::Cli => {
            println!("Starting in CLI mode...");
            println!("Microsoft Docs Agent Workflow. Ask a question about Microsoft services.");
            println!("Type 'exit' to quit.\n");
            repl::run(&workflow, &toolset).await
        }
        #[cfg(feature = "server")]
        Mode::DevUi => {
            println!("Starting in Dev UI mode...");
            println!(
                "Microsoft Docs Agent Workflow. Inspector at http://{}:{}/",
                config.server.host, config.server.port
            );
            toolset.connect().await?;
            let addr = server_addr(&config)?;
            let outcome = docsflow::DevServer::new(Arc::clone(&workflow)).serve(addr).await;
            close_toolset(&toolset).await;
            outcome
        }
        #[cfg(feature = "server")]
        Mode::HostedAgent => {
            println!("Starting in Hosted Agent mode...");
            toolset.connect().await?;
            let addr = server_addr(&config)?;
            let outcome = docsflow::HostedServer::new(workflow.as_agent()).serve(addr).await;
            close_toolset(&toolset).await;
            outcome
        }
        #[cfg(not(feature = "server"))]
        Mode::DevUi | Mode::HostedAgent => Err(DocsflowError::Configuration(
            "this build does not include the `server` feature; set MODE=cli".into(),
        )),
    }
}

#[cfg(feature = "server")]
fn server_addr(config: &AppConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|_| {
            DocsflowError::Configuration(format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            ))
        })
}

#[cfg(feature = "server")]
async fn close_toolset(toolset: &McpToolset<docsflow::HttpTransport>) {
    if let Err(err) = toolset.close().await {
        tracing::warn!(toolset = %toolset.name(), %err, "failed to close toolset");
    }
}
