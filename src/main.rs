//! `reactbox`: run one agent task inside a conversation's sandbox
//!
//! ```text
//! reactbox "write fizzbuzz in /workspace/fizz.py and run it"
//! reactbox --conversation demo --environment python3.11 "run the tests"
//! ```

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures_util::{pin_mut, StreamExt};
use tracing::{info, warn};

use reactbox::agent::{AgentEvent, AgentExecutor};
use reactbox::config::Settings;
use reactbox::llm::OllamaBackend;
use reactbox::sandbox::{EnvironmentConfig, SandboxRegistry};
use reactbox::tools::registry_for;

/// Characters of tool output echoed to the terminal
const MAX_OBSERVATION_CHARS: usize = 2000;

#[derive(Parser)]
#[command(name = "reactbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a ReAct coding agent inside a sandboxed workspace", long_about = None)]
struct Cli {
    /// Task for the agent
    task: String,

    /// Conversation id; runs with the same id share a workspace
    #[arg(short, long, default_value = "cli")]
    conversation: String,

    /// Environment type (python3.11, python3.13, node20, cpp; `local` runs unisolated on the host)
    #[arg(short, long)]
    environment: Option<String>,

    /// Model name (overrides REACTBOX_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum model calls for this run
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Allow network access inside container environments
    #[arg(long)]
    network: bool,

    /// Leave the environment running when the task ends
    #[arg(long)]
    keep: bool,

    /// Print events as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

fn print_event(event: &AgentEvent, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        writeln!(stdout, "{}", serde_json::to_string(event)?)?;
        return Ok(());
    }

    match event {
        AgentEvent::Chunk { content } => {
            write!(stdout, "{}", content)?;
            stdout.flush()?;
        }
        AgentEvent::ActionStreaming { .. } => {}
        AgentEvent::Action { tool, input, step } => {
            writeln!(stdout, "\n[step {}] {} {}", step, tool, input)?;
        }
        AgentEvent::Observation {
            output,
            success,
            error,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            writeln!(stdout, "[{}]", status)?;
            if !output.is_empty() {
                writeln!(stdout, "{}", truncate(output, MAX_OBSERVATION_CHARS))?;
            }
            if let Some(error) = error {
                writeln!(stdout, "Error: {}", error)?;
            }
        }
        AgentEvent::FinalAnswer { content, completed } => {
            // a completed answer was already streamed as chunks
            if *completed {
                writeln!(stdout)?;
            } else {
                writeln!(stdout, "\n{}", content)?;
            }
        }
        AgentEvent::Error { content } => eprintln!("\nerror: {}", content),
        AgentEvent::Cancelled { content } => eprintln!("\n{}", content),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(environment) = cli.environment {
        settings.environment_type = environment;
    }
    if let Some(model) = cli.model {
        settings.agent.model = model;
    }
    if let Some(max_iterations) = cli.max_iterations {
        settings.agent.max_iterations = max_iterations;
    }

    if cli.json_logs {
        reactbox::tracing::init_tracing_json()
    } else {
        reactbox::tracing::init_tracing("reactbox", settings.otlp_endpoint.as_deref())
    }
    .map_err(|e| anyhow!(e))
    .context("failed to initialize tracing")?;

    let registry = SandboxRegistry::new(settings.registry.clone());
    let environment_config = EnvironmentConfig {
        network: cli.network,
        ..EnvironmentConfig::default()
    };
    let sandbox = registry
        .create_or_reuse(&cli.conversation, &settings.environment_type, &environment_config)
        .await
        .with_context(|| format!("failed to provision a '{}' environment", settings.environment_type))?;
    info!(
        sandbox = sandbox.id(),
        workspace = %sandbox.workspace_path().display(),
        "Sandbox ready"
    );

    let tools = registry_for(
        sandbox.clone(),
        settings.enabled_tools.as_deref(),
        settings.registry.default_command_timeout,
    )?;
    let backend = Arc::new(OllamaBackend::new(settings.ollama_url.clone()));
    let executor = AgentExecutor::new(backend, tools, settings.agent.clone());

    let ticket = registry.register_run(&cli.conversation);
    let interrupt = ticket.token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let events = executor.run(&cli.task, Vec::new(), ticket.token.clone());
    pin_mut!(events);

    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, AgentEvent::Error { .. });
        print_event(&event, cli.json)?;
    }

    registry.finish_run(&cli.conversation, ticket.run_id);
    if !cli.keep {
        registry.destroy(&cli.conversation).await;
    }
    reactbox::tracing::shutdown_tracing();

    if failed {
        anyhow::bail!("agent run failed");
    }
    Ok(())
}
