// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod console;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use console::ConsoleApprover;
use wren_config::Config;
use wren_core::{AgentEvent, AgentLoop, Dispatcher, MessageQueue, SubAgentTool, ToolCallStatus, ToolExecutor};
use wren_mcp_client::McpManager;
use wren_model::Message;
use wren_tools::{builtin::register_builtins, ApprovalGate, Disposition, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = wren_config::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.permissions.mode = mode;
    }

    match &cli.command {
        Commands::Run {
            prompt,
            then,
            max_rounds,
            no_mcp,
        } => {
            if let Some(n) = max_rounds {
                config.agent.max_tool_rounds = *n;
            }
            if *no_mcp {
                config.mcp.servers.clear();
            }
            run(&cli, config, prompt.join(" "), then.clone()).await
        }
        Commands::Servers { json } => servers(&config, *json).await,
        Commands::Check { tool, args } => check(&config, tool, args).await,
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            token.cancel();
        }
    });
}

// ── run ──────────────────────────────────────────────────────────────────────

async fn run(cli: &Cli, config: Config, prompt: String, then: Vec<String>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mcp = Arc::new(McpManager::new(&config.mcp));
    if let Err(e) = mcp.connect_all(&cancel).await {
        let _ = mcp.shutdown().await;
        return Err(e).context("starting tool servers");
    }
    for state in mcp.states() {
        debug!(server = %state.name, status = %state.status, tools = state.tools.len(), "tool server");
    }

    let model = wren_model::from_config(&config.model)?;
    let gate = Arc::new(ApprovalGate::from_config(&config.permissions));

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    let sub_agent = Arc::new(SubAgentTool::new(model.clone(), &config.agent));
    registry.register_arc(sub_agent.clone());

    let executor: Arc<dyn ToolExecutor> = Arc::new(
        Dispatcher::new(gate)
            .with_provider(Arc::new(registry))
            .with_provider(mcp.clone()),
    );
    sub_agent.bind(&executor);

    let queue = MessageQueue::new();
    for msg in then {
        queue.push(msg);
    }
    let mut agent = AgentLoop::new(model, executor, config.agent.clone())
        .with_queue(queue)
        .with_cancel(cancel);
    if is_stdin_tty() {
        agent = agent.with_approver(Arc::new(ConsoleApprover::stdin()));
    } else {
        debug!("stdin is not a terminal; calls that need approval are denied");
    }

    let (mut events, handle) = Arc::new(agent).spawn(vec![Message::user(prompt)]);
    let mut failure = None;
    while let Some(ev) = events.next().await {
        if let Some(err) = print_event(cli, &ev) {
            failure = Some(err);
        }
    }
    let conversation = handle.await.context("agent task failed")?;
    debug!(messages = conversation.len(), "run finished");

    if let Err(e) = mcp.shutdown().await {
        warn!(error = %e, "tool server shutdown interrupted");
    }
    match failure {
        Some(err) => bail!("{err}"),
        None => Ok(()),
    }
}

/// Render one event.  Returns the message of a terminal error.
fn print_event(cli: &Cli, ev: &AgentEvent) -> Option<String> {
    let mut out = io::stdout();
    match ev {
        AgentEvent::Token(t) => {
            let _ = out.write_all(t.as_bytes());
            let _ = out.flush();
        }
        AgentEvent::Phase(p) => eprintln!("[{p}]"),
        AgentEvent::ToolCallStart { name, .. } => eprintln!("→ {name}"),
        AgentEvent::ToolCallArgsDelta { .. } => {}
        AgentEvent::ToolCallEnd {
            name,
            status,
            output,
            disposition,
            ..
        } => {
            match status {
                ToolCallStatus::Ok => eprintln!("✓ {name} ({disposition})"),
                ToolCallStatus::Error => eprintln!("✗ {name}: {}", first_line(output)),
                ToolCallStatus::Denied { reason } => eprintln!("⊘ {name} denied: {reason}"),
            }
            if *disposition == Disposition::AllowedAlways {
                let path = cli.persist_path();
                match wren_config::persist_allowed_tool(&path, name) {
                    Ok(()) => info!(tool_name = %name, path = %path.display(), "approval persisted"),
                    Err(e) => warn!(tool_name = %name, error = %e, "could not persist approval"),
                }
            }
        }
        AgentEvent::QueuedMessage(m) => eprintln!("\n> {m}"),
        AgentEvent::AutoPlanSuggest { tool_calls } => {
            eprintln!("[{tool_calls} tool calls so far; consider writing a plan]")
        }
        AgentEvent::Done => println!(),
        AgentEvent::Error(e) => {
            eprintln!("error: {e}");
            return Some(e.clone());
        }
    }
    None
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

// ── servers ──────────────────────────────────────────────────────────────────

async fn servers(config: &Config, as_json: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mcp = McpManager::new(&config.mcp);
    let connected = mcp.connect_all(&cancel).await;
    let states = mcp.states();
    let closed = mcp.shutdown().await;
    connected.context("connecting to tool servers")?;
    closed.context("closing tool servers")?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }
    if states.is_empty() {
        println!("No tool servers configured.");
        return Ok(());
    }

    let name_w = states.iter().map(|s| s.name.len()).max().unwrap_or(4).max(4);
    println!("{:<name_w$}  {:<12}  {:>5}  DETAIL", "NAME", "STATUS", "TOOLS");
    for s in &states {
        let detail = match &s.last_error {
            Some(e) => e.clone(),
            None => s
                .tools
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        };
        println!(
            "{:<name_w$}  {:<12}  {:>5}  {}",
            s.name,
            s.status.to_string(),
            s.tools.len(),
            detail
        );
    }
    Ok(())
}

// ── check ────────────────────────────────────────────────────────────────────

async fn check(config: &Config, tool: &str, args: &str) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).with_context(|| format!("arguments are not valid JSON: {args}"))?;
    if !args.is_object() {
        bail!("arguments must be a JSON object");
    }
    let gate = ApprovalGate::from_config(&config.permissions);
    match gate.check(tool, &args).await {
        Some(verdict) => println!("{}", serde_json::to_string_pretty(&verdict)?),
        None => println!(
            "{tool} ({:?}) runs without a prompt in {} mode",
            gate.tier_of(tool),
            gate.mode()
        ),
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
