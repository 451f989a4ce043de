// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use tern_agents::{register_orchestration_tools, AgentManager};
use tern_config::{metrics_path, resolve_api_key, Config};
use tern_core::{Agent, AgentError, AgentEvent};
use tern_exec::ParallelExecutor;
use tern_metrics::DiffTracker;
use tern_model::OpenAICompatProvider;
use tern_patch::PatchEngine;
use tern_store::JsonlStore;
use tern_tools::{
    ApplyEditTool, GrepTool, ListDirTool, ParallelCommandsTool, ReadFileTool, RunCommandTool,
    ToolRegistry, WriteFileTool,
};

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("tern: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tern=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = tern_config::load(cli.config.as_deref())?;

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(0);
            }
            Commands::DiffReport { window } => {
                let tracker = DiffTracker::new(metrics_path());
                let report = tracker.report(*window).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }
        }
    }

    if cli.web {
        anyhow::bail!(
            "the web front-end is a separate package; install it and point it \
             at this binary, or run with --terminal"
        );
    }

    run_terminal(&config).await
}

/// Build the full stack: provider, patch engine, tool registries, the
/// orchestrator, and the primary agent.
fn build_primary_agent(config: &Config) -> anyhow::Result<(Agent, Arc<AgentManager>)> {
    let api_key = resolve_api_key(config, "openrouter");
    if api_key.is_none() {
        anyhow::bail!(
            "no chat API key found; set OPENROUTER_API_KEY or add one to the \
             configuration"
        );
    }
    let provider = Arc::new(
        OpenAICompatProvider::new(
            "openrouter",
            config.agent.model.clone(),
            api_key,
            &config.agent.base_url,
        )
        .with_attribution("https://github.com/tern-agent/tern", "tern"),
    );

    let root: PathBuf = match &config.tools.workspace_root {
        Some(r) => PathBuf::from(r),
        None => std::env::current_dir()?,
    };

    let tracker = Arc::new(DiffTracker::new(metrics_path()));
    let morph_key = resolve_api_key(config, "morph");
    let engine = Arc::new(PatchEngine::new(
        &root,
        config.patch.clone(),
        morph_key,
        tracker,
    ));

    let store = Arc::new(JsonlStore::new(
        tern_config::data_dir().join("sessions.jsonl"),
    ));

    let executor = Arc::new(ParallelExecutor::new());
    let leaf_tools = {
        let root = root.clone();
        let engine = Arc::clone(&engine);
        let executor = Arc::clone(&executor);
        let timeout_secs = config.tools.timeout_secs;
        move || {
            let reg = ToolRegistry::new();
            reg.register(ReadFileTool { root: root.clone() });
            reg.register(WriteFileTool { root: root.clone() });
            reg.register(ListDirTool { root: root.clone() });
            reg.register(GrepTool { root: root.clone() });
            reg.register(RunCommandTool { root: root.clone(), timeout_secs });
            reg.register(ParallelCommandsTool {
                root: root.clone(),
                executor: Arc::clone(&executor),
            });
            reg.register(ApplyEditTool { engine: Arc::clone(&engine) });
            Arc::new(reg)
        }
    };

    let manager = Arc::new(AgentManager::new(
        config.orchestrator.clone(),
        config.agent.clone(),
        provider.clone() as Arc<dyn tern_model::ModelProvider>,
        store.clone() as Arc<dyn tern_store::SessionStore>,
        Arc::new(leaf_tools.clone()),
    ));

    // The primary agent gets the leaf tools plus the orchestration surface;
    // sub-agents get leaf tools only, which bounds delegation depth.
    let primary_tools = leaf_tools();
    register_orchestration_tools(&primary_tools, Arc::clone(&manager));

    let agent = Agent::new(
        config.agent.name.clone(),
        Arc::new(config.agent.clone()),
        provider,
        primary_tools,
        store,
    );
    Ok((agent, manager))
}

/// Line-driven terminal front-end: one user turn per stdin line, streamed
/// output on stdout.  Ctrl-C cancels the in-flight run and exits 130.
async fn run_terminal(config: &Config) -> anyhow::Result<i32> {
    let (mut agent, manager) = build_primary_agent(config)?;
    agent.init_store_session("primary", None).await;

    let root_cancel = CancellationToken::new();
    {
        let cancel = root_cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    print_prompt()?;

    loop {
        let line = tokio::select! {
            _ = root_cancel.cancelled() => break,
            l = lines.next_line() => l?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            print_prompt()?;
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::TextDelta(delta) => {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                    }
                    AgentEvent::ToolCallStarted { name, summary, .. } => {
                        eprintln!("[tool] {name}: {summary}");
                    }
                    AgentEvent::ToolCallFinished { name, is_error, .. } if is_error => {
                        eprintln!("[tool] {name} failed");
                    }
                    AgentEvent::TurnComplete => {
                        println!();
                        break;
                    }
                    _ => {}
                }
            }
        });

        let result = agent.execute_stream(input, tx, &root_cancel).await;
        let _ = printer.await;
        match result {
            Ok(_) => {}
            Err(AgentError::Cancelled) => break,
            Err(e) => eprintln!("error: {e}"),
        }
        print_prompt()?;
    }

    manager.terminate_all().await;
    if root_cancel.is_cancelled() {
        return Ok(EXIT_CANCELLED);
    }
    Ok(0)
}

fn print_prompt() -> std::io::Result<()> {
    print!("> ");
    std::io::stdout().flush()
}
