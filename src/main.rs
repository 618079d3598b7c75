// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Coda - streaming tool-call agent for your terminal
//!
//! Runs one instruction to completion, printing progress frames as JSON
//! lines so frontends can render them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use coda::agent::{event_channel, AgentController, ContextManager};
use coda::config::Settings;
use coda::error::Result;
use coda::llm::message::Conversation;
use coda::llm::providers::create_provider;
use coda::tools::{ToolCache, ToolContext, ToolDispatcher, ToolRegistry};

const SYSTEM_PROMPT: &str = "You are Coda, a coding assistant that works on the user's \
files through tools. Read before you edit. Prefer edit_file for small changes and \
multi_edit when several files must change together. Keep responses short; let the \
tool results speak.";

#[derive(Debug, Parser)]
#[command(name = "coda", version, about = "Streaming tool-call coding agent")]
struct Cli {
    /// The instruction to carry out
    instruction: String,

    /// Provider backend: anthropic, openai, or ollama
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (defaults to the provider's configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// Path to a config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    if cli.verbose > 0 {
        if let Ok(directive) = "coda=debug".parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let provider_name = cli.provider.as_deref().unwrap_or("anthropic");
    let provider = create_provider(provider_name, &settings)?;
    let model = cli
        .model
        .clone()
        .or_else(|| settings.model_for(provider_name).map(String::from))
        .unwrap_or_else(|| "claude-sonnet-4-5".to_string());

    let working_directory = std::env::current_dir()?;
    let tool_context = ToolContext::new(
        working_directory.clone(),
        find_project_root(&working_directory),
        uuid::Uuid::new_v4(),
    );

    let registry = Arc::new(ToolRegistry::with_builtins());
    let cache = Arc::new(ToolCache::new());
    let dispatcher = ToolDispatcher::new(
        registry,
        cache,
        Duration::from_secs(settings.agent.tool_timeout_secs),
    );

    let mut controller = AgentController::new(
        provider,
        dispatcher,
        ContextManager::new(settings.context.clone()),
        settings.agent.clone(),
        settings.retry.clone(),
        model,
        SYSTEM_PROMPT.to_string(),
    );

    let (tx, mut rx) = event_channel();
    let printer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("error: failed to encode frame: {}", e),
            }
        }
    });

    let mut conversation = Conversation::with_system(SYSTEM_PROMPT);
    let outcome = controller
        .run(&mut conversation, &cli.instruction, &tool_context, &tx)
        .await;

    drop(tx);
    let _ = printer.await;

    let outcome = outcome?;
    if outcome.aborted {
        std::process::exit(1);
    }
    Ok(())
}

/// Walk up from the working directory looking for a VCS root
fn find_project_root(start: &std::path::Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}
