use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use ba_core::config::{Config, ProviderConfig};
use ba_core::{prompt, ChatEvent, Message, RequestContext};
use ba_server::AppState;
use futures::StreamExt;

use super::{load_config, seed_store};
use crate::output::print_json_line;

pub struct ChatArgs {
    pub message: String,
    pub project: String,
    pub project_name: Option<String>,
    pub thread: String,
    pub docs: Vec<PathBuf>,
}

pub fn run(config_path: &Path, args: ChatArgs, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_turn(config, args, json))
}

async fn run_turn(mut config: Config, args: ChatArgs, json: bool) -> Result<()> {
    let store = seed_store(&args.project, &args.docs)?;

    // The CLI backend calls tools back over HTTP, so a one-off turn still
    // needs the callback route. Serve it on an ephemeral local port.
    let listener = if matches!(config.provider, ProviderConfig::ClaudeCli { .. }) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        config.server.public_url = Some(format!("http://{}", listener.local_addr()?));
        Some(listener)
    } else {
        None
    };

    let state = AppState::from_config(&config, store)?;
    let callback_server = listener.map(|l| ba_server::spawn_on(state.clone(), l));

    let ctx = RequestContext::new(state.store.clone(), args.project, args.thread);
    let system_prompt = prompt::system_prompt(args.project_name.as_deref());
    let mut events = state
        .orchestrator
        .run_turn(ctx, vec![Message::user(args.message)], system_prompt);

    let mut outcome = Ok(());
    while let Some(event) = events.next().await {
        if json {
            print_json_line(&event)?;
            if let ChatEvent::Error { message } = &event {
                outcome = Err(anyhow::anyhow!("{message}"));
            }
            continue;
        }
        if let Err(e) = render(&event) {
            outcome = Err(e);
        }
    }
    drop(events);

    if let Some(handle) = callback_server {
        handle.abort();
    }
    if let Some(pool) = &state.pool {
        pool.stop().await;
    }
    outcome
}

fn render(event: &ChatEvent) -> Result<()> {
    match event {
        ChatEvent::TextDelta { text } => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        ChatEvent::ToolExecuting { status } => eprintln!("\n[{status}]"),
        ChatEvent::ArtifactCreated(a) => {
            eprintln!("[saved {} \"{}\" ({})]", a.artifact_type.as_str(), a.title, a.id)
        }
        ChatEvent::MessageComplete {
            usage,
            documents_used,
            ..
        } => {
            println!();
            println!("---");
            println!(
                "tokens: {} in / {} out",
                usage.input_tokens, usage.output_tokens
            );
            if !documents_used.is_empty() {
                let names: Vec<_> = documents_used.iter().map(|d| d.filename.as_str()).collect();
                println!("documents: {}", names.join(", "));
            }
        }
        ChatEvent::Error { message } => bail!("{message}"),
    }
    Ok(())
}
