mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use zonequest_events::QuestEvent;
use zonequest_host::layout::GLOBAL_SCOPE;
use zonequest_host::{
    HostContext, HostHandles, ProcessCompiler, QuestConfig, QuestHost, ReloadSupervisor,
    RuntimeState, ScopeKind, ScriptMessage, compute_build_key, error_chain,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enables debug output; repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    /// Also log to the data directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an example config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Print the build key of a scope
    Hash { scope: String },
    /// Build and load a scope once and print the outcome
    Build { scope: String },
    /// Run the runtime for a zone, dispatching JSON events read from stdin
    Run {
        #[arg(short, long)]
        zone: String,
    },
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    cli.config
        .clone()
        .or_else(QuestConfig::default_path)
        .context("Failed to find a config directory; pass --config")
}

fn load_config(cli: &Cli) -> Result<QuestConfig> {
    let path = config_path(cli)?;
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(QuestConfig::default());
    }
    QuestConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

fn init(cli: &Cli, force: bool) -> Result<()> {
    let path = config_path(cli)?;
    if path.exists() && !force {
        bail!("{} already exists; use --force to overwrite", path.display());
    }

    QuestConfig::default().save(&path)?;
    eprintln!("Config file created at: {}", path.display());
    eprintln!("Set workdir and compiler for your zone server, then run questhost again.");
    Ok(())
}

fn hash(config: &QuestConfig, scope: &str) -> Result<()> {
    let layout = config.layout();
    let key = compute_build_key(&layout, scope);
    if key.is_empty() {
        bail!("No scripts for {} in {}", scope, layout.scope_dir(scope).display());
    }
    println!("{}", key);
    Ok(())
}

fn build(config: QuestConfig, scope: String) -> Result<()> {
    let kind = if scope == GLOBAL_SCOPE {
        ScopeKind::Global
    } else {
        QuestConfig::validate_zone(&scope)?;
        ScopeKind::Zone
    };

    let compiler = ProcessCompiler::new(
        config.compiler_path(),
        config.failure_marker.clone(),
        config.artifact_extension.clone(),
    );
    let state = Arc::new(RuntimeState::new(scope.as_str()));
    let supervisor = ReloadSupervisor::from_config(state.clone(), &config, Arc::new(compiler))?;

    if let Err(e) = supervisor.ensure_common_library() {
        warn!("Common library build failed: {}", error_chain(&e));
    }

    let outcome = supervisor.reload(kind)?;
    let status = state.scope_status(kind);
    match status.loaded_key {
        Some(key) => println!("{} {}", outcome, config.layout().artifact_path(&key).display()),
        None => println!("{}", outcome),
    }

    state.unload_all();
    Ok(())
}

async fn run(config: QuestConfig, zone: String) -> Result<()> {
    let mut host = QuestHost::new(config, &zone).context("Failed to create quest runtime")?;

    let (tx, mut messages) = tokio::sync::mpsc::unbounded_channel();
    host.attach_host(HostContext::new(zone.as_str(), HostHandles::default()).with_messages(tx));
    host.start().await?;
    host.enable_reload_signal();

    for status in host.status() {
        match &status.loaded_key {
            Some(key) => info!("{} scope {}: {}", status.kind, status.scope, key),
            None => info!("{} scope {}: not loaded", status.kind, status.scope),
        }
    }
    info!("Reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            Some(message) = messages.recv() => print_message(&message),
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                dispatch_line(&host, &line);
                flush_messages(&mut messages);
            }
        }
    }

    host.shutdown().await;
    flush_messages(&mut messages);
    Ok(())
}

fn dispatch_line(host: &QuestHost, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    match serde_json::from_str::<QuestEvent>(line) {
        Ok(event) => host.dispatch(&event),
        Err(e) => warn!("Skipping malformed event: {}", e),
    }
}

fn flush_messages(messages: &mut UnboundedReceiver<ScriptMessage>) {
    while let Ok(message) = messages.try_recv() {
        print_message(&message);
    }
}

fn print_message(message: &ScriptMessage) {
    println!("[{}] {} {}", message.scope, message.level, message.message);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging("questhost", cli.log_file, cli.debug)
        .context("Failed to initialize logging")?;

    match &cli.command {
        Command::Init { force } => init(&cli, *force),
        Command::Hash { scope } => hash(&load_config(&cli)?, scope),
        Command::Build { scope } => {
            let config = load_config(&cli)?;
            let scope = scope.clone();
            tokio::task::spawn_blocking(move || build(config, scope)).await?
        }
        Command::Run { zone } => run(load_config(&cli)?, zone.clone()).await,
    }
}
