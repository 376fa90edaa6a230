//! modlink - licensed client agent.
//!
//! The first process to start becomes the primary and runs the agent. Any
//! later process hands its activation URL to the primary and exits.
//!
//! UI messages are written to stdout as JSON lines; UI commands are read
//! from stdin the same way.

use anyhow::Context;
use clap::Parser;
use modlink_agent::ui::{self, UiReceiver};
use modlink_agent::{Agent, AgentConfig, UiCommand, UiMessage, logging};
use modlink_instance::{Acquisition, InstanceArbiter};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "modlink", about = "modlink licensed client agent")]
struct Args {
    /// Config file (default: <data_dir>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// modlink://activate URL handed over by the OS
    url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    // No subscriber exists yet, so these two go straight to stderr.
    let (config, paths) = match AgentConfig::load(args.config.as_deref())
        .and_then(|config| config.paths().map(|paths| (config, paths)))
    {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("modlink: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Err(e) = logging::init(&paths.log_file, args.verbose) {
        eprintln!("modlink: {e}");
        return Ok(ExitCode::FAILURE);
    }
    info!(version = %config.app_version, "Starting modlink");

    let arbiter = InstanceArbiter::new(&config.instance, &paths.runtime_dir);
    let guard = match arbiter.acquire() {
        Ok(Acquisition::Primary(guard)) => guard,
        Ok(Acquisition::Secondary) => {
            hand_over(&arbiter, args.url.as_deref()).await;
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(fatal(e.into())),
    };

    let (ui, ui_rx) = ui::channel();
    let pump = tokio::spawn(pump_ui(ui_rx));

    let agent = Agent::new(config, ui).map_err(|e| fatal(e.into()))?;
    let listener = {
        let agent = Arc::clone(&agent);
        guard
            .start_listening(move |payload| agent.submit_activation(payload))
            .map_err(|e| fatal(e.into()))?
    };
    agent
        .start()
        .await
        .context("starting agent")
        .map_err(fatal)?;

    if let Some(url) = args.url {
        agent.handle_command(UiCommand::Activate { url });
    }
    let commands = tokio::spawn(read_commands(Arc::clone(&agent)));

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted"),
            Err(e) => warn!(error = %e, "Ctrl-C handler failed; shutting down"),
        },
        () = agent.shutdown_requested() => info!("Shutdown requested"),
    }

    commands.abort();
    listener.stop().await;
    agent.shutdown().await;
    guard.release();
    pump.abort();
    info!("modlink exited");
    Ok(ExitCode::SUCCESS)
}

/// Secondary path: pass the URL on and exit whatever happens.
async fn hand_over(arbiter: &InstanceArbiter, url: Option<&str>) {
    let Some(url) = url else {
        info!("modlink is already running");
        return;
    };
    match arbiter.relay(url).await {
        Ok(true) => info!("Activation handed to the running instance"),
        Ok(false) => debug!("Empty activation URL; nothing handed over"),
        Err(e) => error!(error = %e, "Could not reach the running instance"),
    }
}

/// Tells the UI startup failed and passes the error on.
fn fatal(e: anyhow::Error) -> anyhow::Error {
    emit(&UiMessage::Fatal {
        message: format!("{e:#}"),
    });
    e
}

async fn pump_ui(mut rx: UiReceiver) {
    while let Some(message) = rx.recv().await {
        emit(&message);
    }
}

fn emit(message: &UiMessage) {
    match serde_json::to_string(message) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
                debug!(error = %e, "UI output closed");
            }
        }
        Err(e) => warn!(error = %e, "Could not encode UI message"),
    }
}

async fn read_commands(agent: Arc<Agent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<UiCommand>(&line) {
                Ok(command) => agent.handle_command(command),
                Err(e) => warn!(error = %e, "Ignoring malformed UI command"),
            },
            Ok(None) => {
                debug!("UI input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "UI input failed");
                break;
            }
        }
    }
}
