//! ChatRun robot: terminal connector, JSON bridge and task engine.

use std::path::PathBuf;
use std::sync::Arc;

use chatrun_core::IncomingMessage;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chatrun_engine::builtins::register_builtins;
use chatrun_engine::connector::TerminalConnector;
use chatrun_engine::dispatch::handle_message;
use chatrun_engine::state::{BotState, Paths};
use chatrun_engine::{http, Config};

/// Chat-triggered automation robot.
#[derive(Parser, Debug)]
#[command(name = "chatrun", about = "Chat-triggered automation robot")]
struct Args {
    /// Installation directory (default tasks and configuration)
    #[arg(short, long, env = "CHATRUN_INSTALLDIR", default_value = ".")]
    install_dir: PathBuf,

    /// Configuration directory (local overrides)
    #[arg(short, long, env = "CHATRUN_CONFIGDIR", default_value = ".")]
    config_dir: PathBuf,

    /// Listen address for the JSON bridge, overriding HttpListen
    #[arg(short, long, env = "CHATRUN_LISTEN")]
    listen: Option<String>,

    /// User the terminal speaks as
    #[arg(short, long, env = "CHATRUN_USER", default_value = "alice")]
    user: String,

    /// Channel the terminal speaks in; empty sends direct messages
    #[arg(long, env = "CHATRUN_CHANNEL", default_value = "general")]
    channel: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout belongs to the terminal connector
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let mut config = Config::load(&args.install_dir, &args.config_dir)?;
    if let Some(listen) = args.listen {
        config.http_listen = listen;
    }
    let listen = config.http_listen.clone();

    let state = BotState::new(
        config,
        Paths {
            install: args.install_dir,
            config: args.config_dir,
        },
    );
    register_builtins(&state)?;
    state.set_connector(Arc::new(TerminalConnector::new()));
    let tasks = state.load_tasks().await;
    info!(
        tasks = tasks.len(),
        user = %args.user,
        channel = %args.channel,
        "Starting ChatRun"
    );

    let http_state = state.clone();
    let http_server = tokio::spawn(async move {
        if let Err(e) = http::serve(http_state, &listen).await {
            error!(error = %e, "HTTP server error");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let msg = if args.channel.is_empty() {
                        IncomingMessage::direct(&args.user, line)
                    } else {
                        IncomingMessage::channel(&args.user, &args.channel, line)
                    };
                    handle_message(&state, msg).await;
                }
                Ok(None) => {
                    info!("End of input, shutting down");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Error reading terminal input");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    for run in state.runs.list() {
        state.abort_run(run.id.get());
    }
    http_server.abort();
    Ok(())
}
