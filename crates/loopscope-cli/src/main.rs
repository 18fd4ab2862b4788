mod demo;

use clap::{ArgAction, Parser, Subcommand};
use loopscope_debug::{
    ControlMessage, DebugConfig, DebugRuntime, OutboundReceiver, ProtocolHandler, Session,
    push_channel,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loopscope-cli")]
#[command(about = "Live-debug host for stateful functions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve one observer connection as newline-delimited JSON on stdio.
    Serve(ServeArgs),
    /// Print the registered functions and their initial states.
    Catalog,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "stdio")]
    connection_id: String,
    #[arg(long = "no-debug", action = ArgAction::SetTrue)]
    no_debug: bool,
    /// How long to let running calls finish once stdin closes.
    #[arg(long, default_value_t = 5000)]
    drain_timeout_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => serve_command(args).await,
        Commands::Catalog => catalog_command(),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}

fn catalog_command() -> Result<ExitCode, String> {
    let catalog = demo::registry().catalog();
    let rendered = serde_json::to_string_pretty(&catalog).map_err(|error| error.to_string())?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

async fn serve_command(args: ServeArgs) -> Result<ExitCode, String> {
    let mut config = DebugConfig::from_env().map_err(|error| error.to_string())?;
    config.enabled = !args.no_debug;
    let handler = ProtocolHandler::new(DebugRuntime::new(config, demo::registry()));

    let (channel, outbound) = push_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let writer = tokio::spawn(write_frames(outbound, shutdown_rx));

    let outcome = handler.connect(&args.connection_id, None, channel);
    tracing::info!(
        session_id = %outcome.session.id(),
        connection_id = %args.connection_id,
        "observer connected"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|error| error.to_string())? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match ControlMessage::parse(&line) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "ignoring control message");
                continue;
            }
        };
        if let Err(error) = handler.handle(&args.connection_id, message).await {
            tracing::warn!(%error, "control message failed");
        }
    }

    drain(&outcome.session, Duration::from_millis(args.drain_timeout_ms)).await;
    handler.runtime().delete_session(outcome.session.id());

    let _ = shutdown_tx.send(());
    writer.await.map_err(|error| error.to_string())?;
    Ok(ExitCode::SUCCESS)
}

/// Waits for the session's running calls to finish, up to `limit`.
async fn drain(session: &Arc<Session>, limit: Duration) {
    let idle = async {
        while session.running_tasks() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(limit, idle).await.is_err() {
        tracing::warn!(
            running = session.running_tasks(),
            "calls still running after stdin closed; cancelling"
        );
    }
}

/// Writes one JSON line per outbound frame until shut down and drained.
async fn write_frames(mut outbound: OutboundReceiver, mut shutdown: oneshot::Receiver<()>) {
    let mut stdout = tokio::io::stdout();
    let mut closing = false;
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let line = match frame.to_json() {
                    Ok(value) => value.to_string(),
                    Err(error) => {
                        tracing::warn!(%error, event = frame.event.name(), "failed to encode frame");
                        continue;
                    }
                };
                if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err()
                    || stdout.flush().await.is_err()
                {
                    tracing::warn!("stdout closed; dropping frames");
                    break;
                }
            }
            _ = &mut shutdown, if !closing => {
                closing = true;
                outbound.close();
            }
        }
    }
}
