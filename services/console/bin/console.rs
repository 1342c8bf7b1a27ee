//! Main Entrypoint for the Parley Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from arguments and the environment.
//! 2. Wiring a session controller to the WebSocket transport.
//! 3. Printing conversation updates while forwarding typed input as commands.

use anyhow::Context;
use clap::Parser;
use parley_console::{
    commands::{ConsoleCommand, describe},
    config::{Args, Settings},
};
use parley_core::{
    SessionController, SessionSnapshot, SessionState, SignedUrlSource, WebSocketTransport,
};
use std::{collections::BTreeSet, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

/// Prints new messages and lifecycle changes as they are published.
async fn print_updates(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut printed = 0;
    let mut announced_tools = BTreeSet::new();
    let mut last_state = SessionState::Idle;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        printed = printed.min(snapshot.messages.len());
        for message in &snapshot.messages[printed..] {
            println!("{}: {}", message.role, message.content);
        }
        printed = snapshot.messages.len();
        for call in &snapshot.pending_tool_calls {
            if !announced_tools.insert(call.tool_call_id.clone()) {
                continue;
            }
            println!(
                "[tool] {} ({}) {}",
                call.tool_name, call.tool_call_id, call.parameters
            );
        }
        if snapshot.state != last_state {
            println!("[{}]", describe(&snapshot));
            last_state = snapshot.state;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let settings = Settings::from_args(Args::parse()).context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(agent_id = %settings.agent_id, "Configuration loaded");

    // --- 3. Build the Session Controller ---
    let controller = SessionController::new(
        Arc::new(WebSocketTransport::new()),
        Arc::new(SignedUrlSource::new(settings.endpoints.clone())),
        settings.engine.clone(),
    );
    let printer = tokio::spawn(print_updates(controller.subscribe()));

    controller
        .start(settings.auth_source(), settings.options.clone())
        .await
        .context("Failed to start conversation")?;
    println!("Connected. Type a message, or /help for commands.");

    // --- 4. Forward Input Until the Session Ends ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut lifecycle = controller.subscribe();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
            _ = lifecycle.wait_for(|s| !s.state.is_live()) => break,
        };
        let Some(line) = line else {
            controller.end().await;
            break;
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let ending = command == ConsoleCommand::End;
        match command.execute(&controller).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Command failed"),
        }
        if ending {
            break;
        }
    }

    info!(summary = %describe(&controller.snapshot()), "Conversation finished");
    printer.abort();
    Ok(())
}
