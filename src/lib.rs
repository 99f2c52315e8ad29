pub mod bridge;
pub mod hub;
pub mod messages;
pub mod models;
pub mod navigation;
pub mod sensing;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use bridge::BrowserBridge;
use hub::ContextHub;
use session::{GeminiLiveConnector, NullAudioSink, SessionOrchestrator};
use settings::SettingsStore;
use store::SessionStore;

/// Console commands read from stdin while the host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "c" | "connect" => Some(Command::Connect),
        "d" | "disconnect" => Some(Command::Disconnect),
        "s" | "status" => Some(Command::Status),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

pub fn run() -> Result<()> {
    let debug = std::env::var("CYBERPET_DEBUG").map_or(false, |value| value == "1");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug { "debug" } else { "info" }),
    )
    .init();

    log::info!("Cyber-Pet starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(serve())
}

async fn serve() -> Result<()> {
    let data_dir = SettingsStore::default_dir()?;
    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.snapshot();

    let store = SessionStore::resume(data_dir.join("cyberpet.sqlite3")).await?;
    let cancel = CancellationToken::new();

    let (hub, inbox) = ContextHub::new(settings.dispatch.clone());
    let hub_task = hub.spawn(inbox, cancel.child_token());

    let orchestrator = SessionOrchestrator::new(
        settings.session.clone(),
        Arc::new(GeminiLiveConnector::new()),
        hub.clone(),
        Arc::new(NullAudioSink),
    );
    let listener_task = orchestrator.spawn_context_listener(cancel.child_token());

    let bridge = BrowserBridge::new(
        settings.bridge.clone(),
        hub.clone(),
        Some(store),
        settings.stability.clone(),
        settings.classifier.clone(),
    );
    let (bridge_addr, bridge_task) = bridge.start(cancel.child_token()).await?;
    log::info!("Waiting for pages on ws://{}", bridge_addr);

    let status_task = {
        let mut status = orchestrator.subscribe_status();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let mut last_line = String::new();
            loop {
                let line = status.borrow_and_update().status_line();
                if line != last_line {
                    log::info!("{}", line);
                    last_line = line;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = status.changed() => if changed.is_err() { break },
                }
            }
        })
    };

    match settings_store.api_key() {
        Some(key) => {
            if let Err(err) = orchestrator.connect(Some(key)).await {
                log::warn!("{}", err);
            }
        }
        None => log::warn!(
            "No API key; set {} or add \"api_key\" to {}",
            settings::API_KEY_ENV,
            settings_store.path().display()
        ),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                // stdin closed; keep serving until interrupted
                Ok(None) | Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
            },
        };
        match parse_command(&line) {
            Some(Command::Connect) => {
                if let Err(err) = orchestrator.connect(settings_store.api_key()).await {
                    log::warn!("{}", err);
                }
            }
            Some(Command::Disconnect) => orchestrator.disconnect().await,
            Some(Command::Status) => log::info!("{}", orchestrator.snapshot().await.status_line()),
            Some(Command::Quit) => break,
            None if line.trim().is_empty() => {}
            None => log::info!("commands: connect, disconnect, status, quit"),
        }
    }

    log::info!("Shutting down...");
    orchestrator.disconnect().await;
    cancel.cancel();
    for task in [hub_task, listener_task, bridge_task, status_task] {
        let _ = task.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(parse_command(" Connect "), Some(Command::Connect));
        assert_eq!(parse_command("d"), Some(Command::Disconnect));
        assert_eq!(parse_command("exit"), Some(Command::Quit));
        assert_eq!(parse_command("dance"), None);
    }
}
