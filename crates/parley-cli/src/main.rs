//! # parley
//!
//! Terminal front end for the parley chat client. Reads slash commands from
//! stdin and prints what the client reports. `--json` prints every UI event
//! as one JSON object per line instead.

mod commands;
mod render;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_client::{App, ClientConfig, Command};
use parley_net::WsConnector;
use parley_store::{Database, SqliteCredentialStore};

use crate::commands::{Input, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Logging (RUST_LOG wins) and configuration
    // -----------------------------------------------------------------------
    parley_client::init_tracing();
    info!("Starting parley v{}", env!("CARGO_PKG_VERSION"));

    let json = std::env::args().skip(1).any(|arg| arg == "--json");
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Credential storage
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => {
            info!(path = %path.display(), "opening database");
            Database::open_at(path)?
        }
        None => Database::new()?,
    };
    let credentials = Arc::new(SqliteCredentialStore::new(db));

    // -----------------------------------------------------------------------
    // 3. Client, renderer and input
    // -----------------------------------------------------------------------
    let app = App::new(config, credentials, Arc::new(WsConnector))?;
    tokio::spawn(render::run(app.subscribe(), json));

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    tokio::spawn(read_input(cmd_tx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = cmd_tx.send(Command::Quit).await;
        }
    });

    // -----------------------------------------------------------------------
    // 4. Event loop (returns on /quit, Ctrl+C or end of input)
    // -----------------------------------------------------------------------
    app.run(cmd_rx).await?;
    Ok(())
}

async fn read_input(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read input");
                break;
            }
        };

        match commands::parse(&line) {
            Ok(None) => {}
            Ok(Some(Input::Help)) => println!("{HELP}"),
            Ok(Some(Input::Command(cmd))) => {
                if commands.send(cmd).await.is_err() {
                    return;
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    let _ = commands.send(Command::Quit).await;
}
