use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use bridge_terminal::config::ConfigLoader;
use bridge_terminal::logger::init_logging;
use bridge_terminal::service::listener;
use bridge_terminal::{BridgeClient, ControlMessageType, Result};

/// Open a terminal on a remote bridge host and attach stdin/stdout to it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host to open the terminal on
    #[arg(long)]
    host: String,

    /// Bearer token passed as the `auth` query parameter
    #[arg(short, long, env = "BRIDGE_TOKEN")]
    token: String,

    /// Terminal columns
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Terminal rows
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Bridge base URL, overrides the configuration file
    #[arg(short, long)]
    base_url: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, None)?;

    let mut config = ConfigLoader::new().load_config(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.server.base_url = base_url;
    }

    let client = BridgeClient::new(&config)?;
    for msg_type in ControlMessageType::ALL {
        client.subscribe(
            msg_type,
            listener(move |message| {
                let name = msg_type.event_name();
                match message.msg_type {
                    ControlMessageType::OpenTerminalErr
                    | ControlMessageType::ChildExitWithError
                    | ControlMessageType::GeneralError => {
                        warn!("{} for context {}: {}", name, message.context_id, message.content)
                    }
                    _ => info!("{} for context {}: {}", name, message.context_id, message.content),
                }
            }),
        );
    }

    let mut session = client.open_terminal(&cli.host, &cli.token, cli.cols, cli.rows).await?;
    info!(
        "Terminal requested: context {}, channel {}",
        session.context_id, session.channel_id
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            output = session.data.recv() => {
                let Some(bytes) = output else {
                    info!("Data channel closed");
                    break;
                };
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if line == "/quit" {
                    info!("Closing connection...");
                    break;
                }
                if let Some(size) = line.strip_prefix("/resize ") {
                    match parse_size(size) {
                        Some((cols, rows)) => {
                            session.resize(cols, rows);
                        }
                        None => warn!("Usage: /resize <cols> <rows>"),
                    }
                    continue;
                }
                if let Err(e) = session.data.send_input(format!("{line}\r").as_bytes()) {
                    error!("Failed to send input: {}", e);
                    break;
                }
            }
        }
    }

    client.close();
    Ok(())
}

fn parse_size(size: &str) -> Option<(u16, u16)> {
    let mut parts = size.split_whitespace();
    let cols = parts.next()?.parse().ok()?;
    let rows = parts.next()?.parse().ok()?;
    Some((cols, rows))
}
