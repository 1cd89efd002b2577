//! Buslink CLI - talk to a fieldbus gateway from the command line
//!
//! Opens a tunnel session to a gateway, then either dumps the application
//! frames it delivers or sends a single frame reliably.

use anyhow::{Context, Result};
use buslink_client::{Client, ClientConfig, TunnelError};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Buslink - tunnel fieldbus traffic through a remote gateway
#[derive(Parser, Debug)]
#[command(name = "buslink")]
#[command(about = "Buslink - tunnel fieldbus traffic through a remote gateway")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a tunnel and print every application frame the gateway delivers
    #[command(long_about = r#"
Open a tunnel to the gateway and print incoming application frames as hex,
one per line, until ctrl-c closes the session.

EXAMPLES:
  # Dump bus traffic arriving at the gateway
  buslink listen 10.0.0.7:6720

  # Slow network: retransmit once a second
  buslink listen 10.0.0.7:6720 --resend-interval-ms 1000

ENVIRONMENT VARIABLES:
  BUSLINK_GATEWAY   Gateway address
    "#)]
    Listen {
        /// Gateway address (e.g., 10.0.0.7:6720)
        #[arg(env = "BUSLINK_GATEWAY")]
        gateway: SocketAddr,

        #[command(flatten)]
        timing: TimingArgs,
    },

    /// Open a tunnel, send one application frame and wait for the ack
    Send {
        /// Gateway address (e.g., 10.0.0.7:6720)
        #[arg(env = "BUSLINK_GATEWAY")]
        gateway: SocketAddr,

        /// Frame payload as hex (e.g., 1100bce000)
        payload: String,

        #[command(flatten)]
        timing: TimingArgs,
    },
}

/// Session timing overrides; zero means the built-in default.
#[derive(Args, Debug)]
struct TimingArgs {
    /// Retransmission period in milliseconds
    #[arg(long, default_value = "0")]
    resend_interval_ms: u64,

    /// Idle time before a heartbeat in milliseconds
    #[arg(long, default_value = "0")]
    heartbeat_delay_ms: u64,

    /// Response deadline in milliseconds
    #[arg(long, default_value = "0")]
    response_timeout_ms: u64,
}

impl TimingArgs {
    /// Zero durations fall back to their defaults inside the client.
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            resend_interval: Duration::from_millis(self.resend_interval_ms),
            heartbeat_delay: Duration::from_millis(self.heartbeat_delay_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    anyhow::ensure!(
        cleaned.len() % 2 == 0,
        "hex payload must have an even number of digits"
    );

    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .with_context(|| format!("invalid hex in payload at offset {}", i))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn open_session(gateway: SocketAddr, config: ClientConfig) -> Result<Arc<Client>> {
    let client = Client::connect(gateway, config)
        .await
        .context("Failed to establish tunnel")?;

    info!(channel = client.channel_id(), %gateway, "tunnel open");
    Ok(Arc::new(client))
}

async fn run_listen(gateway: SocketAddr, config: ClientConfig) -> Result<()> {
    let client = open_session(gateway, config).await?;
    let mut inbound = client
        .take_inbound()
        .context("Inbound receiver already taken")?;

    let mut session = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.serve().await }
    });

    let printer = tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            println!("{}", to_hex(&frame));
        }
    });

    info!("waiting for frames (ctrl-c to quit)");

    let result = tokio::select! {
        result = &mut session => result,
        _ = tokio::signal::ctrl_c() => {
            info!("closing tunnel");
            client.close();
            session.await
        }
    };

    match result.context("Session task failed")? {
        Ok(()) => info!("session closed by gateway"),
        Err(TunnelError::Cancelled) => info!("tunnel closed"),
        Err(e) => return Err(e).context("Session terminated abnormally"),
    }

    let _ = printer.await;
    Ok(())
}

async fn run_send(gateway: SocketAddr, payload: Vec<u8>, config: ClientConfig) -> Result<()> {
    let client = open_session(gateway, config).await?;

    let session = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.serve().await }
    });

    client
        .send(payload)
        .await
        .context("Gateway did not acknowledge the frame")?;
    info!("frame acknowledged");

    client.close();
    let _ = session.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Listen { gateway, timing } => run_listen(gateway, timing.to_config()).await,
        Commands::Send {
            gateway,
            payload,
            timing,
        } => run_send(gateway, parse_hex(&payload)?, timing.to_config()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("1100bce0").unwrap(), vec![0x11, 0x00, 0xbc, 0xe0]);
        assert_eq!(parse_hex("11 00 bc e0").unwrap(), vec![0x11, 0x00, 0xbc, 0xe0]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x11, 0x00, 0xbc, 0xe0]), "1100bce0");
    }
}
