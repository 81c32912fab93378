//! `chatline` command-line client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chatline::{Client, Config, SendOutcome};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "chatline")]
#[command(version = VERSION)]
#[command(about = "Chatango PM client")]
struct Cli {
    /// Override the configured PM server host.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Override the configured PM server port.
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and log every event until Ctrl-C.
    Listen {
        /// Do not reconnect when the connection drops.
        #[arg(long)]
        no_reconnect: bool,
    },
    /// Send one message and exit.
    Send {
        /// Recipient user name.
        target: String,
        /// Message text.
        message: String,
    },
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(server) = cli.server {
        config.server = server;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command {
        Commands::Listen { no_reconnect } => listen(config, !no_reconnect).await,
        Commands::Send { target, message } => send(config, &target, &message).await,
        Commands::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

fn require_credentials(config: &Config) -> Result<()> {
    if !config.has_credentials() {
        anyhow::bail!("Set CHATLINE_USERNAME and CHATLINE_PASSWORD (or username in config.json)");
    }
    Ok(())
}

async fn listen(config: Config, reconnect: bool) -> Result<()> {
    require_credentials(&config)?;
    let client = Client::new(config)?;
    let pm = client.pm().clone();
    let (username, password) = (client.config().username.clone(), client.config().password.clone());

    let session = tokio::spawn(async move { pm.listen(&username, &password, reconnect).await });
    tokio::pin!(session);

    tokio::select! {
        result = &mut session => {
            result.context("Session task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("[Client] Ctrl-C received, shutting down");
            client.stop().await;
            session.await.context("Session task panicked")??;
            return Ok(());
        }
    }
    client.stop().await;
    Ok(())
}

async fn send(config: Config, target: &str, message: &str) -> Result<()> {
    require_credentials(&config)?;
    let client = Client::new(config)?;
    let pm = client.pm();

    pm.connect(&client.config().username, &client.config().password)
        .await
        .context("Failed to connect")?;
    let outcome = pm.send_message(target, message).await;
    client.stop().await;

    match outcome.context("Failed to send message")? {
        SendOutcome::Sent { chunks } => {
            log::info!("[Client] Sent to {target} in {chunks} chunk(s)");
            Ok(())
        }
        SendOutcome::Throttled => anyhow::bail!("Server is rate limiting; message not sent"),
    }
}
