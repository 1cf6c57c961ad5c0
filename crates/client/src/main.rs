//! societas-live - watch realtime channels from a terminal.
//!
//! Connects with the configured session, subscribes to the channels named on
//! the command line and logs every push until interrupted.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use clap::Parser;
    use societas_client::{ConnectionManager, ConnectionState, RealtimeConfig, SessionStore};
    use tracing_subscriber::EnvFilter;

    #[derive(Parser)]
    #[command(name = "societas-live")]
    #[command(version)]
    #[command(about = "Subscribe to Societas realtime channels and log every push")]
    struct Cli {
        /// Channels to subscribe to
        #[arg(required = true)]
        channels: Vec<String>,
        /// WebSocket endpoint (overrides SOCIETAS_WS_URL)
        #[arg(long)]
        url: Option<String>,
        /// Bearer token to authenticate with instead of the stored session
        #[arg(long)]
        token: Option<String>,
        /// Authenticate as a public client even if a session is stored
        #[arg(long, conflicts_with = "token")]
        public: bool,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    }

    pub async fn run() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("societas_client=debug,societas_live=info")),
            )
            .init();

        let cli = Cli::parse();

        let mut config = RealtimeConfig::from_env();
        if let Some(url) = cli.url {
            let parsed = url::Url::parse(&url).with_context(|| format!("invalid --url {url}"))?;
            anyhow::ensure!(
                matches!(parsed.scheme(), "ws" | "wss"),
                "--url must be a ws:// or wss:// URL"
            );
            config.ws_url = url;
        }

        let session = if cli.public {
            SessionStore::in_memory(config.session_key.clone())
        } else if let Some(token) = cli.token {
            let session = SessionStore::in_memory(config.session_key.clone());
            session.set_token(token);
            session
        } else {
            SessionStore::persistent(config.session_key.clone())
        };

        tracing::info!("Connecting to {}", config.ws_url);
        let manager = ConnectionManager::with_default_connector(config, session);

        let mut status = manager.watch_status();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let state = status.borrow_and_update().clone();
                match &state {
                    ConnectionState::AuthFailed { reason } => {
                        tracing::error!("Authentication rejected: {}", reason);
                    }
                    ConnectionState::Error { reason } => {
                        tracing::error!("Connection error: {}", reason);
                    }
                    _ => tracing::info!("Status: {}", state),
                }
            }
        });

        let subscriptions: Vec<_> = cli
            .channels
            .iter()
            .map(|channel| {
                manager.subscribe(channel.as_str(), |push| {
                    tracing::info!(
                        channel = %push.channel,
                        kind = push.kind().unwrap_or("-"),
                        "{}",
                        push.payload()
                    );
                    Ok(())
                })
            })
            .collect();

        manager.connect();

        match cli.duration {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    result = tokio::signal::ctrl_c() => result.context("waiting for ctrl-c")?,
                }
            }
            None => tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?,
        }

        tracing::info!("Shutting down");
        drop(subscriptions);
        manager.shutdown();
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
