//! # livefolio
//!
//! Binary wiring the server and the subscriber client together:
//! `serve` runs the fan-out server, `watch` keeps a subscriber connection
//! alive, `login`/`logout` manage the persisted identity and `publish`
//! pushes a domain event into a running server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use livefolio_client::{
    CacheInvalidator, CacheKey, ConnectionManager, FileSessionStore, ManagerConfig, SessionStore,
    WsConnector, store_user_id, stored_user_id,
};
use livefolio_core::{DomainEvent, UserId};
use livefolio_server::{LiveServer, ServerConfig};
use livefolio_settings::{LivefolioSettings, LogOutput, LoggingSettings};
use livefolio_telemetry::{LogFormat, TelemetryConfig, init_telemetry, parse_level};
use tracing::{Level, info, warn};

/// Real-time investment update fan-out.
#[derive(Parser, Debug)]
#[command(name = "livefolio", version, about = "Real-time investment update fan-out")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server until Ctrl-C.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings; 0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stay subscribed and log every cache invalidation until Ctrl-C.
    Watch {
        /// User to subscribe for (defaults to the logged-in user).
        #[arg(long)]
        user_id: Option<UserId>,
        /// Server WebSocket URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
    },
    /// Remember a user id for later `watch` runs.
    Login {
        /// User to remember.
        #[arg(long)]
        user_id: UserId,
    },
    /// Forget the remembered user id.
    Logout,
    /// Publish an `investment_update` to a running server.
    Publish {
        /// Target user.
        #[arg(long)]
        user_id: UserId,
        /// JSON payload forwarded to the user's connections.
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Server WebSocket URL (overrides settings); the HTTP base is derived from it.
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = livefolio_settings::load_settings().context("Failed to load settings")?;
    let _ = init_telemetry(&telemetry_config(&settings.logging));

    match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Watch { user_id, url } => watch(&settings, user_id, url).await,
        Command::Login { user_id } => {
            let store = session_store(&settings);
            store_user_id(&store, user_id).context("Failed to save session")?;
            info!(%user_id, path = %store.path().display(), "logged in");
            Ok(())
        }
        Command::Logout => {
            let store = session_store(&settings);
            store.clear().context("Failed to clear session")?;
            info!(path = %store.path().display(), "logged out");
            Ok(())
        }
        Command::Publish {
            user_id,
            payload,
            url,
        } => publish(&settings, user_id, &payload, url).await,
    }
}

async fn serve(settings: &LivefolioSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let metrics_handle = livefolio_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = LiveServer::new(config, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("livefolio listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    let report = server.shutdown().graceful_shutdown(vec![handle], None).await;
    if !report.is_clean() {
        warn!(aborted = report.aborted, panicked = report.panicked, "server did not stop cleanly");
    }
    Ok(())
}

async fn watch(settings: &LivefolioSettings, user_id: Option<UserId>, url: Option<String>) -> Result<()> {
    let store = session_store(settings);
    let user_id = match user_id {
        Some(id) => id,
        None => match stored_user_id(&store).context("Failed to read session")? {
            Some(id) => id,
            None => bail!("no user id given and no session stored; run `livefolio login --user-id <id>`"),
        },
    };
    let url = url.unwrap_or_else(|| settings.client.server_url.clone());

    let invalidator: Arc<dyn CacheInvalidator> =
        Arc::new(|key: &CacheKey| info!(%key, "cache invalidated"));
    let manager = ConnectionManager::spawn(
        ManagerConfig::new(url.clone())
            .with_reconnect_delay(Duration::from_millis(settings.client.reconnect_delay_ms)),
        Arc::new(WsConnector::new()),
        invalidator,
    );
    info!(%user_id, %url, "watching for investment updates");
    manager.connect(Some(user_id));

    let mut states = manager.subscribe_state();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("connection manager stopped");
                    break;
                }
                let state = *states.borrow_and_update();
                info!(%state, "connection state changed");
            }
        }
    }

    manager.teardown().await;
    Ok(())
}

async fn publish(
    settings: &LivefolioSettings,
    user_id: UserId,
    payload: &str,
    url: Option<String>,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let ws_url = url.unwrap_or_else(|| settings.client.server_url.clone());
    let endpoint = format!("{}/events", http_base(&ws_url));

    let event = DomainEvent::investment_update(user_id, payload);
    let resp = reqwest::Client::new()
        .post(&endpoint)
        .json(&event)
        .send()
        .await
        .with_context(|| format!("Failed to reach {endpoint}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("server rejected event ({status}): {body}");
    }
    info!(%user_id, %endpoint, "event published");
    Ok(())
}

/// HTTP base URL of the server behind a WebSocket endpoint.
fn http_base(ws_url: &str) -> String {
    let url = ws_url.trim_end_matches('/');
    let url = url.strip_suffix("/ws").unwrap_or(url);
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_owned()
    }
}

fn session_path(settings: &LivefolioSettings) -> PathBuf {
    settings
        .client
        .session_path
        .as_ref()
        .map_or_else(|| livefolio_settings::settings_dir().join("session.json"), PathBuf::from)
}

fn session_store(settings: &LivefolioSettings) -> FileSessionStore {
    FileSessionStore::new(session_path(settings))
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: parse_level(logging.level.as_filter_str()).unwrap_or(Level::INFO),
        module_levels: logging
            .modules
            .iter()
            .filter_map(|m| Some((m.module.clone(), parse_level(m.level.as_filter_str())?)))
            .collect(),
        format: match logging.format {
            LogOutput::Compact => LogFormat::Compact,
            LogOutput::Json => LogFormat::Json,
        },
    }
}
