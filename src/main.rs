//! ChatRelay - multi-platform chat bridge
//!
//! Relays messages between IRC channels, Telegram chats and Discord
//! channels grouped into bridged rooms, propagating edits and deletions
//! where the platforms allow it.

mod association;
mod bridge;
mod common;
mod config;
mod handler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use association::{build_store, AssociationStore};
use bridge::{delivery_log, BridgeEngine, HookRegistry, HookStage, PaeeyeFilter, RoomRouter};
use common::AppError;
use config::{env::get_config_path, load_and_validate, Config};
use handler::command::register_builtin_commands;
use handler::HandlerRegistry;

/// How long handlers get to disconnect cleanly.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything that lives for the duration of the process.
struct Relay {
    handlers: Arc<HandlerRegistry>,
    associations: Arc<dyn AssociationStore>,
    // Event subscriptions only hold the engine weakly.
    _engine: Arc<BridgeEngine>,
}

impl Relay {
    /// Wire the relay together: handlers, association store, engine,
    /// event subscriptions and built-in commands, in that order.
    async fn start(config: &Config) -> Result<Self, AppError> {
        let handlers = Arc::new(HandlerRegistry::from_config(config)?);
        if handlers.is_empty() {
            warn!("No clients configured, nothing will be bridged");
        } else {
            info!("Configured {} client(s)", handlers.len());
        }

        let associations = build_store(&config.bridge.message_association)?;
        associations.start().await?;

        let rooms = RoomRouter::from_config(&config.bridge.rooms, handlers.resolver());
        info!("Bridging {} room group(s)", rooms.group_count());

        let mut hooks = HookRegistry::new();
        if let Some(ref paeeye) = config.bridge.paeeye {
            let filter = PaeeyeFilter::new(paeeye);
            if !filter.is_empty() {
                hooks.register(HookStage::Send, Arc::new(filter));
            }
        }
        hooks.register(HookStage::Sent, delivery_log());
        debug!(
            send = hooks.count(HookStage::Send),
            sent = hooks.count(HookStage::Sent),
            "Hooks registered"
        );

        let engine = Arc::new(BridgeEngine::new(
            handlers.clone(),
            rooms,
            hooks,
            associations.clone(),
        ));
        engine.attach();

        for handler in handlers.iter() {
            register_builtin_commands(handler.as_ref(), config)?;
        }

        Ok(Self {
            handlers,
            associations,
            _engine: engine,
        })
    }

    /// Run every handler until a shutdown signal arrives or all of them
    /// exit.
    async fn run(self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks: Vec<JoinHandle<()>> = self
            .handlers
            .iter()
            .map(|handler| {
                info!(client = %handler.client(), id = handler.id(), "Starting handler");
                handler.clone().spawn(shutdown_rx.clone())
            })
            .collect();
        let all_tasks = join_all(tasks);
        tokio::pin!(all_tasks);

        tokio::select! {
            biased;
            _ = shutdown_signal() => {
                info!("Shutdown signal received, disconnecting...");
                if let Err(e) = shutdown_tx.send(true) {
                    debug!("Shutdown channel closed (handlers already exited): {}", e);
                }
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut all_tasks).await {
                    Ok(results) => {
                        for result in results {
                            if let Err(e) = result {
                                warn!("Handler task panicked: {}", e);
                            }
                        }
                        info!("Handlers disconnected");
                    }
                    Err(_) => warn!("Handlers did not disconnect in time"),
                }
            }
            _ = &mut all_tasks => {
                warn!("All handlers exited");
            }
        }

        if let Err(e) = self.associations.stop().await {
            error!("Failed to close message association store: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("ChatRelay v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    let relay = Relay::start(&config).await.map_err(|e| {
        error!("Startup failed: {}", e);
        e
    })?;
    relay.run().await;

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
