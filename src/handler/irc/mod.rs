//! IRC handler over a raw TCP line connection.

pub mod codec;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backon::BackoffBuilder;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::common::error::{ConfigError, DeliveryError, DeliveryResult};
use crate::config::{Config, IrcConfig};

use self::codec::{new_irc_connection, IrcConnection, IrcMessage};
use super::format::{split_lines, MessageFormatter};
use super::{process_inbound, CommandRouter, Context, EventHub, EventKind, Handler, SayOptions};

pub const KIND: &str = "IRC";

/// Outbound PRIVMSG payloads are split to stay below the 512-byte line limit
/// once the server prepends our prefix.
const MAX_MESSAGE_BYTES: usize = 400;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const CTCP_DELIM: char = '\x01';

/// Build the IRC handler if `clients.irc` is configured.
pub fn build(config: &Config) -> Result<Option<Arc<dyn Handler>>, ConfigError> {
    Ok(config
        .clients
        .irc
        .as_ref()
        .map(|irc| Arc::new(IrcHandler::new(irc.clone())) as Arc<dyn Handler>))
}

/// How a single connection ended.
enum ConnectionEnd {
    Shutdown,
    Closed,
}

pub struct IrcHandler {
    id: String,
    config: IrcConfig,
    formatter: MessageFormatter,
    events: EventHub,
    commands: CommandRouter,
    outgoing_tx: mpsc::UnboundedSender<IrcMessage>,
    /// Taken by the connection task when it starts.
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<IrcMessage>>>,
    /// Set after the server welcomed us (numeric 001).
    registered: AtomicBool,
    current_nick: RwLock<String>,
    next_message_id: AtomicU64,
}

impl IrcHandler {
    pub fn new(config: IrcConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            id: config.id.clone().unwrap_or_else(|| KIND.to_string()),
            formatter: MessageFormatter::from_config(config.format.as_deref()),
            current_nick: RwLock::new(config.nick.clone()),
            config,
            events: EventHub::new(),
            commands: CommandRouter::new(),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            registered: AtomicBool::new(false),
            next_message_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        (self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn queue(&self, message: IrcMessage) -> DeliveryResult<()> {
        self.outgoing_tx
            .send(message)
            .map_err(|_| DeliveryError::NotConnected {
                client: self.client(),
            })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut outgoing_rx) = self.outgoing_rx.lock().take() else {
            warn!("IRC connection task is already running");
            return;
        };

        /// 5s initial, 5min max, with jitter, unlimited retries.
        fn irc_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(300))
                .with_factor(2.0)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = irc_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }
            info!(
                server = %self.config.server,
                port = self.config.port,
                "Connecting to IRC..."
            );

            let result = self.connection(&mut outgoing_rx, &mut shutdown).await;
            let was_registered = self.registered.swap(false, Ordering::SeqCst);

            match result {
                Ok(ConnectionEnd::Shutdown) => break,
                Ok(ConnectionEnd::Closed) => warn!("IRC server closed the connection"),
                Err(e) => error!("IRC connection error: {:#}", e),
            }

            if was_registered {
                backoff = irc_backoff();
            }
            let delay = backoff.next().unwrap_or(Duration::from_secs(300));
            warn!("IRC disconnected. Reconnecting in {:.1}s...", delay.as_secs_f64());

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("IRC task ended");
    }

    async fn connection(
        self: &Arc<Self>,
        outgoing_rx: &mut mpsc::UnboundedReceiver<IrcMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ConnectionEnd> {
        let address = (self.config.server.as_str(), self.config.port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| anyhow!("timed out connecting to {}:{}", address.0, address.1))??;
        let mut connection = new_irc_connection(stream);

        // Drop anything queued while we were offline
        while outgoing_rx.try_recv().is_ok() {}

        self.register(&mut connection).await?;

        loop {
            tokio::select! {
                frame = connection.next() => {
                    match frame {
                        Some(Ok(message)) => self.handle_message(&mut connection, message).await?,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(ConnectionEnd::Closed),
                    }
                }

                Some(message) = outgoing_rx.recv() => {
                    connection.send(message).await?;
                }

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Disconnecting from IRC");
                        let quit = IrcMessage::new("QUIT", vec!["Shutting down".to_string()]);
                        if let Err(e) = connection.send(quit).await {
                            debug!("Failed to send QUIT: {}", e);
                        }
                        return Ok(ConnectionEnd::Shutdown);
                    }
                }
            }
        }
    }

    async fn register(&self, connection: &mut IrcConnection<TcpStream>) -> Result<()> {
        let nick = self.config.nick.clone();
        *self.current_nick.write() = nick.clone();

        if let Some(ref password) = self.config.password {
            connection
                .send(IrcMessage::new("PASS", vec![password.clone()]))
                .await?;
        }
        connection.send(IrcMessage::new("NICK", vec![nick.clone()])).await?;

        let username = self.config.username.clone().unwrap_or_else(|| nick.clone());
        let realname = self.config.realname.clone().unwrap_or(nick);
        connection
            .send(IrcMessage::new(
                "USER",
                vec![username, "0".to_string(), "*".to_string(), realname],
            ))
            .await?;
        Ok(())
    }

    async fn handle_message(
        self: &Arc<Self>,
        connection: &mut IrcConnection<TcpStream>,
        message: IrcMessage,
    ) -> Result<()> {
        let command = message.command.clone();
        match command.as_str() {
            "PING" => {
                connection
                    .send(IrcMessage::new("PONG", message.params.clone()))
                    .await?;
            }
            "001" => {
                self.registered.store(true, Ordering::SeqCst);
                info!(nick = %self.current_nick.read(), "Registered with IRC server");
                for channel in &self.config.channels {
                    info!(channel = %channel, "Joining IRC channel");
                    connection
                        .send(IrcMessage::new("JOIN", vec![channel.clone()]))
                        .await?;
                }
            }
            // ERR_NICKNAMEINUSE
            "433" if !self.registered.load(Ordering::SeqCst) => {
                let nick = format!("{}_", self.current_nick.read());
                warn!(nick = %nick, "Nick in use, retrying");
                *self.current_nick.write() = nick.clone();
                connection.send(IrcMessage::new("NICK", vec![nick])).await?;
            }
            "NICK" => {
                let is_self = message
                    .nick()
                    .is_some_and(|n| n.eq_ignore_ascii_case(&self.current_nick.read()));
                if let (true, Some(new_nick)) = (is_self, message.param(0)) {
                    *self.current_nick.write() = new_nick.to_string();
                }
            }
            "PRIVMSG" => self.on_privmsg(message).await,
            "TOPIC" => self.on_topic(message).await,
            "ERROR" => {
                return Err(anyhow!(
                    "server error: {}",
                    message.param(0).unwrap_or("unknown")
                ));
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_privmsg(self: &Arc<Self>, message: IrcMessage) {
        let (Some(nick), Some(target), Some(text)) =
            (message.nick(), message.param(0), message.param(1))
        else {
            return;
        };

        if nick.eq_ignore_ascii_case(&self.current_nick.read()) {
            return;
        }

        let text = match parse_ctcp(text) {
            Some(("ACTION", action)) => format!("* {} {}", nick, action),
            Some((kind, _)) => {
                debug!(ctcp = kind, from = nick, "Ignoring CTCP request");
                return;
            }
            None => text.to_string(),
        };

        let is_private = !target.starts_with(['#', '&', '+', '!']);
        let room = if is_private { nick } else { target };

        let handler: Arc<dyn Handler> = self.clone();
        let ctx = Context::new(&handler, nick, room, nick, text)
            .with_message_id(self.next_id())
            .private(is_private)
            .with_raw(message.clone());

        process_inbound(handler.as_ref(), ctx).await;
    }

    /// Topic changes are relayed as notices.
    async fn on_topic(self: &Arc<Self>, message: IrcMessage) {
        let (Some(nick), Some(channel), Some(topic)) =
            (message.nick(), message.param(0), message.param(1))
        else {
            return;
        };
        if nick.eq_ignore_ascii_case(&self.current_nick.read()) {
            return;
        }

        let handler: Arc<dyn Handler> = self.clone();
        let text = format!("{} changed the topic of {} to: {}", nick, channel, topic);
        let ctx = Context::new(&handler, nick, channel, nick, text).with_message_id(self.next_id());
        self.events.emit(EventKind::Notice, Arc::new(ctx)).await;
    }
}

/// Split a CTCP message into its command and argument.
fn parse_ctcp(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    Some(inner.split_once(' ').unwrap_or((inner, "")))
}

#[async_trait]
impl Handler for IrcHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn aliases(&self) -> &[String] {
        &self.config.aliases
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    fn commands(&self) -> &CommandRouter {
        &self.commands
    }

    async fn say(&self, target: &str, text: &str, options: &SayOptions) -> DeliveryResult<String> {
        if target.is_empty() || target.contains(' ') {
            return Err(DeliveryError::InvalidTarget {
                client: self.client(),
                target: target.to_string(),
            });
        }
        if !self.registered.load(Ordering::SeqCst) {
            return Err(DeliveryError::NotConnected {
                client: self.client(),
            });
        }

        let rendered = self.formatter.render(text, options, false);
        for line in split_lines(&rendered, MAX_MESSAGE_BYTES) {
            self.queue(IrcMessage::privmsg(target, &line))?;
        }
        Ok(self.next_id())
    }

    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
