//! Discord handler built on serenity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backon::BackoffBuilder;
use parking_lot::{Mutex, RwLock};
use serenity::builder::{CreateAllowedMentions, CreateMessage, EditMessage};
use serenity::http::{Http, HttpBuilder};
use serenity::model::channel::Message;
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::prelude::{Context as SerenityContext, EventHandler, GatewayIntents};
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::common::error::{ConfigError, DeliveryError, DeliveryResult};
use crate::config::{Config, DiscordConfig};

use super::format::{split_message, MessageFormatter};
use super::{
    process_inbound, wait_for_shutdown, Attachment, CommandRouter, Context, EventHub, EventKind,
    Handler, ReplyInfo, SayOptions,
};

pub const KIND: &str = "Discord";

/// Discord rejects messages above 2000 characters; bytes are a safe bound.
const MAX_MESSAGE_BYTES: usize = 2000;

/// How long a deletion we issued ourselves is remembered.
const OWN_DELETION_TTL: Duration = Duration::from_secs(60);

/// An inbound event waiting to be emitted.
type Inbound = (EventKind, Context);

/// Build the Discord handler if `clients.discord` is configured.
pub fn build(config: &Config) -> Result<Option<Arc<dyn Handler>>, ConfigError> {
    Ok(config
        .clients
        .discord
        .as_ref()
        .map(|discord| Arc::new(DiscordHandler::new(discord.clone())) as Arc<dyn Handler>))
}

pub struct DiscordHandler {
    id: String,
    config: DiscordConfig,
    formatter: MessageFormatter,
    events: EventHub,
    commands: CommandRouter,
    /// REST client of the current gateway client.
    http: RwLock<Option<Arc<Http>>>,
    /// Our own user id, known after READY.
    bot_user: RwLock<Option<UserId>>,
    /// Serenity runs each gateway event in its own task; events are queued
    /// here and emitted by a single task so per-source order holds.
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    /// Messages we deleted, so the echoed MESSAGE_DELETE is not bridged.
    own_deletions: Mutex<HashMap<MessageId, Instant>>,
}

impl DiscordHandler {
    pub fn new(config: DiscordConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            id: config.id.clone().unwrap_or_else(|| KIND.to_string()),
            formatter: MessageFormatter::from_config(config.format.as_deref()),
            config,
            events: EventHub::new(),
            commands: CommandRouter::new(),
            http: RwLock::new(None),
            bot_user: RwLock::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            own_deletions: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an inbound event for in-order emission.
    fn enqueue(&self, kind: EventKind, ctx: Context) {
        if let Err(e) = self.inbound_tx.send((kind, ctx)) {
            error!(event = kind.as_str(), "Discord inbound queue closed: {}", e);
        }
    }

    /// Emit queued events one at a time until the queue closes.
    async fn drain_inbound(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some((kind, ctx)) = rx.recv().await {
            match kind {
                EventKind::Text => process_inbound(self.as_ref(), ctx).await,
                _ => self.events.emit(kind, Arc::new(ctx)).await,
            }
        }
        debug!("Discord inbound queue drained");
    }

    fn remember_own_deletion(&self, message_id: MessageId) {
        let now = Instant::now();
        let mut deletions = self.own_deletions.lock();
        deletions.retain(|_, at| now.duration_since(*at) < OWN_DELETION_TTL);
        deletions.insert(message_id, now);
    }

    /// True (once) if `message_id` was recently deleted by us.
    fn take_own_deletion(&self, message_id: MessageId) -> bool {
        match self.own_deletions.lock().remove(&message_id) {
            Some(at) => at.elapsed() < OWN_DELETION_TTL,
            None => false,
        }
    }

    fn http(&self) -> DeliveryResult<Arc<Http>> {
        self.http
            .read()
            .clone()
            .ok_or_else(|| DeliveryError::NotConnected {
                client: self.client(),
            })
    }

    fn channel_id(&self, target: &str) -> DeliveryResult<ChannelId> {
        match target.parse::<u64>() {
            Ok(id) if id != 0 => Ok(ChannelId::new(id)),
            _ => Err(DeliveryError::InvalidTarget {
                client: self.client(),
                target: target.to_string(),
            }),
        }
    }

    fn message_id(&self, message_id: &str) -> DeliveryResult<MessageId> {
        match message_id.parse::<u64>() {
            Ok(id) if id != 0 => Ok(MessageId::new(id)),
            _ => Err(DeliveryError::InvalidMessageId {
                client: self.client(),
                message_id: message_id.to_string(),
            }),
        }
    }

    fn is_own(&self, author: UserId) -> bool {
        *self.bot_user.read() == Some(author)
    }

    async fn build_client(self: &Arc<Self>) -> anyhow::Result<Client> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILDS;

        // Build a custom reqwest client with timeout settings
        let reqwest_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let http = HttpBuilder::new(&self.config.token)
            .client(reqwest_client)
            .build();

        let client = serenity::client::ClientBuilder::new_with_http(http, intents)
            .event_handler(DiscordEvents {
                handler: self.clone(),
            })
            .await?;

        *self.http.write() = Some(client.http.clone());
        Ok(client)
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(300))
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        let inbound = self.inbound_rx.lock().take();
        let drain = match inbound {
            Some(rx) => Some(tokio::spawn(self.clone().drain_inbound(rx))),
            None => {
                warn!("Discord inbound queue already taken");
                None
            }
        };

        loop {
            if *shutdown.borrow() {
                break;
            }
            info!("Connecting to Discord...");

            let mut client = match self.build_client().await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to build Discord client: {}", e);
                    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                    warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => {}
                    }
                    continue;
                }
            };

            let shard_manager = client.shard_manager.clone();
            tokio::select! {
                result = client.start() => match result {
                    Ok(()) => {
                        info!("Discord client disconnected normally");
                        backoff = discord_backoff();
                    }
                    Err(e) => {
                        error!("Discord client error: {}", e);
                        let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                        warn!(
                            "Discord disconnected. Reconnecting in {:.1}s...",
                            delay.as_secs_f64(),
                        );
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = wait_for_shutdown(&mut shutdown) => {}
                        }
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Initiating graceful Discord shutdown...");
                    shard_manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                    break;
                }
            }
        }

        *self.http.write() = None;
        if let Some(drain) = drain {
            drain.abort();
        }
        info!("Discord task ended");
    }

    fn context(self: &Arc<Self>, msg: &Message) -> Context {
        let nick = msg
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        let handler: Arc<dyn Handler> = self.clone();
        let mut ctx = Context::new(
            &handler,
            msg.author.id.get().to_string(),
            msg.channel_id.get().to_string(),
            nick,
            msg.content.clone(),
        )
        .with_message_id(msg.id.get().to_string())
        .private(msg.guild_id.is_none())
        .with_raw(msg.clone());

        if let Some(ref replied) = msg.referenced_message {
            ctx = ctx.with_reply(ReplyInfo {
                id: Some(replied.id.get().to_string()),
                nick: replied
                    .author
                    .global_name
                    .clone()
                    .unwrap_or_else(|| replied.author.name.clone()),
                message: replied.content.clone(),
            });
        }
        for attachment in &msg.attachments {
            ctx = ctx.with_attachment(Attachment {
                kind: attachment
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "file".to_string()),
                url: Some(attachment.url.clone()),
            });
        }
        ctx
    }
}

/// Serenity event sink forwarding into the handler.
struct DiscordEvents {
    handler: Arc<DiscordHandler>,
}

#[serenity::async_trait]
impl EventHandler for DiscordEvents {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(user = %ready.user.name, "Connected to Discord");
        *self.handler.bot_user.write() = Some(ready.user.id);
    }

    async fn message(&self, _ctx: SerenityContext, msg: Message) {
        if msg.author.bot || self.handler.is_own(msg.author.id) {
            return;
        }
        if msg.content.trim().is_empty() && msg.attachments.is_empty() {
            return;
        }

        let ctx = self.handler.context(&msg);
        self.handler.enqueue(EventKind::Text, ctx);
    }

    async fn message_update(
        &self,
        _ctx: SerenityContext,
        _old_if_available: Option<Message>,
        _new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // Embed-only updates carry no content
        let (Some(content), Some(author)) = (event.content, event.author) else {
            return;
        };
        if author.bot || self.handler.is_own(author.id) {
            return;
        }

        let handler: Arc<dyn Handler> = self.handler.clone();
        let nick = author.global_name.clone().unwrap_or_else(|| author.name.clone());
        let ctx = Context::new(
            &handler,
            author.id.get().to_string(),
            event.channel_id.get().to_string(),
            nick,
            content,
        )
        .with_message_id(event.id.get().to_string())
        .private(event.guild_id.is_none());

        self.handler.enqueue(EventKind::Edit, ctx);
    }

    async fn message_delete(
        &self,
        _ctx: SerenityContext,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        if self.handler.take_own_deletion(deleted_message_id) {
            debug!(message_id = %deleted_message_id, "Ignoring our own deletion");
            return;
        }
        debug!(channel = %channel_id, message_id = %deleted_message_id, "Discord message deleted");

        let handler: Arc<dyn Handler> = self.handler.clone();
        let ctx = Context::new(&handler, "", channel_id.get().to_string(), "", "")
            .with_message_id(deleted_message_id.get().to_string())
            .private(guild_id.is_none());

        self.handler.enqueue(EventKind::Delete, ctx);
    }
}

#[async_trait]
impl Handler for DiscordHandler {
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
        let channel = self.channel_id(target)?;
        let http = self.http()?;
        let reply_to = options
            .reply_to
            .as_ref()
            .and_then(|r| r.message_id.as_deref())
            .and_then(|id| self.message_id(id).ok());

        let rendered = self.formatter.render(text, options, true);
        let mut first_id = None;
        for chunk in split_message(&rendered, MAX_MESSAGE_BYTES) {
            let mut message = CreateMessage::new()
                .content(chunk)
                .allowed_mentions(CreateAllowedMentions::new());
            if let (None, Some(reply)) = (first_id, reply_to) {
                message = message.reference_message((channel, reply));
            }
            let sent = channel.send_message(&http, message).await?;
            first_id.get_or_insert(sent.id);
        }

        first_id
            .map(|id| id.get().to_string())
            .ok_or_else(|| DeliveryError::SendFailed {
                client: self.client(),
                message: "empty message".to_string(),
            })
    }

    async fn edit(
        &self,
        target: &str,
        message_id: &str,
        text: &str,
        options: &SayOptions,
    ) -> DeliveryResult<()> {
        let channel = self.channel_id(target)?;
        let message_id = self.message_id(message_id)?;
        let http = self.http()?;
        let rendered = self.formatter.render(text, options, true);
        channel
            .edit_message(&http, message_id, EditMessage::new().content(rendered))
            .await?;
        Ok(())
    }

    async fn delete(&self, target: &str, message_id: &str) -> DeliveryResult<()> {
        let channel = self.channel_id(target)?;
        let message_id = self.message_id(message_id)?;
        let http = self.http()?;
        // The gateway may echo the deletion before the REST call returns
        self.remember_own_deletion(message_id);
        channel.delete_message(&http, message_id).await?;
        Ok(())
    }

    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::events::callback;

    fn handler() -> DiscordHandler {
        DiscordHandler::new(DiscordConfig {
            token: "token".to_string(),
            id: Some("dc".to_string()),
            aliases: Vec::new(),
            format: None,
        })
    }

    #[test]
    fn test_identity() {
        let handler = handler();
        assert_eq!(handler.id(), "dc");
        assert_eq!(handler.kind(), "Discord");
        assert_eq!(handler.client(), "discord");
        assert_eq!(handler.triggers(), &['!']);
    }

    #[test]
    fn test_ids_must_be_non_zero_numbers() {
        let handler = handler();
        assert_eq!(handler.channel_id("200").unwrap(), ChannelId::new(200));
        assert!(handler.channel_id("0").is_err());
        assert!(handler.channel_id("#general").is_err());
        assert!(matches!(
            handler.message_id("0"),
            Err(DeliveryError::InvalidMessageId { .. })
        ));
    }

    #[tokio::test]
    async fn test_say_before_connect_fails() {
        let handler = handler();
        let result = handler.say("200", "hi", &SayOptions::default()).await;
        assert!(matches!(result, Err(DeliveryError::NotConnected { .. })));
    }

    #[test]
    fn test_own_messages_recognized() {
        let handler = handler();
        assert!(!handler.is_own(UserId::new(5)));
        *handler.bot_user.write() = Some(UserId::new(5));
        assert!(handler.is_own(UserId::new(5)));
        assert!(!handler.is_own(UserId::new(6)));
    }

    #[tokio::test]
    async fn test_inbound_events_emitted_in_arrival_order() {
        let handler = Arc::new(handler());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Text, EventKind::Edit, EventKind::Delete] {
            let sink = seen.clone();
            handler.on(
                kind,
                callback(move |ctx| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().push(format!("{}:{}", kind.as_str(), ctx.message_id));
                        Ok(())
                    }
                }),
            );
        }

        let dyn_handler: Arc<dyn Handler> = handler.clone();
        let ctx = |id: &str, text: &str| {
            Context::new(&dyn_handler, "1", "200", "bob", text).with_message_id(id)
        };
        handler.enqueue(EventKind::Text, ctx("10", "first"));
        handler.enqueue(EventKind::Text, ctx("11", "second"));
        handler.enqueue(EventKind::Edit, ctx("10", "first, edited"));
        handler.enqueue(EventKind::Delete, ctx("11", ""));

        let mut rx = handler.inbound_rx.lock().take().unwrap();
        rx.close();
        handler.clone().drain_inbound(rx).await;

        assert_eq!(
            *seen.lock(),
            vec!["text:10", "text:11", "edit:10", "delete:11"]
        );
    }

    #[test]
    fn test_own_deletion_is_consumed_once() {
        let handler = handler();
        handler.remember_own_deletion(MessageId::new(42));

        assert!(!handler.take_own_deletion(MessageId::new(43)));
        assert!(handler.take_own_deletion(MessageId::new(42)));
        assert!(!handler.take_own_deletion(MessageId::new(42)));
    }

    #[tokio::test]
    async fn test_offline_delete_is_not_remembered() {
        let handler = handler();
        // No gateway, so no echo will ever arrive for this id
        assert!(handler.delete("200", "42").await.is_err());
        assert!(!handler.own_deletions.lock().contains_key(&MessageId::new(42)));
    }
}
