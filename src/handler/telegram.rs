//! Telegram handler built on teloxide long polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use parking_lot::RwLock;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::common::error::{ConfigError, DeliveryError, DeliveryResult};
use crate::config::{Config, TelegramConfig};

use super::format::{split_message, MessageFormatter};
use super::{
    process_inbound, wait_for_shutdown, Attachment, CommandRouter, Context, EventHub, EventKind,
    Handler, ReplyInfo, SayOptions,
};

pub const KIND: &str = "Telegram";

/// Telegram rejects messages above 4096 characters; bytes are a safe bound.
const MAX_MESSAGE_BYTES: usize = 4096;

/// Must exceed the long-polling timeout so requests are not cut short.
const HTTP_TIMEOUT: Duration = Duration::from_secs(45);

/// Build the Telegram handler if `clients.telegram` is configured.
pub fn build(config: &Config) -> Result<Option<Arc<dyn Handler>>, ConfigError> {
    match config.clients.telegram {
        Some(ref telegram) => Ok(Some(Arc::new(TelegramHandler::new(telegram.clone())?))),
        None => Ok(None),
    }
}

pub struct TelegramHandler {
    id: String,
    config: TelegramConfig,
    bot: Bot,
    formatter: MessageFormatter,
    events: EventHub,
    commands: CommandRouter,
    /// Filled in from `getMe` once connected.
    username: RwLock<Option<String>>,
}

impl TelegramHandler {
    pub fn new(config: TelegramConfig) -> Result<Self, ConfigError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "clients.telegram".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            id: config.id.clone().unwrap_or_else(|| KIND.to_string()),
            bot: Bot::with_client(config.token.clone(), client),
            formatter: MessageFormatter::from_config(config.format.as_deref()),
            config,
            events: EventHub::new(),
            commands: CommandRouter::new(),
            username: RwLock::new(None),
        })
    }

    fn chat_id(&self, target: &str) -> DeliveryResult<ChatId> {
        target
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| DeliveryError::InvalidTarget {
                client: self.client(),
                target: target.to_string(),
            })
    }

    fn message_id(&self, message_id: &str) -> DeliveryResult<MessageId> {
        message_id
            .parse::<i32>()
            .map(MessageId)
            .map_err(|_| DeliveryError::InvalidMessageId {
                client: self.client(),
                message_id: message_id.to_string(),
            })
    }

    /// Ask Telegram who we are, retrying until it answers or shutdown.
    async fn connect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = backon::ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(5))
            .with_max_delay(Duration::from_secs(300))
            .with_jitter()
            .without_max_times()
            .build();

        loop {
            info!("Connecting to Telegram...");
            match self.bot.get_me().await {
                Ok(me) => {
                    info!(username = ?me.username, "Connected to Telegram");
                    *self.username.write() = me.username.clone();
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                    error!("Telegram getMe failed: {}", e);
                    warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_for_shutdown(shutdown) => return false,
                    }
                }
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.connect(&mut shutdown).await {
            return;
        }

        let schema = dptree::entry()
            .branch(Update::filter_message().endpoint(on_message))
            .branch(Update::filter_edited_message().endpoint(on_edited_message));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), schema)
            .dependencies(dptree::deps![self.clone()])
            .default_handler(|upd| async move {
                debug!(update_id = ?upd.id, "Unhandled Telegram update");
            })
            .error_handler(LoggingErrorHandler::with_custom_text("Telegram dispatcher error"))
            .build();

        let token = dispatcher.shutdown_token();
        let watcher = tokio::spawn(async move {
            wait_for_shutdown(&mut shutdown).await;
            info!("Stopping Telegram dispatcher");
            if let Ok(done) = token.shutdown() {
                done.await;
            }
        });

        dispatcher.dispatch().await;
        watcher.abort();
        info!("Telegram task ended");
    }

    /// Normalize a Telegram message. Returns `None` for messages without a
    /// human sender.
    fn context(self: &Arc<Self>, msg: &Message) -> Option<Context> {
        let user = msg.from.as_ref()?;
        if user.is_bot {
            return None;
        }

        let mut attachments = Vec::new();
        if msg.photo().is_some() {
            attachments.push(media("photo"));
        }
        if msg.sticker().is_some() {
            attachments.push(media("sticker"));
        }
        if msg.document().is_some() {
            attachments.push(media("file"));
        }

        let text = match msg.text().or_else(|| msg.caption()) {
            Some(text) => text.to_string(),
            None if !attachments.is_empty() => String::new(),
            None => return None,
        };

        let handler: Arc<dyn Handler> = self.clone();
        let mut ctx = Context::new(
            &handler,
            user.id.0.to_string(),
            msg.chat.id.0.to_string(),
            user.full_name(),
            text,
        )
        .with_message_id(msg.id.0.to_string())
        .private(msg.chat.is_private())
        .with_raw(msg.clone());

        if let Some(replied) = msg.reply_to_message() {
            ctx = ctx.with_reply(ReplyInfo {
                id: Some(replied.id.0.to_string()),
                nick: replied
                    .from
                    .as_ref()
                    .map(|u| u.full_name())
                    .unwrap_or_default(),
                message: replied
                    .text()
                    .or_else(|| replied.caption())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        for attachment in attachments {
            ctx = ctx.with_attachment(attachment);
        }
        Some(ctx)
    }
}

fn media(kind: &str) -> Attachment {
    Attachment {
        kind: kind.to_string(),
        url: None,
    }
}

async fn on_message(msg: Message, handler: Arc<TelegramHandler>) -> ResponseResult<()> {
    if let Some(ctx) = handler.context(&msg) {
        process_inbound(handler.as_ref(), ctx).await;
    }
    Ok(())
}

async fn on_edited_message(msg: Message, handler: Arc<TelegramHandler>) -> ResponseResult<()> {
    if let Some(ctx) = handler.context(&msg) {
        handler.events.emit(EventKind::Edit, Arc::new(ctx)).await;
    }
    Ok(())
}

#[async_trait]
impl Handler for TelegramHandler {
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

    fn triggers(&self) -> &[char] {
        &['/']
    }

    fn bot_name(&self) -> Option<String> {
        self.username.read().clone()
    }

    async fn say(&self, target: &str, text: &str, options: &SayOptions) -> DeliveryResult<String> {
        let chat_id = self.chat_id(target)?;
        let reply_to = options
            .reply_to
            .as_ref()
            .and_then(|r| r.message_id.as_deref())
            .and_then(|id| id.parse::<i32>().ok())
            .map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply());

        let rendered = self.formatter.render(text, options, true);
        let mut first_id = None;
        for chunk in split_message(&rendered, MAX_MESSAGE_BYTES) {
            let mut request = self.bot.send_message(chat_id, chunk);
            if first_id.is_none() {
                if let Some(ref reply) = reply_to {
                    request = request.reply_parameters(reply.clone());
                }
            }
            let sent = request.await?;
            first_id.get_or_insert(sent.id.0);
        }

        first_id
            .map(|id| id.to_string())
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
        let chat_id = self.chat_id(target)?;
        let message_id = self.message_id(message_id)?;
        let rendered = self.formatter.render(text, options, true);
        self.bot
            .edit_message_text(chat_id, message_id, rendered)
            .await?;
        Ok(())
    }

    async fn delete(&self, target: &str, message_id: &str) -> DeliveryResult<()> {
        let chat_id = self.chat_id(target)?;
        let message_id = self.message_id(message_id)?;
        self.bot.delete_message(chat_id, message_id).await?;
        Ok(())
    }

    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
