//! Platform handler abstraction.
//!
//! A handler wraps one chat platform client: it normalizes inbound events
//! into [`Context`]s, runs commands, emits [`EventKind`] events and exposes
//! outbound `say`/`edit`/`delete`.

pub mod command;
pub mod context;
pub mod discord;
pub mod events;
pub mod format;
pub mod irc;
#[cfg(test)]
pub mod mock;
pub mod registry;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::common::error::{ConfigError, DeliveryError, DeliveryResult};

pub use command::{CommandOptions, CommandRouter};
pub use context::{Attachment, Context, Extra, ReplyInfo};
pub use events::{callback, Callback, EventHub, EventKind};
pub use registry::HandlerRegistry;

/// The message a bridged message replies to, as seen by one destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyTarget {
    /// The destination's own copy of the replied-to message, when known.
    pub message_id: Option<String>,
    pub nick: String,
    pub text: String,
}

/// Options for an outbound message.
#[derive(Debug, Clone, Default)]
pub struct SayOptions {
    /// Prefix the text with this nick using the handler's format.
    pub with_nick: Option<String>,
    /// Suppress the nick prefix even when `with_nick` is set.
    pub no_prefix: bool,
    /// Origin client name, substituted for `%client`.
    pub origin: Option<String>,
    pub reply_to: Option<ReplyTarget>,
}

/// One chat platform.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Configured id, defaults to the platform type.
    fn id(&self) -> &str;

    /// Platform type ("IRC", "Telegram", "Discord").
    fn kind(&self) -> &'static str;

    /// Extra names accepted as the client part of a UID.
    fn aliases(&self) -> &[String];

    fn events(&self) -> &EventHub;

    fn commands(&self) -> &CommandRouter;

    /// Characters that start a command.
    fn triggers(&self) -> &[char] {
        &['!']
    }

    /// Bot account name, used to accept `/cmd@name` style commands.
    fn bot_name(&self) -> Option<String> {
        None
    }

    /// Canonical client name used in UIDs.
    fn client(&self) -> String {
        self.kind().to_lowercase()
    }

    /// Subscribe to a normalized event.
    fn on(&self, kind: EventKind, callback: Callback) {
        self.events().on(kind, callback);
    }

    fn add_command(
        &self,
        name: &str,
        callback: Callback,
        options: CommandOptions,
    ) -> Result<(), ConfigError> {
        self.commands().add(name, callback, options)
    }

    fn alias_command(&self, alias: &str, name: &str) -> Result<(), ConfigError> {
        self.commands().alias(alias, name)
    }

    /// Send `text` to `target`. Resolves to the platform message id.
    async fn say(&self, target: &str, text: &str, options: &SayOptions) -> DeliveryResult<String>;

    /// Replace the text of a message previously sent by this handler.
    async fn edit(
        &self,
        _target: &str,
        _message_id: &str,
        _text: &str,
        _options: &SayOptions,
    ) -> DeliveryResult<()> {
        Err(DeliveryError::Unsupported {
            client: self.client(),
            operation: "edit",
        })
    }

    /// Delete a message previously sent by this handler.
    async fn delete(&self, _target: &str, _message_id: &str) -> DeliveryResult<()> {
        Err(DeliveryError::Unsupported {
            client: self.client(),
            operation: "delete",
        })
    }

    /// Connect and run until `shutdown` flips to true.
    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()>;
}

/// Resolve once the shutdown flag is set (or its sender is gone).
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Route one normalized inbound message: run it as a command if it is one
/// this handler knows, otherwise emit it as a text event.
pub async fn process_inbound(handler: &dyn Handler, mut ctx: Context) {
    let bot_name = handler.bot_name();
    if let Some((name, param)) = CommandRouter::parse(&ctx.text, handler.triggers(), bot_name.as_deref()) {
        ctx.command = Some(name);
        ctx.param = param;
    }
    let ctx = Arc::new(ctx);

    if ctx.command.is_some() {
        match handler.commands().dispatch(&ctx).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!(
                    client = %ctx.client,
                    message_id = %ctx.message_id,
                    command = ?ctx.command,
                    "Command failed: {:#}",
                    e
                );
                return;
            }
        }
    }

    debug!(
        client = %ctx.client,
        to = %ctx.to,
        message_id = %ctx.message_id,
        "Inbound message"
    );
    handler.events().emit(EventKind::Text, ctx).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::mock::MockHandler;
    use parking_lot::Mutex;

    fn recorder(handler: &Arc<dyn Handler>, kind: EventKind) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        handler.on(
            kind,
            callback(move |ctx| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(ctx.text.clone());
                    Ok(())
                }
            }),
        );
        seen
    }

    #[tokio::test]
    async fn test_plain_text_is_emitted() {
        let handler = MockHandler::new("IRC").into_dyn();
        let seen = recorder(&handler, EventKind::Text);

        let ctx = Context::new(&handler, "alice", "#test", "alice", "hello");
        process_inbound(handler.as_ref(), ctx).await;

        assert_eq!(*seen.lock(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_handled_command_is_not_emitted() {
        let handler = MockHandler::new("IRC").into_dyn();
        let seen = recorder(&handler, EventKind::Text);
        handler
            .add_command("ping", callback(|_| async { Ok(()) }), CommandOptions::default())
            .unwrap();

        let ctx = Context::new(&handler, "alice", "#test", "alice", "!ping");
        process_inbound(handler.as_ref(), ctx).await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_or_filtered_command_is_emitted_as_text() {
        let handler = MockHandler::new("IRC").into_dyn();
        let seen = recorder(&handler, EventKind::Text);
        handler
            .add_command(
                "ping",
                callback(|_| async { Ok(()) }),
                CommandOptions {
                    allowed_clients: Some(vec!["discord".to_string()]),
                },
            )
            .unwrap();

        for text in ["!ping", "!unknown"] {
            let ctx = Context::new(&handler, "alice", "#test", "alice", text);
            process_inbound(handler.as_ref(), ctx).await;
        }

        assert_eq!(*seen.lock(), vec!["!ping", "!unknown"]);
    }

    #[derive(Default)]
    struct Bare {
        events: EventHub,
        commands: CommandRouter,
    }

    #[async_trait]
    impl Handler for Bare {
        fn id(&self) -> &str {
            "bare"
        }
        fn kind(&self) -> &'static str {
            "Bare"
        }
        fn aliases(&self) -> &[String] {
            &[]
        }
        fn events(&self) -> &EventHub {
            &self.events
        }
        fn commands(&self) -> &CommandRouter {
            &self.commands
        }
        async fn say(&self, _target: &str, _text: &str, _options: &SayOptions) -> DeliveryResult<String> {
            Ok("1".to_string())
        }
        fn spawn(self: Arc<Self>, _shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
            tokio::spawn(async {})
        }
    }

    #[tokio::test]
    async fn test_default_edit_and_delete_unsupported() {
        let handler = Bare::default();
        assert_eq!(handler.client(), "bare");

        let result = handler.edit("#test", "1", "x", &SayOptions::default()).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Unsupported { operation: "edit", .. })
        ));
        let result = handler.delete("#test", "1").await;
        assert!(matches!(
            result,
            Err(DeliveryError::Unsupported { operation: "delete", .. })
        ));
    }
}
