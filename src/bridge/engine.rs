//! The bridge engine: fans messages out across bridged rooms.
//!
//! For every text event a handler emits, the engine builds a
//! [`BridgeMessage`], resolves its destinations, runs the `bridge.send`
//! hooks, dispatches to every destination handler concurrently, records the
//! resulting message association and finally runs the `bridge.sent` hooks.
//! Edits and deletions on trackable platforms are applied to every sibling
//! copy found in the association store.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::association::{is_trackable, AssociatedMessage, AssociationStore, MessageAssociation};
use crate::common::error::AssociationError;
use crate::handler::{callback, Context, EventKind, Handler, HandlerRegistry, ReplyTarget, SayOptions};

use super::hooks::{HookRegistry, Rejection};
use super::message::{BridgeMessage, MessageOverrides};
use super::rooms::RoomRouter;
use super::uid::Uid;

/// One successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: Uid,
    /// Message id assigned by the destination platform.
    pub message_id: String,
}

/// Per-destination outcome of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<Delivery>,
    /// Destinations whose handler returned an error.
    pub failed: Vec<Uid>,
    /// Destinations with no registered handler.
    pub skipped: Vec<Uid>,
}

#[derive(Debug)]
pub enum BridgeOutcome {
    /// Private, unmapped or otherwise ineligible.
    NotBridged,
    Rejected(Rejection),
    Delivered(DeliveryReport),
}

impl BridgeOutcome {
    pub fn report(&self) -> Option<&DeliveryReport> {
        match self {
            BridgeOutcome::Delivered(report) => Some(report),
            _ => None,
        }
    }
}

pub struct BridgeEngine {
    handlers: Arc<HandlerRegistry>,
    rooms: RoomRouter,
    hooks: HookRegistry,
    associations: Arc<dyn AssociationStore>,
}

impl BridgeEngine {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        rooms: RoomRouter,
        hooks: HookRegistry,
        associations: Arc<dyn AssociationStore>,
    ) -> Self {
        Self {
            handlers,
            rooms,
            hooks,
            associations,
        }
    }

    /// Subscribe to text, edit and delete events of every registered
    /// handler. Subscriptions hold the engine weakly.
    pub fn attach(self: &Arc<Self>) {
        for handler in self.handlers.iter() {
            self.subscribe(handler, EventKind::Text, |engine, ctx| async move {
                let message_id = ctx.message_id.clone();
                let outcome = engine.handle_text(ctx).await;
                debug!(
                    message_id = %message_id,
                    delivered = outcome.report().map_or(0, |r| r.delivered.len()),
                    "Text event handled"
                );
            });
            self.subscribe(handler, EventKind::Edit, |engine, ctx| async move {
                engine.handle_edit(ctx).await;
            });
            self.subscribe(handler, EventKind::Delete, |engine, ctx| async move {
                engine.handle_delete(ctx).await;
            });
            self.subscribe(handler, EventKind::Notice, |engine, ctx| async move {
                let text = ctx.text.clone();
                engine.send_notice(ctx, &text).await;
            });
            debug!(
                client = %handler.client(),
                text_subscribers = handler.events().subscriber_count(EventKind::Text),
                "Bridge attached"
            );
        }
    }

    fn subscribe<F, Fut>(self: &Arc<Self>, handler: &Arc<dyn Handler>, kind: EventKind, f: F)
    where
        F: Fn(Arc<BridgeEngine>, Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::downgrade(self);
        let f = Arc::new(f);
        handler.on(
            kind,
            callback(move |ctx| {
                let engine = engine.upgrade();
                let f = f.clone();
                async move {
                    if let Some(engine) = engine {
                        f(engine, ctx).await;
                    }
                    Ok(())
                }
            }),
        );
    }

    /// Bridge an inbound text message.
    pub async fn handle_text(&self, ctx: Arc<Context>) -> BridgeOutcome {
        if ctx.is_private {
            debug!(
                client = %ctx.client,
                message_id = %ctx.message_id,
                "Private message, not bridging"
            );
            return BridgeOutcome::NotBridged;
        }
        let message = BridgeMessage::from_context(ctx, MessageOverrides::default(), &self.rooms);
        self.send(&message).await
    }

    /// Bridge a bot-generated notice into every room bridged with the
    /// origin's room. Notices skip `bridge.send` hooks and carry no nick.
    pub async fn send_notice(&self, origin: Arc<Context>, text: &str) -> BridgeOutcome {
        let message = BridgeMessage::from_context(
            origin,
            MessageOverrides {
                is_notice: true,
                no_prefix: true,
                text: Some(text.to_string()),
            },
            &self.rooms,
        );
        self.send(&message).await
    }

    /// Run hooks, dispatch to every destination and record the association.
    pub async fn send(&self, message: &BridgeMessage) -> BridgeOutcome {
        if message.map_to().is_empty() {
            return BridgeOutcome::NotBridged;
        }

        if !message.is_notice() {
            if let Some(rejection) = self.hooks.run_veto(message).await {
                return BridgeOutcome::Rejected(rejection);
            }
        }

        let replied = self.replied_association(message).await;
        let text = message.rendered_text();

        let mut report = DeliveryReport::default();
        let mut sends = Vec::with_capacity(message.map_to().len());
        for destination in message.map_to() {
            let Some(handler) = self.handlers.get(destination.client()) else {
                warn!(
                    stage = "dispatch",
                    destination = %destination,
                    message_id = message.message_id(),
                    "No handler for destination, skipping"
                );
                report.skipped.push(destination.clone());
                continue;
            };
            let options = self.say_options(message, destination, replied.as_ref());
            let text = text.as_str();
            sends.push(async move {
                let result = handler.say(destination.id(), text, &options).await;
                (destination, result)
            });
        }

        for (destination, result) in join_all(sends).await {
            match result {
                Ok(message_id) => {
                    debug!(
                        destination = %destination,
                        message_id = %message_id,
                        "Delivered"
                    );
                    report.delivered.push(Delivery {
                        destination: destination.clone(),
                        message_id,
                    });
                }
                Err(e) => {
                    error!(
                        stage = "dispatch",
                        client = message.client(),
                        destination = %destination,
                        message_id = message.message_id(),
                        "Failed to deliver message: {}",
                        e
                    );
                    report.failed.push(destination.clone());
                }
            }
        }

        self.record_association(message, &report).await;
        self.hooks.notify_sent(message, &report).await;

        info!(
            client = message.client(),
            origin = %message.origin(),
            message_id = message.message_id(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Message bridged"
        );
        BridgeOutcome::Delivered(report)
    }

    fn say_options(
        &self,
        message: &BridgeMessage,
        destination: &Uid,
        replied: Option<&MessageAssociation>,
    ) -> SayOptions {
        SayOptions {
            with_nick: (!message.is_notice()).then(|| message.nick().to_string()),
            no_prefix: message.no_prefix(),
            origin: Some(message.client().to_string()),
            reply_to: message.reply().map(|reply| ReplyTarget {
                message_id: replied
                    .and_then(|a| a.find(destination.client(), destination.id()))
                    .map(|copy| copy.message_id.clone()),
                nick: reply.nick.clone(),
                text: reply.message.clone(),
            }),
        }
    }

    /// The association of the message being replied to, if tracked.
    async fn replied_association(&self, message: &BridgeMessage) -> Option<MessageAssociation> {
        let reply_id = message.reply()?.id.as_deref()?;
        if !is_trackable(message.client()) {
            return None;
        }
        match self
            .associations
            .get(message.client(), message.to(), reply_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    stage = "associate",
                    client = message.client(),
                    message_id = message.message_id(),
                    "Failed to look up replied message: {}",
                    e
                );
                None
            }
        }
    }

    /// Store the trackable copies of a delivered message. Needs at least
    /// two copies to be useful.
    async fn record_association(&self, message: &BridgeMessage, report: &DeliveryReport) {
        let mut copies = Vec::new();
        if is_trackable(message.client()) && !message.message_id().is_empty() {
            copies.push(AssociatedMessage::new(
                message.client(),
                message.to(),
                message.message_id(),
            ));
        }
        for delivery in &report.delivered {
            if is_trackable(delivery.destination.client()) {
                copies.push(AssociatedMessage::new(
                    delivery.destination.client(),
                    delivery.destination.id(),
                    delivery.message_id.clone(),
                ));
            }
        }
        if copies.len() < 2 {
            return;
        }

        match self.associations.set(&MessageAssociation::new(copies)).await {
            Ok(()) => {}
            Err(AssociationError::Disabled) => {
                debug!(message_id = message.message_id(), "Message association disabled");
            }
            Err(e) => {
                warn!(
                    stage = "associate",
                    client = message.client(),
                    message_id = message.message_id(),
                    "Failed to record message association: {}",
                    e
                );
            }
        }
    }

    async fn lookup(&self, ctx: &Context) -> Option<MessageAssociation> {
        if !is_trackable(&ctx.client) {
            return None;
        }
        match self
            .associations
            .get(&ctx.client, &ctx.to, &ctx.message_id)
            .await
        {
            Ok(Some(association)) => Some(association),
            Ok(None) => {
                debug!(
                    client = %ctx.client,
                    message_id = %ctx.message_id,
                    "No association for message"
                );
                None
            }
            Err(e) => {
                warn!(
                    stage = "associate",
                    client = %ctx.client,
                    message_id = %ctx.message_id,
                    "Failed to look up message association: {}",
                    e
                );
                None
            }
        }
    }

    /// Apply an edit to every other copy of the message.
    pub async fn handle_edit(&self, ctx: Arc<Context>) -> BridgeOutcome {
        let Some(association) = self.lookup(&ctx).await else {
            return BridgeOutcome::NotBridged;
        };
        let message = BridgeMessage::from_context(ctx.clone(), MessageOverrides::default(), &self.rooms);
        if let Some(rejection) = self.hooks.run_veto(&message).await {
            return BridgeOutcome::Rejected(rejection);
        }

        let text = message.rendered_text();
        let options = SayOptions {
            with_nick: Some(message.nick().to_string()),
            no_prefix: message.no_prefix(),
            origin: Some(message.client().to_string()),
            reply_to: None,
        };

        let mut report = DeliveryReport::default();
        let mut edits = Vec::new();
        for copy in association.siblings(&ctx.client, &ctx.to) {
            let destination = Uid::new(&copy.client, copy.chat_id.clone());
            let Some(handler) = self.handlers.get(&copy.client) else {
                report.skipped.push(destination);
                continue;
            };
            let (text, options) = (text.as_str(), &options);
            edits.push(async move {
                let result = handler
                    .edit(&copy.chat_id, &copy.message_id, text, options)
                    .await;
                (destination, copy, result)
            });
        }

        for (destination, copy, result) in join_all(edits).await {
            match result {
                Ok(()) => report.delivered.push(Delivery {
                    destination,
                    message_id: copy.message_id.clone(),
                }),
                Err(e) => {
                    error!(
                        stage = "edit",
                        destination = %destination,
                        message_id = %copy.message_id,
                        "Failed to edit message: {}",
                        e
                    );
                    report.failed.push(destination);
                }
            }
        }

        info!(
            client = %ctx.client,
            message_id = %ctx.message_id,
            edited = report.delivered.len(),
            "Edit bridged"
        );
        BridgeOutcome::Delivered(report)
    }

    /// Delete every other copy of the message.
    pub async fn handle_delete(&self, ctx: Arc<Context>) -> BridgeOutcome {
        let Some(association) = self.lookup(&ctx).await else {
            return BridgeOutcome::NotBridged;
        };

        let mut report = DeliveryReport::default();
        let mut deletions = Vec::new();
        for copy in association.siblings(&ctx.client, &ctx.to) {
            let destination = Uid::new(&copy.client, copy.chat_id.clone());
            let Some(handler) = self.handlers.get(&copy.client) else {
                report.skipped.push(destination);
                continue;
            };
            deletions.push(async move {
                let result = handler.delete(&copy.chat_id, &copy.message_id).await;
                (destination, copy, result)
            });
        }

        for (destination, copy, result) in join_all(deletions).await {
            match result {
                Ok(()) => report.delivered.push(Delivery {
                    destination,
                    message_id: copy.message_id.clone(),
                }),
                Err(e) => {
                    error!(
                        stage = "delete",
                        destination = %destination,
                        message_id = %copy.message_id,
                        "Failed to delete message: {}",
                        e
                    );
                    report.failed.push(destination);
                }
            }
        }

        info!(
            client = %ctx.client,
            message_id = %ctx.message_id,
            deleted = report.delivered.len(),
            "Deletion bridged"
        );
        BridgeOutcome::Delivered(report)
    }
}
