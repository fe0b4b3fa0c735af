//! Protocol-neutral bridged message.

use std::sync::Arc;

use tracing::debug;

use crate::handler::{Attachment, Context, Extra, ReplyInfo};

use super::rooms::RoomRouter;
use super::uid::Uid;

/// Caller-supplied changes applied while building a [`BridgeMessage`].
#[derive(Debug, Clone, Default)]
pub struct MessageOverrides {
    /// Mark the message as a notice: `bridge.send` hooks are skipped and no
    /// nick prefix is added.
    pub is_notice: bool,
    /// Deliver without the nick prefix.
    pub no_prefix: bool,
    /// Replacement text.
    pub text: Option<String>,
}

/// A message on its way through the bridge.
///
/// Built once per inbound message; routing fields delegate to the
/// originating [`Context`].
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    context: Arc<Context>,
    origin: Uid,
    text: String,
    is_notice: bool,
    no_prefix: bool,
    extra: Extra,
}

impl BridgeMessage {
    /// Build a message from an inbound context, resolving its destinations.
    pub fn from_context(
        context: Arc<Context>,
        overrides: MessageOverrides,
        rooms: &RoomRouter,
    ) -> Self {
        let origin = context.to_uid();
        let mut extra = context.extra.clone();
        extra.map_to = rooms.destinations(&origin);

        if extra.map_to.is_empty() {
            debug!(
                origin = %origin,
                message_id = %context.message_id,
                in_group = rooms.is_bridged(&origin),
                "Origin room has no destinations"
            );
        }

        Self {
            text: overrides.text.unwrap_or_else(|| context.text.clone()),
            is_notice: overrides.is_notice,
            no_prefix: overrides.no_prefix,
            origin,
            extra,
            context,
        }
    }

    /// Room the message was posted in.
    pub fn origin(&self) -> &Uid {
        &self.origin
    }

    pub fn client(&self) -> &str {
        &self.context.client
    }

    pub fn from(&self) -> &str {
        &self.context.from
    }

    pub fn to(&self) -> &str {
        &self.context.to
    }

    pub fn nick(&self) -> &str {
        &self.context.nick
    }

    pub fn message_id(&self) -> &str {
        &self.context.message_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_notice(&self) -> bool {
        self.is_notice
    }

    pub fn no_prefix(&self) -> bool {
        self.no_prefix
    }

    /// Destination rooms in delivery order.
    pub fn map_to(&self) -> &[Uid] {
        &self.extra.map_to
    }

    pub fn reply(&self) -> Option<&ReplyInfo> {
        self.extra.reply.as_ref()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.extra.attachments
    }

    /// Text as delivered: the message text followed by attachment links.
    pub fn rendered_text(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(1 + self.attachments().len());
        if !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        for attachment in self.attachments() {
            match attachment.url {
                Some(ref url) => parts.push(url.clone()),
                None => parts.push(format!("[{}]", attachment.kind)),
            }
        }
        parts.join(" ")
    }
}
