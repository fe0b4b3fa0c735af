//! Normalized representation of one inbound platform event.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::bridge::uid::Uid;
use crate::common::error::{DeliveryError, DeliveryResult};

use super::{Handler, SayOptions};

/// Information about the message an inbound message replies to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyInfo {
    /// Message id of the replied-to message on the origin platform.
    pub id: Option<String>,
    /// Display name of the replied-to message's author.
    pub nick: String,
    /// Text of the replied-to message.
    pub message: String,
}

/// A file or media item attached to an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Kind of attachment ("photo", "sticker", "file", ...).
    pub kind: String,
    /// Public URL, when the platform provides one.
    pub url: Option<String>,
}

/// Auxiliary fields of a message.
#[derive(Debug, Clone, Default)]
pub struct Extra {
    pub reply: Option<ReplyInfo>,
    /// Bridge destinations, filled in when a bridge message is built.
    pub map_to: Vec<Uid>,
    pub attachments: Vec<Attachment>,
}

/// One inbound event, normalized.
///
/// Holds only a weak reference to its handler: the context never keeps a
/// handler alive.
pub struct Context {
    handler: Weak<dyn Handler>,
    /// Canonical (lower-cased) client name of the origin.
    pub client: String,
    /// Sender id.
    pub from: String,
    /// Room id (for private messages: the conversation partner).
    pub to: String,
    /// Sender display name.
    pub nick: String,
    pub text: String,
    pub message_id: String,
    pub is_private: bool,
    /// Command name, when the message was command-shaped.
    pub command: Option<String>,
    /// Command argument.
    pub param: Option<String>,
    pub extra: Extra,
    raw: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new(
        handler: &Arc<dyn Handler>,
        from: impl Into<String>,
        to: impl Into<String>,
        nick: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            handler: Arc::downgrade(handler),
            client: handler.client(),
            from: from.into(),
            to: to.into(),
            nick: nick.into(),
            text: text.into(),
            message_id: String::new(),
            is_private: false,
            command: None,
            param: None,
            extra: Extra::default(),
            raw: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    pub fn with_reply(mut self, reply: ReplyInfo) -> Self {
        self.extra.reply = Some(reply);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.extra.attachments.push(attachment);
        self
    }

    pub fn with_raw<T: Any + Send + Sync>(mut self, raw: T) -> Self {
        self.raw = Some(Arc::new(raw));
        self
    }

    /// The owning handler, if it is still alive.
    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.upgrade()
    }

    /// The original platform event, if it has type `T`.
    #[allow(dead_code)]
    pub fn raw<T: Any>(&self) -> Option<&T> {
        self.raw.as_deref().and_then(|raw| raw.downcast_ref::<T>())
    }

    /// Address of the room the message was sent to.
    pub fn to_uid(&self) -> Uid {
        Uid::new(&self.client, self.to.clone())
    }

    /// Send a plain message back to the room this event came from.
    pub async fn reply(&self, text: &str) -> DeliveryResult<String> {
        let handler = self.handler().ok_or_else(|| DeliveryError::NotConnected {
            client: self.client.clone(),
        })?;
        handler.say(&self.to, text, &SayOptions::default()).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("client", &self.client)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("nick", &self.nick)
            .field("text", &self.text)
            .field("message_id", &self.message_id)
            .field("is_private", &self.is_private)
            .field("command", &self.command)
            .field("param", &self.param)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}
