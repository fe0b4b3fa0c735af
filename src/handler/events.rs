//! Normalized event subscription for a handler.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::warn;

use super::context::Context;

/// Async callback invoked with an inbound context.
pub type Callback = Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Kinds of normalized events a handler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new text message.
    Text,
    /// A previously sent message was edited.
    Edit,
    /// A previously sent message was deleted.
    Delete,
    /// Something the platform reported on its own, e.g. a topic change.
    Notice,
}

/// Parses an event name, accepting the platform-style synonyms too.
impl FromStr for EventKind {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "text" | "message" => Ok(Self::Text),
            "edit" | "edited" | "message_update" => Ok(Self::Edit),
            "delete" | "deleted" | "message_delete" => Ok(Self::Delete),
            "notice" => Ok(Self::Notice),
            other => Err(format!("unknown event '{}'", other)),
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Notice => "notice",
        }
    }
}

/// Subscriber list per event kind.
#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<HashMap<EventKind, Vec<Callback>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an event kind.
    pub fn on(&self, kind: EventKind, callback: Callback) {
        self.subscribers.write().entry(kind).or_default().push(callback);
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver an event to every subscriber, one after another.
    ///
    /// A failing subscriber is logged and does not stop the others.
    pub async fn emit(&self, kind: EventKind, ctx: Arc<Context>) {
        // Snapshot so no lock is held across await points
        let subscribers = self.subscribers.read().get(&kind).cloned().unwrap_or_default();

        for subscriber in subscribers {
            if let Err(e) = subscriber(ctx.clone()).await {
                warn!(
                    event = kind.as_str(),
                    client = %ctx.client,
                    message_id = %ctx.message_id,
                    "Event subscriber failed: {:#}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("text", &self.subscriber_count(EventKind::Text))
            .field("edit", &self.subscriber_count(EventKind::Edit))
            .field("delete", &self.subscriber_count(EventKind::Delete))
            .field("notice", &self.subscriber_count(EventKind::Notice))
            .finish()
    }
}
