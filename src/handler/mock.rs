//! Recording handler for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::error::{DeliveryError, DeliveryResult};

use super::format::MessageFormatter;
use super::{CommandRouter, EventHub, Handler, SayOptions};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub target: String,
    pub text: String,
    /// Text after formatting, as a real platform would show it.
    pub rendered: String,
    pub options: SayOptions,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditedMessage {
    pub target: String,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Default)]
struct MockLog {
    sent: Vec<SentMessage>,
    edited: Vec<EditedMessage>,
    deleted: Vec<(String, String)>,
}

/// A handler that records outbound calls. Clones share their recordings.
#[derive(Clone)]
pub struct MockHandler {
    kind: &'static str,
    id: String,
    aliases: Vec<String>,
    supports_edits: bool,
    native_reply: bool,
    failing: HashSet<String>,
    formatter: MessageFormatter,
    events: Arc<EventHub>,
    commands: Arc<CommandRouter>,
    counter: Arc<AtomicU64>,
    log: Arc<Mutex<MockLog>>,
}

impl MockHandler {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            id: kind.to_string(),
            aliases: Vec::new(),
            supports_edits: true,
            native_reply: true,
            failing: HashSet::new(),
            formatter: MessageFormatter::default(),
            events: Arc::new(EventHub::new()),
            commands: Arc::new(CommandRouter::new()),
            counter: Arc::new(AtomicU64::new(0)),
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn with_edits(mut self, supported: bool) -> Self {
        self.supports_edits = supported;
        self
    }

    pub fn with_native_reply(mut self, native: bool) -> Self {
        self.native_reply = native;
        self
    }

    /// Make every `say` to `target` fail.
    pub fn failing(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }

    pub fn into_dyn(self) -> Arc<dyn Handler> {
        Arc::new(self)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.log.lock().sent.clone()
    }

    pub fn edited(&self) -> Vec<EditedMessage> {
        self.log.lock().edited.clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.log.lock().deleted.clone()
    }

    fn unsupported(&self, operation: &'static str) -> DeliveryError {
        DeliveryError::Unsupported {
            client: self.client(),
            operation,
        }
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    fn commands(&self) -> &CommandRouter {
        &self.commands
    }

    async fn say(&self, target: &str, text: &str, options: &SayOptions) -> DeliveryResult<String> {
        if self.failing.contains(target) {
            return Err(DeliveryError::SendFailed {
                client: self.client(),
                message: format!("mock failure for {}", target),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("{}-{}", self.client(), n);
        self.log.lock().sent.push(SentMessage {
            target: target.to_string(),
            text: text.to_string(),
            rendered: self.formatter.render(text, options, self.native_reply),
            options: options.clone(),
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn edit(
        &self,
        target: &str,
        message_id: &str,
        text: &str,
        options: &SayOptions,
    ) -> DeliveryResult<()> {
        if !self.supports_edits {
            return Err(self.unsupported("edit"));
        }
        self.log.lock().edited.push(EditedMessage {
            target: target.to_string(),
            message_id: message_id.to_string(),
            text: self.formatter.render(text, options, self.native_reply),
        });
        Ok(())
    }

    async fn delete(&self, target: &str, message_id: &str) -> DeliveryResult<()> {
        if !self.supports_edits {
            return Err(self.unsupported("delete"));
        }
        self.log
            .lock()
            .deleted
            .push((target.to_string(), message_id.to_string()));
        Ok(())
    }

    fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _ = shutdown.changed().await;
        })
    }
}
