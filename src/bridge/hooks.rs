//! Named hook stages around bridging.
//!
//! `bridge.send` hooks run in registration order before a message is
//! dispatched and may veto it. `bridge.sent` hooks observe the delivery
//! report afterwards; their verdicts are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::engine::DeliveryReport;
use super::message::BridgeMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Before dispatch. Hooks may reject.
    Send,
    /// After dispatch.
    Sent,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::Send => "bridge.send",
            HookStage::Sent => "bridge.sent",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Reject(Option<String>),
}

/// What a hook is called with.
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    Send(&'a BridgeMessage),
    Sent {
        message: &'a BridgeMessage,
        report: &'a DeliveryReport,
    },
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, event: &HookEvent<'_>) -> Verdict;
}

/// Adapts a synchronous closure into a [`Hook`].
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookEvent<'_>) -> Verdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookEvent<'_>) -> Verdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, event: &HookEvent<'_>) -> Verdict {
        (self.f)(event)
    }
}

/// `bridge.sent` observer that reports messages not every destination got.
pub fn delivery_log() -> Arc<dyn Hook> {
    Arc::new(FnHook::new("delivery-log", |event: &HookEvent<'_>| {
        if let HookEvent::Sent { message, report } = event {
            if !report.failed.is_empty() || !report.skipped.is_empty() {
                warn!(
                    stage = %HookStage::Sent,
                    client = message.client(),
                    message_id = message.message_id(),
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    "Message only partly bridged"
                );
            }
        }
        Verdict::Continue
    }))
}

/// A `bridge.send` veto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub hook: String,
    pub reason: Option<String>,
}

/// Hooks per stage, in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookStage, Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: HookStage, hook: Arc<dyn Hook>) {
        debug!(stage = %stage, hook = hook.name(), "Registered hook");
        self.hooks.entry(stage).or_default().push(hook);
    }

    pub fn count(&self, stage: HookStage) -> usize {
        self.hooks.get(&stage).map_or(0, Vec::len)
    }

    fn stage(&self, stage: HookStage) -> &[Arc<dyn Hook>] {
        self.hooks.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the `bridge.send` hooks. Stops at the first rejection.
    pub async fn run_veto(&self, message: &BridgeMessage) -> Option<Rejection> {
        let event = HookEvent::Send(message);
        for hook in self.stage(HookStage::Send) {
            if let Verdict::Reject(reason) = hook.call(&event).await {
                info!(
                    stage = %HookStage::Send,
                    hook = hook.name(),
                    client = message.client(),
                    from = message.from(),
                    message_id = message.message_id(),
                    reason = reason.as_deref().unwrap_or(""),
                    "Message rejected"
                );
                return Some(Rejection {
                    hook: hook.name().to_string(),
                    reason,
                });
            }
        }
        None
    }

    /// Run every `bridge.sent` hook.
    pub async fn notify_sent(&self, message: &BridgeMessage, report: &DeliveryReport) {
        let event = HookEvent::Sent { message, report };
        for hook in self.stage(HookStage::Sent) {
            hook.call(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::MessageOverrides;
    use crate::bridge::rooms::RoomRouter;
    use crate::handler::mock::MockHandler;
    use crate::handler::Context;
    use parking_lot::Mutex;

    fn message(text: &str) -> BridgeMessage {
        let handler = MockHandler::new("IRC").into_dyn();
        let ctx = Context::new(&handler, "alice", "#test", "alice", text).with_message_id("1");
        BridgeMessage::from_context(Arc::new(ctx), MessageOverrides::default(), &RoomRouter::default())
    }

    fn recording_hook(name: &str, log: Arc<Mutex<Vec<String>>>, verdict: Verdict) -> Arc<dyn Hook> {
        let label = name.to_string();
        Arc::new(FnHook::new(name, move |_event: &HookEvent<'_>| {
            log.lock().push(label.clone());
            verdict.clone()
        }))
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(HookStage::Send.as_str(), "bridge.send");
        assert_eq!(HookStage::Sent.to_string(), "bridge.sent");
    }

    #[tokio::test]
    async fn test_empty_registry_continues() {
        let hooks = HookRegistry::new();
        assert!(hooks.run_veto(&message("hi")).await.is_none());
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_until_rejection() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookRegistry::new();
        hooks.register(HookStage::Send, recording_hook("first", log.clone(), Verdict::Continue));
        hooks.register(
            HookStage::Send,
            recording_hook("second", log.clone(), Verdict::Reject(Some("nope".to_string()))),
        );
        hooks.register(HookStage::Send, recording_hook("third", log.clone(), Verdict::Continue));

        let rejection = hooks.run_veto(&message("hi")).await.unwrap();
        assert_eq!(rejection.hook, "second");
        assert_eq!(rejection.reason.as_deref(), Some("nope"));
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_sent_hooks_ignore_verdicts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookRegistry::new();
        hooks.register(HookStage::Sent, recording_hook("a", log.clone(), Verdict::Reject(None)));
        hooks.register(HookStage::Sent, recording_hook("b", log.clone(), Verdict::Continue));

        hooks
            .notify_sent(&message("hi"), &DeliveryReport::default())
            .await;
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(hooks.count(HookStage::Sent), 2);
        assert_eq!(hooks.count(HookStage::Send), 0);
    }

    #[tokio::test]
    async fn test_delivery_log_never_rejects() {
        let hook = delivery_log();
        let mut report = DeliveryReport::default();
        report.failed.push(crate::bridge::uid::Uid::new("discord", "200"));
        let message = message("hi");

        let verdict = hook
            .call(&HookEvent::Sent {
                message: &message,
                report: &report,
            })
            .await;
        assert_eq!(verdict, Verdict::Continue);
        assert_eq!(hook.call(&HookEvent::Send(&message)).await, Verdict::Continue);
    }
}
