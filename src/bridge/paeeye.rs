//! "Please don't bridge this" markers.
//!
//! Users opt a single message out of bridging by starting it with a prefix,
//! embedding a marker, or matching a configured pattern.

use async_trait::async_trait;
use fancy_regex::Regex;
use tracing::warn;

use crate::config::PaeeyeConfig;

use super::hooks::{Hook, HookEvent, Verdict};

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct PaeeyeFilter {
    prepend: Option<String>,
    inline: Option<String>,
    pattern: Option<CompiledPattern>,
}

impl PaeeyeFilter {
    /// Build the filter. Empty markers are ignored; an invalid pattern is
    /// logged and skipped.
    pub fn new(config: &PaeeyeConfig) -> Self {
        Self {
            prepend: non_empty(config.prepend.as_deref()),
            inline: non_empty(config.inline.as_deref()),
            pattern: non_empty(config.regexp.as_deref()).and_then(compile_pattern),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prepend.is_none() && self.inline.is_none() && self.pattern.is_none()
    }

    /// Name of the first marker `text` carries, if any.
    pub fn matches(&self, text: &str) -> Option<&'static str> {
        if self.prepend.as_deref().is_some_and(|p| text.starts_with(p)) {
            return Some("prepend");
        }
        if self.inline.as_deref().is_some_and(|m| text.contains(m)) {
            return Some("inline");
        }
        if let Some(ref p) = self.pattern {
            let matched = p.regex.is_match(text).unwrap_or_else(|e| {
                warn!("Regex match error for pattern '{}': {}", p.original, e);
                false
            });
            if matched {
                return Some("regexp");
            }
        }
        None
    }
}

#[async_trait]
impl Hook for PaeeyeFilter {
    fn name(&self) -> &str {
        "paeeye"
    }

    async fn call(&self, event: &HookEvent<'_>) -> Verdict {
        match event {
            HookEvent::Send(message) => match self.matches(message.text()) {
                Some(rule) => Verdict::Reject(Some(format!("paeeye {}", rule))),
                None => Verdict::Continue,
            },
            HookEvent::Sent { .. } => Verdict::Continue,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn compile_pattern(pattern: String) -> Option<CompiledPattern> {
    match Regex::new(&pattern) {
        Ok(regex) => Some(CompiledPattern {
            original: pattern,
            regex,
        }),
        Err(e) => {
            warn!("Invalid paeeye regex pattern '{}': {}", pattern, e);
            None
        }
    }
}
