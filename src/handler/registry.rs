//! The set of running platform handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::uid::ClientResolver;
use crate::common::error::ConfigError;
use crate::config::Config;

use super::{discord, irc, telegram, Handler};

/// One supported platform: its name and how to build it from configuration.
struct Platform {
    name: &'static str,
    /// Returns `Ok(None)` when the platform is not configured.
    build: fn(&Config) -> Result<Option<Arc<dyn Handler>>, ConfigError>,
}

const PLATFORMS: &[Platform] = &[
    Platform {
        name: "irc",
        build: irc::build,
    },
    Platform {
        name: "telegram",
        build: telegram::build,
    },
    Platform {
        name: "discord",
        build: discord::build,
    },
];

/// Handlers keyed by canonical client name, plus the UID client resolver
/// built from their ids and aliases.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    /// Registration order.
    order: Vec<String>,
    resolver: ClientResolver,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every platform that has a configuration section.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for platform in PLATFORMS {
            if let Some(handler) = (platform.build)(config)? {
                info!(platform = platform.name, id = handler.id(), "Handler configured");
                registry.register(handler);
            }
        }
        Ok(registry)
    }

    /// Add a handler. A second handler of the same type replaces the first.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let client = handler.client();
        self.resolver
            .register(handler.kind(), handler.id(), handler.aliases());

        if self.handlers.insert(client.clone(), handler).is_some() {
            warn!(client = %client, "Handler registered twice, replacing the first one");
        } else {
            self.order.push(client);
        }
    }

    /// Look up a handler by type, id or alias (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&self.resolver.resolve(name)).cloned()
    }

    /// Handlers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.order.iter().filter_map(|name| self.handlers.get(name))
    }

    pub fn resolver(&self) -> &ClientResolver {
        &self.resolver
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientsConfig, IrcConfig, TelegramConfig};
    use crate::handler::mock::MockHandler;

    #[test]
    fn test_lookup_by_alias_and_case() {
        let mut registry = HandlerRegistry::new();
        registry.register(MockHandler::new("Telegram").with_alias("tg").into_dyn());
        registry.register(MockHandler::new("IRC").into_dyn());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("TG").unwrap().kind(), "Telegram");
        assert_eq!(registry.get("telegram").unwrap().kind(), "Telegram");
        assert_eq!(registry.get("Irc").unwrap().kind(), "IRC");
        assert!(registry.get("discord").is_none());
    }

    #[test]
    fn test_iteration_follows_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(MockHandler::new("Discord").into_dyn());
        registry.register(MockHandler::new("IRC").into_dyn());
        registry.register(MockHandler::new("Telegram").into_dyn());

        let kinds: Vec<&str> = registry.iter().map(|h| h.kind()).collect();
        assert_eq!(kinds, vec!["Discord", "IRC", "Telegram"]);
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(MockHandler::new("IRC").into_dyn());
        registry.register(MockHandler::new("IRC").with_alias("libera").into_dyn());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().count(), 1);
        assert!(registry.get("libera").is_some());
    }

    #[test]
    fn test_from_config_builds_configured_platforms() {
        let config = Config {
            clients: ClientsConfig {
                irc: Some(IrcConfig {
                    server: "irc.example.org".to_string(),
                    port: 6667,
                    nick: "relay".to_string(),
                    username: None,
                    realname: None,
                    password: None,
                    channels: vec!["#test".to_string()],
                    id: Some("libera".to_string()),
                    aliases: Vec::new(),
                    format: None,
                }),
                telegram: Some(TelegramConfig {
                    token: "123:abc".to_string(),
                    id: None,
                    aliases: vec!["tg".to_string()],
                    format: None,
                }),
                discord: None,
            },
            ..Default::default()
        };

        let registry = HandlerRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("libera").unwrap().id(), "libera");
        assert_eq!(registry.get("tg").unwrap().client(), "telegram");
        assert!(registry.resolver().is_known("irc"));
    }
}
