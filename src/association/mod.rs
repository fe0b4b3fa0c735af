//! Message association: which per-platform copies belong to one bridged
//! message.
//!
//! Used to propagate edits and deletions and to link replies. Only
//! platforms with stable, addressable message ids are tracked.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::error::{AssociationError, AssociationResult};
use crate::config::{AssociationBackend, AssociationConfig};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Clients whose message copies are recorded.
pub const TRACKABLE_CLIENTS: [&str; 2] = ["telegram", "discord"];

pub fn is_trackable(client: &str) -> bool {
    TRACKABLE_CLIENTS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(client))
}

/// One platform copy of a bridged message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociatedMessage {
    /// Canonical (lower-cased) client name.
    pub client: String,
    pub chat_id: String,
    pub message_id: String,
}

impl AssociatedMessage {
    pub fn new(
        client: impl AsRef<str>,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            client: client.as_ref().to_lowercase(),
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }

    fn matches(&self, client: &str, chat_id: &str) -> bool {
        self.client.eq_ignore_ascii_case(client) && self.chat_id == chat_id
    }
}

/// All known copies of one logical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAssociation {
    pub messages: Vec<AssociatedMessage>,
    pub created_at: DateTime<Utc>,
}

impl MessageAssociation {
    pub fn new(messages: Vec<AssociatedMessage>) -> Self {
        Self {
            messages,
            created_at: Utc::now(),
        }
    }

    /// The copy living in `client`/`chat_id`, if any.
    pub fn find(&self, client: &str, chat_id: &str) -> Option<&AssociatedMessage> {
        self.messages.iter().find(|m| m.matches(client, chat_id))
    }

    /// Every copy except the one in `client`/`chat_id`.
    pub fn siblings<'a>(
        &'a self,
        client: &'a str,
        chat_id: &'a str,
    ) -> impl Iterator<Item = &'a AssociatedMessage> + 'a {
        self.messages
            .iter()
            .filter(move |m| !m.matches(client, chat_id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Storage for message associations.
///
/// For any `(client, chat_id, message_id)` at most one association is
/// active: a newer `set` covering the same copy supersedes the older one.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Open underlying resources. Calling it twice is harmless.
    async fn start(&self) -> AssociationResult<()>;

    /// Release underlying resources. Calling it twice is harmless.
    async fn stop(&self) -> AssociationResult<()>;

    async fn get(
        &self,
        client: &str,
        chat_id: &str,
        message_id: &str,
    ) -> AssociationResult<Option<MessageAssociation>>;

    /// Record an association under the key of every member copy.
    async fn set(&self, association: &MessageAssociation) -> AssociationResult<()>;
}

/// Store used when association tracking is disabled.
#[derive(Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl AssociationStore for NoopStore {
    fn backend(&self) -> &'static str {
        "none"
    }

    async fn start(&self) -> AssociationResult<()> {
        Ok(())
    }

    async fn stop(&self) -> AssociationResult<()> {
        Ok(())
    }

    async fn get(
        &self,
        _client: &str,
        _chat_id: &str,
        _message_id: &str,
    ) -> AssociationResult<Option<MessageAssociation>> {
        Ok(None)
    }

    async fn set(&self, _association: &MessageAssociation) -> AssociationResult<()> {
        Err(AssociationError::Disabled)
    }
}

/// Create the store selected by `bridge.message_association`.
///
/// Mismatched settings (an unknown type, or `sqlite` without its section)
/// are fatal.
pub fn build_store(config: &AssociationConfig) -> AssociationResult<Arc<dyn AssociationStore>> {
    let backend = AssociationBackend::parse(&config.backend).ok_or_else(|| {
        AssociationError::UnknownBackend {
            name: config.backend.clone(),
        }
    })?;

    let store: Arc<dyn AssociationStore> = match backend {
        AssociationBackend::None => Arc::new(NoopStore),
        AssociationBackend::Memory => Arc::new(MemoryStore::new()),
        AssociationBackend::Sqlite => {
            let sqlite = config
                .sqlite
                .as_ref()
                .ok_or(AssociationError::MissingSettings {
                    backend: "sqlite",
                    section: "bridge.message_association.sqlite",
                })?;
            Arc::new(SqliteStore::new(&sqlite.path))
        }
    };

    info!(backend = store.backend(), "Message association store selected");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;

    fn sample() -> MessageAssociation {
        MessageAssociation::new(vec![
            AssociatedMessage::new("Telegram", "100", "7"),
            AssociatedMessage::new("discord", "200", "9001"),
        ])
    }

    #[test]
    fn test_trackable_clients() {
        assert!(is_trackable("telegram"));
        assert!(is_trackable("Discord"));
        assert!(!is_trackable("irc"));
    }

    #[test]
    fn test_find_and_siblings() {
        let association = sample();
        assert_eq!(association.find("telegram", "100").unwrap().message_id, "7");
        assert_eq!(association.find("TELEGRAM", "100").unwrap().message_id, "7");
        assert!(association.find("telegram", "101").is_none());
        assert_eq!(association.len(), 2);

        let siblings: Vec<_> = association.siblings("telegram", "100").collect();
        assert_eq!(siblings, vec![&AssociatedMessage::new("discord", "200", "9001")]);
    }

    #[tokio::test]
    async fn test_noop_store() {
        let store = NoopStore;
        assert!(store.get("telegram", "100", "7").await.unwrap().is_none());
        assert!(matches!(
            store.set(&sample()).await,
            Err(AssociationError::Disabled)
        ));
    }

    #[test]
    fn test_build_store_selects_backend() {
        let mut config = AssociationConfig::default();
        assert_eq!(build_store(&config).unwrap().backend(), "none");

        config.backend = "memory".to_string();
        assert_eq!(build_store(&config).unwrap().backend(), "memory");

        config.backend = "sqlite".to_string();
        config.sqlite = Some(SqliteConfig {
            path: ":memory:".to_string(),
        });
        assert_eq!(build_store(&config).unwrap().backend(), "sqlite");
    }

    #[test]
    fn test_build_store_mismatch_is_fatal() {
        let config = AssociationConfig {
            backend: "sqlite".to_string(),
            sqlite: None,
        };
        assert!(matches!(
            build_store(&config),
            Err(AssociationError::MissingSettings { .. })
        ));

        let config = AssociationConfig {
            backend: "redis".to_string(),
            sqlite: None,
        };
        assert!(matches!(
            build_store(&config),
            Err(AssociationError::UnknownBackend { .. })
        ));
    }
}
