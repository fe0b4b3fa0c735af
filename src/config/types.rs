//! Configuration type definitions.

use std::collections::HashMap;

use serde::Deserialize;

/// Default IRC server port.
pub const DEFAULT_IRC_PORT: u16 = 6667;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clients: ClientsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Per-command settings keyed by command name.
    #[serde(default)]
    pub commands: HashMap<String, CommandConfig>,
}

impl Config {
    /// Allowed clients for a command, `None` when unrestricted.
    pub fn allowed_clients(&self, command: &str) -> Option<Vec<String>> {
        self.commands
            .get(command)
            .and_then(|c| c.allowed_clients.clone())
    }

    /// Configured aliases for a command.
    pub fn command_aliases(&self, command: &str) -> &[String] {
        self.commands
            .get(command)
            .map(|c| c.aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a command is enabled (commands are enabled unless configured otherwise).
    pub fn is_command_enabled(&self, command: &str) -> bool {
        self.commands
            .get(command)
            .map(|c| c.enabled)
            .unwrap_or(true)
    }

    /// Returns true if at least one platform client is configured.
    pub fn has_clients(&self) -> bool {
        self.clients.irc.is_some() || self.clients.telegram.is_some() || self.clients.discord.is_some()
    }
}

/// Platform client settings. A missing section disables that platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientsConfig {
    #[serde(default)]
    pub irc: Option<IrcConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

/// IRC connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub nick: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Channels to join after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Handler id, defaults to the platform type.
    #[serde(default)]
    pub id: Option<String>,
    /// Extra names accepted as the client part of a UID.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Format for bridged messages (placeholders: %nick, %message, %client, %time).
    #[serde(default)]
    pub format: Option<String>,
}

fn default_irc_port() -> u16 {
    DEFAULT_IRC_PORT
}

/// Telegram bot settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Discord bot settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Bridge behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Groups of linked rooms, each an ordered list of UIDs (`client/id`).
    #[serde(default)]
    pub rooms: Vec<Vec<String>>,
    /// Cross-posting suppression.
    #[serde(default)]
    pub paeeye: Option<PaeeyeConfig>,
    #[serde(default)]
    pub message_association: AssociationConfig,
}

/// Patterns that mark a message as "do not bridge".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaeeyeConfig {
    /// Messages starting with this prefix are not bridged.
    #[serde(default)]
    pub prepend: Option<String>,
    /// Messages containing this marker anywhere are not bridged.
    #[serde(default)]
    pub inline: Option<String>,
    /// Messages matching this regex are not bridged.
    #[serde(default)]
    pub regexp: Option<String>,
}

impl PaeeyeConfig {
    pub fn is_empty(&self) -> bool {
        self.prepend.as_deref().map_or(true, str::is_empty)
            && self.inline.as_deref().map_or(true, str::is_empty)
            && self.regexp.as_deref().map_or(true, str::is_empty)
    }
}

/// Message association backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct AssociationConfig {
    /// Backend type: "none", "memory" or "sqlite".
    #[serde(rename = "type", default = "default_association_type")]
    pub backend: String,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            backend: default_association_type(),
            sqlite: None,
        }
    }
}

fn default_association_type() -> String {
    "none".to_string()
}

/// Association backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationBackend {
    None,
    Memory,
    Sqlite,
}

impl AssociationBackend {
    /// Parse a backend name from config; unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" | "none" | "off" => Some(Self::None),
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// SQLite association store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

/// Settings for one bot command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Client types allowed to trigger the command (None = all).
    #[serde(default)]
    pub allowed_clients: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra names the command answers to.
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_backend_parsing() {
        assert_eq!(AssociationBackend::parse("none"), Some(AssociationBackend::None));
        assert_eq!(AssociationBackend::parse("SQLite"), Some(AssociationBackend::Sqlite));
        assert_eq!(AssociationBackend::parse("memory"), Some(AssociationBackend::Memory));
        assert_eq!(AssociationBackend::parse("redis"), None);
    }

    #[test]
    fn test_command_settings() {
        let mut config = Config::default();
        assert!(config.is_command_enabled("help"));
        assert_eq!(config.allowed_clients("help"), None);

        config.commands.insert(
            "help".to_string(),
            CommandConfig {
                allowed_clients: Some(vec!["irc".to_string()]),
                enabled: false,
                aliases: vec!["commands".to_string()],
            },
        );
        assert!(!config.is_command_enabled("help"));
        assert_eq!(config.allowed_clients("help"), Some(vec!["irc".to_string()]));
        assert_eq!(config.command_aliases("help"), ["commands".to_string()]);
        assert!(config.command_aliases("ping").is_empty());
    }

    #[test]
    fn test_paeeye_is_empty() {
        assert!(PaeeyeConfig::default().is_empty());
        let config = PaeeyeConfig {
            prepend: Some("::".to_string()),
            ..Default::default()
        };
        assert!(!config.is_empty());
    }
}
