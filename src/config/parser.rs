//! Configuration file parsing (HOCON format).

use std::path::Path;

use hocon::HoconLoader;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    load_config_str(&content)
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_str() {
        let config = load_config_str(
            r##"
            clients {
                irc {
                    server = "irc.example.org"
                    nick = "relay"
                    channels = ["#test"]
                }
                telegram {
                    token = "123:abc"
                    aliases = ["tg"]
                }
            }
            bridge {
                rooms = [
                    ["irc/#test", "telegram/100"]
                ]
                paeeye {
                    prepend = "::"
                }
                message_association {
                    type = "memory"
                }
            }
            "##,
        )
        .unwrap();

        let irc = config.clients.irc.as_ref().unwrap();
        assert_eq!(irc.server, "irc.example.org");
        assert_eq!(irc.port, 6667);
        assert_eq!(irc.channels, vec!["#test".to_string()]);
        assert!(config.clients.discord.is_none());
        assert_eq!(config.clients.telegram.as_ref().unwrap().aliases, vec!["tg".to_string()]);
        assert_eq!(config.bridge.rooms.len(), 1);
        assert_eq!(config.bridge.rooms[0][1], "telegram/100");
        assert_eq!(
            config.bridge.paeeye.as_ref().unwrap().prepend.as_deref(),
            Some("::")
        );
        assert_eq!(config.bridge.message_association.backend, "memory");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/chatrelay.conf");
        assert!(result.is_err());
    }
}
