//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `CHATRELAY_CONFIG` - Path of the configuration file
//! - `CHATRELAY_TELEGRAM_TOKEN` - Telegram bot token
//! - `CHATRELAY_DISCORD_TOKEN` - Discord bot token
//! - `CHATRELAY_IRC_PASSWORD` - IRC server password

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "CHATRELAY";

/// Apply environment variable overrides to a config.
///
/// Overrides only touch platforms that are already configured; an
/// environment variable never enables a platform on its own.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_TELEGRAM_TOKEN", ENV_PREFIX)) {
        if let Some(ref mut telegram) = config.clients.telegram {
            telegram.token = token;
        }
    }

    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        if let Some(ref mut discord) = config.clients.discord {
            discord.token = token;
        }
    }

    if let Ok(password) = env::var(format!("{}_IRC_PASSWORD", ENV_PREFIX)) {
        if let Some(ref mut irc) = config.clients.irc {
            irc.password = Some(password);
        }
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `CHATRELAY_CONFIG`, otherwise returns "chatrelay.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "chatrelay.conf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_test_config() -> Config {
        Config {
            clients: ClientsConfig {
                irc: None,
                telegram: Some(TelegramConfig {
                    token: "original_token".to_string(),
                    id: None,
                    aliases: Vec::new(),
                    format: None,
                }),
                discord: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "CHATRELAY");
    }

    #[test]
    fn test_get_config_path_default() {
        env::remove_var("CHATRELAY_CONFIG");
        assert_eq!(get_config_path(), "chatrelay.conf");
    }

    #[test]
    fn test_apply_env_overrides_no_vars() {
        env::remove_var("CHATRELAY_TELEGRAM_TOKEN");
        env::remove_var("CHATRELAY_DISCORD_TOKEN");

        let result = apply_env_overrides(make_test_config());

        assert_eq!(
            result.clients.telegram.as_ref().unwrap().token,
            "original_token"
        );
        assert!(result.clients.discord.is_none());
    }
}
