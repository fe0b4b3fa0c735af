//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.
//! Problems that only affect a single bridged room are reported as warnings:
//! the bridge skips those destinations at runtime instead of refusing to start.

use std::collections::HashSet;

use fancy_regex::Regex;

use crate::common::error::ConfigError;
use crate::config::types::{AssociationBackend, Config};

/// Placeholder values shipped in the example configuration.
const TOKEN_PLACEHOLDERS: [&str; 2] = ["YOUR_TELEGRAM_TOKEN_HERE", "YOUR_DISCORD_TOKEN_HERE"];

/// Validate a configuration.
///
/// Returns the list of non-fatal warnings on success, or every fatal problem
/// joined into one `ValidationError`.
pub fn validate_config(config: &Config) -> Result<Vec<String>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !config.has_clients() {
        errors.push("no clients configured (need at least one of clients.irc, clients.telegram, clients.discord)".to_string());
    }

    if let Some(ref irc) = config.clients.irc {
        if irc.server.is_empty() {
            errors.push("clients.irc.server is required".to_string());
        }
        if irc.nick.is_empty() {
            errors.push("clients.irc.nick is required".to_string());
        }
        if irc.port == 0 {
            errors.push("clients.irc.port must be non-zero".to_string());
        }
        if irc.channels.is_empty() {
            warnings.push("clients.irc.channels is empty - IRC will not join any channel".to_string());
        }
    }

    if let Some(ref telegram) = config.clients.telegram {
        check_token("clients.telegram.token", &telegram.token, &mut errors);
    }

    if let Some(ref discord) = config.clients.discord {
        check_token("clients.discord.token", &discord.token, &mut errors);
    }

    // Room mappings
    let known = known_client_names(config);
    for (i, group) in config.bridge.rooms.iter().enumerate() {
        if group.len() < 2 {
            warnings.push(format!(
                "bridge.rooms[{}] has fewer than two rooms - nothing to bridge",
                i
            ));
        }
        for (j, uid) in group.iter().enumerate() {
            match uid.split_once('/') {
                None => warnings.push(format!(
                    "bridge.rooms[{}][{}] '{}' is not a UID (expected client/id)",
                    i, j, uid
                )),
                Some((client, _)) if !known.contains(&client.to_lowercase()) => {
                    warnings.push(format!(
                        "bridge.rooms[{}][{}] '{}' refers to unconfigured client '{}'",
                        i, j, uid, client
                    ))
                }
                Some(_) => {}
            }
        }
    }

    // Paeeye regexp must compile
    if let Some(ref paeeye) = config.bridge.paeeye {
        if let Some(ref pattern) = paeeye.regexp {
            if let Err(e) = Regex::new(pattern) {
                errors.push(format!(
                    "bridge.paeeye.regexp is not a valid regex: '{}' ({})",
                    pattern, e
                ));
            }
        }
    }

    let association = &config.bridge.message_association;
    if AssociationBackend::parse(&association.backend).is_none() {
        errors.push(format!(
            "bridge.message_association.type '{}' is invalid (use: none, memory, sqlite)",
            association.backend
        ));
    }

    for (name, command) in &config.commands {
        if name.is_empty() {
            errors.push("commands contains an entry with an empty name".to_string());
        }
        if let Some(ref clients) = command.allowed_clients {
            for client in clients {
                if !known.contains(&client.to_lowercase()) {
                    warnings.push(format!(
                        "commands.{}.allowed_clients mentions unconfigured client '{}'",
                        name, client
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn check_token(field: &str, token: &str, errors: &mut Vec<String>) {
    if token.is_empty() {
        errors.push(format!("{} is required", field));
    } else if TOKEN_PLACEHOLDERS.contains(&token) {
        errors.push(format!(
            "{} has not been configured (still using placeholder)",
            field
        ));
    }
}

/// Lower-cased names a UID may use to refer to a configured client.
fn known_client_names(config: &Config) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut add = |kind: &str, id: &Option<String>, aliases: &[String]| {
        names.insert(kind.to_string());
        if let Some(id) = id {
            names.insert(id.to_lowercase());
        }
        names.extend(aliases.iter().map(|a| a.to_lowercase()));
    };

    if let Some(ref irc) = config.clients.irc {
        add("irc", &irc.id, &irc.aliases);
    }
    if let Some(ref telegram) = config.clients.telegram {
        add("telegram", &telegram.id, &telegram.aliases);
    }
    if let Some(ref discord) = config.clients.discord {
        add("discord", &discord.id, &discord.aliases);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_valid_config() -> Config {
        Config {
            clients: ClientsConfig {
                irc: Some(IrcConfig {
                    server: "irc.example.org".to_string(),
                    port: 6667,
                    nick: "relay".to_string(),
                    username: None,
                    realname: None,
                    password: None,
                    channels: vec!["#test".to_string()],
                    id: None,
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
            bridge: BridgeConfig {
                rooms: vec![vec!["irc/#test".to_string(), "tg/100".to_string()]],
                paeeye: None,
                message_association: AssociationConfig::default(),
            },
            commands: Default::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let warnings = validate_config(&make_valid_config()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_no_clients_fails() {
        let config = Config::default();
        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("no clients"));
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.clients.telegram.as_mut().unwrap().token = "YOUR_TELEGRAM_TOKEN_HERE".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_invalid_paeeye_regex_fails() {
        let mut config = make_valid_config();
        config.bridge.paeeye = Some(PaeeyeConfig {
            regexp: Some("[invalid".to_string()),
            ..Default::default()
        });

        let result = validate_config(&config);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a valid regex"));
    }

    #[test]
    fn test_invalid_association_type_fails() {
        let mut config = make_valid_config();
        config.bridge.message_association.backend = "redis".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("message_association"));
    }

    #[test]
    fn test_malformed_room_is_warning() {
        let mut config = make_valid_config();
        config.bridge.rooms = vec![vec![
            "irc/#test".to_string(),
            "nonsense".to_string(),
            "matrix/!room".to_string(),
        ]];

        let warnings = validate_config(&config).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("not a UID"));
        assert!(warnings[1].contains("unconfigured client 'matrix'"));
    }
}
