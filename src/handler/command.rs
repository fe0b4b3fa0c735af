//! Per-handler command registry and dispatch.
//!
//! Commands are command-shaped messages (`!name args` on IRC and Discord,
//! `/name args` or `/name@bot args` on Telegram). A handled command is not
//! bridged; a command the origin client may not use falls through as text.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::common::error::ConfigError;
use crate::config::Config;

use super::context::Context;
use super::events::{callback, Callback};
use super::Handler;

/// Options for a registered command.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Client names allowed to trigger the command. `None` means every client.
    pub allowed_clients: Option<Vec<String>>,
}

struct Command {
    callback: Callback,
    allowed_clients: Option<Vec<String>>,
}

impl Command {
    fn allows(&self, client: &str) -> bool {
        match self.allowed_clients {
            Some(ref clients) => clients.iter().any(|c| c == client),
            None => true,
        }
    }
}

/// Command table of one handler.
#[derive(Default)]
pub struct CommandRouter {
    commands: RwLock<HashMap<String, Command>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Re-registering a name replaces the old command.
    pub fn add(
        &self,
        name: &str,
        callback: Callback,
        options: CommandOptions,
    ) -> Result<(), ConfigError> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "command".to_string(),
                message: "command name must not be empty".to_string(),
            });
        }

        let command = Command {
            callback,
            allowed_clients: options
                .allowed_clients
                .map(|clients| clients.iter().map(|c| c.to_lowercase()).collect()),
        };

        if self.commands.write().insert(name.clone(), command).is_some() {
            warn!(command = %name, "Command registered twice, the last registration wins");
        }
        Ok(())
    }

    /// Register `alias` as another name for `name`.
    pub fn alias(&self, alias: &str, name: &str) -> Result<(), ConfigError> {
        let alias = alias.trim().to_lowercase();
        let name = name.trim().to_lowercase();
        if alias.is_empty() || name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "command".to_string(),
                message: "command alias and target must not be empty".to_string(),
            });
        }
        if !self.contains(&name) {
            warn!(alias = %alias, command = %name, "Alias points to an unregistered command");
        }
        self.aliases.write().insert(alias, name);
        Ok(())
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    fn resolve(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        if self.commands.read().contains_key(&name) {
            return Some(name);
        }
        self.aliases.read().get(&name).cloned()
    }

    /// Split a command-shaped message into its name and parameter.
    ///
    /// Returns `None` when `text` does not start with one of `triggers`, the
    /// name is empty or not a plain word, or the command is addressed to a
    /// different bot (`/cmd@otherbot`).
    pub fn parse(
        text: &str,
        triggers: &[char],
        bot_name: Option<&str>,
    ) -> Option<(String, Option<String>)> {
        let mut chars = text.chars();
        let trigger = chars.next()?;
        if !triggers.contains(&trigger) {
            return None;
        }

        let rest = chars.as_str();
        let (word, param) = match rest.split_once(char::is_whitespace) {
            Some((word, param)) => (word, param.trim()),
            None => (rest, ""),
        };

        let name = match word.split_once('@') {
            Some((name, target)) => {
                if let Some(bot) = bot_name {
                    if !target.eq_ignore_ascii_case(bot) {
                        return None;
                    }
                }
                name
            }
            None => word,
        };

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }

        let param = (!param.is_empty()).then(|| param.to_string());
        Some((name.to_lowercase(), param))
    }

    /// Run the command named in `ctx.command`.
    ///
    /// Returns `Ok(true)` when a command ran, `Ok(false)` when the message is
    /// not a known command or the origin client is not allowed to use it.
    pub async fn dispatch(&self, ctx: &Arc<Context>) -> anyhow::Result<bool> {
        let Some(ref requested) = ctx.command else {
            return Ok(false);
        };
        let Some(name) = self.resolve(requested) else {
            return Ok(false);
        };

        let callback = {
            let commands = self.commands.read();
            let Some(command) = commands.get(&name) else {
                return Ok(false);
            };
            if !command.allows(&ctx.client) {
                debug!(
                    command = %name,
                    client = %ctx.client,
                    "Command not allowed for client, treating as text"
                );
                return Ok(false);
            }
            command.callback.clone()
        };

        info!(
            command = %name,
            client = %ctx.client,
            from = %ctx.nick,
            "Running command"
        );
        callback(ctx.clone()).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("commands", &self.names())
            .field("aliases", &*self.aliases.read())
            .finish()
    }
}

/// Register the built-in commands on a handler, honouring the `commands`
/// configuration section.
pub fn register_builtin_commands(handler: &dyn Handler, config: &Config) -> Result<(), ConfigError> {
    if config.is_command_enabled("help") {
        handler.add_command(
            "help",
            callback(|ctx| async move {
                let Some(handler) = ctx.handler() else {
                    return Ok(());
                };
                ctx.reply(&help_text(handler.as_ref())).await?;
                Ok(())
            }),
            CommandOptions {
                allowed_clients: config.allowed_clients("help"),
            },
        )?;
        for alias in config.command_aliases("help") {
            handler.alias_command(alias, "help")?;
        }
    }
    Ok(())
}

/// Help text listing the commands registered on a handler.
pub fn help_text(handler: &dyn Handler) -> String {
    let trigger = handler.triggers().first().copied().unwrap_or('!');
    let commands: Vec<String> = handler
        .commands()
        .names()
        .iter()
        .map(|name| format!("{}{}", trigger, name))
        .collect();
    format!("Available commands: {}", commands.join(", "))
}
