//! Room and user addresses in canonical `client/id` form.

use std::collections::HashMap;
use std::fmt;

/// Maps every name a client may be referred to by onto its canonical name.
///
/// Built once at startup from each registered handler's type, id and
/// aliases. Lookups are case-insensitive; unknown names pass through
/// lower-cased.
#[derive(Debug, Clone, Default)]
pub struct ClientResolver {
    names: HashMap<String, String>,
}

impl ClientResolver {
    /// Register a client. `kind` becomes the canonical (lower-cased) name.
    pub fn register<'a>(
        &mut self,
        kind: &str,
        id: &str,
        aliases: impl IntoIterator<Item = &'a String>,
    ) {
        let canonical = kind.to_lowercase();
        self.names.insert(canonical.clone(), canonical.clone());
        self.names.insert(id.to_lowercase(), canonical.clone());
        for alias in aliases {
            self.names.insert(alias.to_lowercase(), canonical.clone());
        }
    }

    /// Resolve a client name to its canonical form.
    pub fn resolve(&self, name: &str) -> String {
        let lower = name.to_lowercase();
        self.names.get(&lower).cloned().unwrap_or(lower)
    }

    /// Returns true if the name belongs to a registered client.
    pub fn is_known(&self, name: &str) -> bool {
        self.names.contains_key(&name.to_lowercase())
    }
}

/// A source or destination address: `<client>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid {
    client: String,
    id: String,
}

impl Uid {
    /// Create a UID. The client name is lower-cased, the id is kept verbatim.
    pub fn new(client: impl AsRef<str>, id: impl Into<String>) -> Self {
        Self {
            client: client.as_ref().to_lowercase(),
            id: id.into(),
        }
    }

    /// Parse a UID string, resolving the client part through `resolver`.
    ///
    /// Splits at the first `/`. Returns `None` when the string has no `/`.
    pub fn parse(s: &str, resolver: &ClientResolver) -> Option<Self> {
        let (client, id) = s.split_once('/')?;
        Some(Self {
            client: resolver.resolve(client),
            id: id.to_string(),
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Case-insensitive key used for room lookups.
    pub(crate) fn key(&self) -> String {
        format!("{}/{}", self.client, self.id.to_lowercase())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ClientResolver {
        let mut resolver = ClientResolver::default();
        resolver.register("Telegram", "Telegram", &vec!["tg".to_string()]);
        resolver.register("IRC", "libera", &Vec::new());
        resolver
    }

    #[test]
    fn test_parse_resolves_client() {
        let resolver = resolver();

        let uid = Uid::parse("TG/-100123", &resolver).unwrap();
        assert_eq!(uid.client(), "telegram");
        assert_eq!(uid.id(), "-100123");
        assert_eq!(uid.to_string(), "telegram/-100123");

        let uid = Uid::parse("libera/#rust", &resolver).unwrap();
        assert_eq!(uid.client(), "irc");
        assert_eq!(uid.to_string(), "irc/#rust");
    }

    #[test]
    fn test_parse_without_slash_is_absent() {
        assert_eq!(Uid::parse("#rust", &resolver()), None);
        assert_eq!(Uid::parse("", &resolver()), None);
    }

    #[test]
    fn test_unknown_client_passes_through() {
        let resolver = resolver();
        let uid = Uid::parse("Matrix/!abc:example.org", &resolver).unwrap();
        assert_eq!(uid.client(), "matrix");
        assert_eq!(uid.id(), "!abc:example.org");
        assert!(!resolver.is_known("matrix"));
    }

    #[test]
    fn test_parse_splits_at_first_slash() {
        let uid = Uid::parse("discord/123/456", &resolver()).unwrap();
        assert_eq!(uid.client(), "discord");
        assert_eq!(uid.id(), "123/456");
    }

    #[test]
    fn test_key_is_case_insensitive() {
        assert_eq!(Uid::new("IRC", "#Rust").key(), Uid::new("irc", "#rust").key());
        assert_eq!(Uid::new("IRC", "#Rust").id(), "#Rust");
    }
}
