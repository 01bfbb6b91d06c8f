//! Session token: the only shared secret between host and sandbox.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Credential identifying one sandbox instantiation.
///
/// The `Debug` impl is redacted so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing token value (e.g. one received from a boot signal).
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check an inbound token against this one.
    pub fn matches(&self, other: &SessionToken) -> bool {
        !self.0.is_empty() && self.0 == other.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert!(!a.matches(&b));
        assert!(a.matches(&a.clone()));
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = SessionToken::from_string("super-secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_empty_token_never_matches() {
        let empty = SessionToken::from_string("");
        assert!(!empty.matches(&SessionToken::from_string("")));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let token = SessionToken::from_string("abc");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc\"");
    }
}
