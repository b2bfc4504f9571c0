//! Credentials and the access token they are exchanged for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name and secret presented once to obtain a [`Token`].
///
/// Auth calls take the credential by value so it does not outlive the call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub secret: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Opaque access token issued by the server.
///
/// `Debug` and `Display` never reveal the value; use [`Token::expose`] where
/// the raw string has to go on the wire or to disk.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Build a token from a server-issued string. Surrounding whitespace is
    /// trimmed; a blank value yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_rejects_blank() {
        assert_eq!(Token::parse("  abc \n").unwrap().expose(), "abc");
        assert!(Token::parse("").is_none());
        assert!(Token::parse(" \t\n").is_none());
    }

    #[test]
    fn token_is_never_formatted() {
        let token = Token::parse("s3cr3t").unwrap();
        assert!(!format!("{token:?}").contains("s3cr3t"));
        assert!(!format!("{token}").contains("s3cr3t"));
    }

    #[test]
    fn credential_debug_hides_secret() {
        let cred = Credential::new("alice", "hunter2");
        let dbg = format!("{cred:?}");
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let token = Token::parse("abc").unwrap();
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc\"");
    }
}
