use crate::error::{Error, Kind, Op, Result};
use core::{borrow::Borrow, fmt};

/// Character that may not appear in a stored token.
pub const RESERVED: char = '-';

/// An opaque identifying string produced by a token source.
///
/// Tokens are immutable. Construction does not validate: tokens arrive from a
/// remote generator as-is and are checked with [`Token::validate`] right
/// before they are stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Verifies that the token is non-empty and does not contain
    /// [`RESERVED`].
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Invalid`] error carrying the token otherwise.
    pub fn validate(&self) -> Result<()> {
        const OP: Op = Op::new("valid.token");

        if self.is_empty() {
            return Err(Error::builder()
                .op(OP)
                .kind(Kind::Invalid)
                .token(self.clone())
                .build());
        }

        if self.0.contains(RESERVED) {
            return Err(Error::builder()
                .op(OP)
                .kind(Kind::Invalid)
                .token(self.clone())
                .message("cannot contain dash")
                .build());
        }

        Ok(())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
