use crate::{Error, Kind, Token};
use core::fmt;

/// Classification of a single token's result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutcomeStatus {
    /// The token was stored.
    Ok,
    /// The token had already been stored. Never aborts a batch.
    Duplicate,
    /// Any other failure.
    Failed,
}

/// The result of processing one token, produced exactly once per dispatched
/// token.
#[derive(Clone, Debug)]
pub struct Outcome {
    token: Token,
    result: Result<(), Error>,
}

impl Outcome {
    pub fn new(token: Token, result: Result<(), Error>) -> Self {
        Self { token, result }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn status(&self) -> OutcomeStatus {
        match &self.result {
            Ok(()) => OutcomeStatus::Ok,
            Err(err) if err.matches(Kind::Duplicate) => OutcomeStatus::Duplicate,
            Err(_) => OutcomeStatus::Failed,
        }
    }

    /// Whether this failure must stop the batch from dispatching more work.
    pub fn is_fatal(&self) -> bool {
        self.error().is_some_and(|err| err.matches(Kind::Internal))
    }

    /// The line streamed to clients: `OK  : <token>` or `ERR : <token>`.
    pub fn line(&self) -> String {
        self.to_string()
    }

    pub fn into_result(self) -> (Token, Result<(), Error>) {
        (self.token, self.result)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "OK  : {}", self.token)
        } else {
            write!(f, "ERR : {}", self.token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_and_status() {
        let ok = Outcome::new(Token::new("abc"), Ok(()));
        assert_eq!(ok.line(), "OK  : abc");
        assert_eq!(ok.status(), OutcomeStatus::Ok);
        assert!(!ok.is_fatal());

        let dup = Outcome::new(Token::new("abc"), Err(Error::new(Kind::Duplicate)));
        assert_eq!(dup.line(), "ERR : abc");
        assert_eq!(dup.status(), OutcomeStatus::Duplicate);
        assert!(!dup.is_fatal());

        let internal = Outcome::new(Token::new("abc"), Err(Error::new(Kind::Internal)));
        assert_eq!(internal.status(), OutcomeStatus::Failed);
        assert!(internal.is_fatal());

        let invalid = Outcome::new(Token::new("a-b"), Err(Error::new(Kind::Invalid)));
        assert_eq!(invalid.status(), OutcomeStatus::Failed);
        assert!(!invalid.is_fatal());
    }
}
