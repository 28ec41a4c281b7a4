//! Token source collaborator contract.

use crate::{Result, Token, storage::Checker};
use core::future::Future;

/// Remote generator of fresh tokens.
pub trait TokenSource: Checker + 'static {
    /// Fetches `n` new tokens.
    ///
    /// # Errors
    ///
    /// Implementations return [`Kind::Invalid`] when `n` is zero and
    /// [`Kind::Internal`] for transport or remote failures.
    ///
    /// [`Kind::Invalid`]: crate::Kind::Invalid
    /// [`Kind::Internal`]: crate::Kind::Internal
    fn generate(&self, n: usize) -> impl Future<Output = Result<Vec<Token>>> + Send;
}
