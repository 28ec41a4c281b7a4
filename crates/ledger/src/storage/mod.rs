//! Storage collaborator contract.
//!
//! A [`Storage`] records each accepted token exactly once. Implementations
//! classify their failures so the orchestrator can react without inspecting
//! messages:
//!
//! - [`Kind::Duplicate`] for a uniqueness violation,
//! - [`Kind::Invalid`] for a validation or constraint violation,
//! - [`Kind::Internal`] for everything else, including lost connectivity.
//!
//! [`Kind::Duplicate`]: crate::Kind::Duplicate
//! [`Kind::Invalid`]: crate::Kind::Invalid
//! [`Kind::Internal`]: crate::Kind::Internal

pub mod memory;

use crate::{Result, Token};
use core::future::Future;

/// Best-effort liveness check.
///
/// Callers log a failed check; it is never fatal to a batch.
pub trait Checker: Send + Sync {
    fn check(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Durable, unique-per-token record store.
pub trait Storage: Checker + 'static {
    /// Records `token`.
    ///
    /// # Errors
    ///
    /// See the module documentation for the required classification.
    fn insert(&self, token: &Token) -> impl Future<Output = Result<()>> + Send;
}
