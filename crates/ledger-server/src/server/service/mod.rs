//! HTTP service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - routes and the streaming insert endpoint (`LedgerService`).
//! - [`response`] - mapping of [`ledger::Error`] onto HTTP error responses.

pub mod handler;
pub mod response;

#[cfg(test)]
mod tests;
