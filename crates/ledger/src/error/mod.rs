//! Structured errors shared by every layer of the ledger.
//!
//! An [`Error`] records *where* a failure happened ([`Op`]), *what class* of
//! failure it is ([`Kind`]), *which token* it concerns, and optionally the
//! error it wraps ([`Cause`]). Each layer that calls into a collaborator wraps
//! the returned error with its own [`Op`], building a readable call chain
//! while keeping the classification set by the innermost layer.
//!
//! ## Classification
//!
//! [`Error::kind`] walks the cause chain: an error whose own kind is
//! [`Kind::Other`] reports the kind of its structured cause. Upstream layers
//! branch on [`Error::matches`] (or [`is`] for a `dyn Error`) instead of
//! inspecting strings.
//!
//! ## Rendering
//!
//! [`Error::render`] produces `Op: Token: KindText` followed by the cause.
//! Nested structured errors are attached with a [`Separator`], which defaults
//! to `: ` and may be installed once per process. [`Display`] uses the
//! installed separator.
//!
//! ## Transport
//!
//! [`Error::to_bytes`] and [`Error::from_bytes`] round-trip the op, kind,
//! token and cause chain. Causes that are not structured errors survive only
//! as their message text.
//!
//! [`Display`]: core::fmt::Display

mod codec;
#[allow(clippy::module_inception)]
mod error;
mod kind;
mod render;

pub use codec::*;
pub use error::*;
pub use kind::*;
pub use render::*;
