//! Batch insert orchestration.
//!
//! An [`Inserter`] turns a list of tokens into a live [`Batch`]: one worker
//! task per token, bounded by a per-batch [`Gate`](crate::Gate), each
//! reporting exactly one [`Outcome`] in completion order.
//!
//! A worker that sees an [`Internal`](crate::Kind::Internal) failure aborts
//! the batch. Abort only suppresses future dispatch; inserts already running
//! finish and report. [`Duplicate`](crate::Kind::Duplicate) and every other
//! kind are reported per token without affecting the rest of the batch.

mod coordinator;
mod outcome;
mod processor;


pub use coordinator::*;
pub use outcome::*;
