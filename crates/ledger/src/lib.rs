#![doc = include_str!("../README.md")]

pub mod batch;
pub mod error;
pub mod gate;
pub mod source;
pub mod storage;
mod token;

pub use crate::batch::{Batch, BatchState, Inserter, Outcome, OutcomeStatus, Summary};
pub use crate::error::{Cause, DecodeError, Error, Kind, Op, Result, Separator};
pub use crate::gate::{Gate, Permit};
pub use crate::source::TokenSource;
pub use crate::storage::{Checker, Storage, memory::MemoryStorage};
pub use crate::token::*;
