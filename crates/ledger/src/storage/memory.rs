use super::{Checker, Storage};
use crate::{Error, Kind, Op, Result, Token};
use parking_lot::Mutex;
use std::collections::HashSet;

/// In-process [`Storage`] keyed uniquely by token value.
///
/// Suitable for tests and single-node deployments where durability across
/// restarts is not required.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tokens: Mutex<HashSet<Token>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.lock().contains(token)
    }
}

impl Checker for MemoryStorage {
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

impl Storage for MemoryStorage {
    async fn insert(&self, token: &Token) -> Result<()> {
        const OP: Op = Op::new("storage/memory.insert");

        token.validate()?;

        if !self.tokens.lock().insert(token.clone()) {
            return Err(Error::builder()
                .op(OP)
                .kind(Kind::Duplicate)
                .token(token.clone())
                .build());
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%token, "stored");

        Ok(())
    }
}
