use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use super::errors::{Result, TransferError};
use super::types::ItemId;

/// One cancellation token per in-flight item.
///
/// A token lives from `issue` until `release`. Holding a live token is what
/// entitles an executor to report an outcome for that id, so `issue` refuses a
/// second token for the same id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: HashMap<ItemId, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, id: ItemId) -> Result<CancellationToken> {
        if self.tokens.contains_key(&id) {
            return Err(TransferError::DuplicateDispatch(id));
        }

        let token = CancellationToken::new();
        self.tokens.insert(id, token.clone());
        Ok(token)
    }

    /// Signals the token for `id`. Returns false if there is none.
    pub fn cancel(&self, id: &ItemId) -> bool {
        match self.tokens.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signals every live token, then forgets them all
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tokens.len();
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Drops the token for `id`. Idempotent, and never signals.
    pub fn release(&mut self, id: &ItemId) -> bool {
        self.tokens.remove(id).is_some()
    }

    pub fn is_live(&self, id: &ItemId) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
