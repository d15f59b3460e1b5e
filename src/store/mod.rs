//! Key-value store capability and the listening interceptor.
//!
//! [`KvStore`] is the operation surface the interceptor wraps. Any
//! embedded store implementing it can be observed by wrapping it in a
//! [`ListenStore`], which itself implements [`KvStore`] so it drops in
//! wherever the raw store was used.

mod listen;
mod memory;

pub use listen::{ListenIterator, ListenStore};
pub use memory::{MemIterator, MemStore};

use crate::error::{Result, TapError};

/// Cursor over a key range.
///
/// `key` and `value` fail once the cursor is exhausted.
pub trait KvIterator {
    /// The `(start, end)` bounds the cursor was created with.
    fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>);

    fn valid(&self) -> bool;

    fn next(&mut self);

    fn key(&self) -> Result<&[u8]>;

    fn value(&self) -> Result<&[u8]>;

    /// Error encountered while iterating, if any.
    fn error(&self) -> Option<&TapError>;

    fn close(&mut self) -> Result<()>;
}

/// Operation surface of an embedded key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> Result<bool>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Iterate `[start, end)`. `None` bounds are open.
    fn iterator<'a>(
        &'a self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<Box<dyn KvIterator + 'a>>;

    /// The store's key validity rule. Keys must be non-empty by default.
    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(TapError::InvalidKey("key is empty".into()));
        }
        Ok(())
    }
}
