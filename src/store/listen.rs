//! Store interceptor emitting operations to listeners.

use super::{KvIterator, KvStore};
use crate::error::{Result, TapError};
use crate::listener::Listener;
use crate::types::{Event, Operation};
use std::sync::Arc;

/// Wraps a [`KvStore`] and reports every operation to its listeners.
///
/// The wrapped store performs each operation first; the event is then
/// delivered to every listener before the call returns. A listener
/// failure does not undo the store operation. It is logged and returned
/// to the caller, since a torn trace cannot be repaired downstream.
///
/// Reads are only reported when at least one listener accepts
/// [`Operation::Read`]. Cursors report keys and values lazily, as the
/// caller asks for them.
pub struct ListenStore<S> {
    parent: S,
    listeners: Vec<Arc<Listener>>,
}

impl<S: KvStore> ListenStore<S> {
    pub fn new(parent: S, listeners: Vec<Arc<Listener>>) -> Self {
        Self { parent, listeners }
    }

    pub fn parent(&self) -> &S {
        &self.parent
    }

    pub fn into_inner(self) -> S {
        self.parent
    }

    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.listeners
    }

    fn observed(&self, op: Operation) -> bool {
        self.listeners.iter().any(|l| l.allows_operation(op))
    }
}

/// Deliver an event to every listener, returning the first failure.
fn emit(listeners: &[Arc<Listener>], event: &Event<'_>) -> Result<()> {
    let mut first_error: Option<TapError> = None;

    for listener in listeners {
        if let Err(e) = listener.observe(event) {
            tracing::error!(
                operation = %event.operation,
                key = %hex::encode(event.key),
                error = %e,
                "listener failed to observe store operation"
            );
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl<S: KvStore> KvStore for ListenStore<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.parent.validate_key(key)?;
        let value = self.parent.get(key)?;

        if self.observed(Operation::Read) {
            emit(
                &self.listeners,
                &Event::new(Operation::Read, key, value.as_deref()),
            )?;
        }
        Ok(value)
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        self.parent.validate_key(key)?;
        self.parent.has(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.parent.validate_key(key)?;
        self.parent.set(key, value)?;
        emit(
            &self.listeners,
            &Event::new(Operation::Write, key, Some(value)),
        )
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.parent.validate_key(key)?;
        self.parent.delete(key)?;
        emit(&self.listeners, &Event::new(Operation::Delete, key, None))
    }

    fn iterator<'a>(
        &'a self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<Box<dyn KvIterator + 'a>> {
        let parent = self.parent.iterator(start, end, ascending)?;
        Ok(Box::new(ListenIterator {
            parent,
            listeners: &self.listeners,
        }))
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        self.parent.validate_key(key)
    }
}

/// Cursor reporting each key and value read through it.
pub struct ListenIterator<'a> {
    parent: Box<dyn KvIterator + 'a>,
    listeners: &'a [Arc<Listener>],
}

impl KvIterator for ListenIterator<'_> {
    fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        self.parent.domain()
    }

    fn valid(&self) -> bool {
        self.parent.valid()
    }

    fn next(&mut self) {
        self.parent.next()
    }

    fn key(&self) -> Result<&[u8]> {
        let key = self.parent.key()?;
        emit(self.listeners, &Event::new(Operation::IterateKey, key, None))?;
        Ok(key)
    }

    /// Value events carry the current key so key filters apply to them.
    fn value(&self) -> Result<&[u8]> {
        let value = self.parent.value()?;
        let key = self.parent.key()?;
        emit(
            self.listeners,
            &Event::new(Operation::IterateValue, key, Some(value)),
        )?;
        Ok(value)
    }

    fn error(&self) -> Option<&TapError> {
        self.parent.error()
    }

    fn close(&mut self) -> Result<()> {
        self.parent.close()
    }
}
