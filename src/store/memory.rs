//! In-memory ordered key-value store.

use super::{KvIterator, KvStore};
use crate::error::{Result, TapError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A `BTreeMap`-backed store.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        self.validate_key(key)?;
        Ok(self.entries.read().contains_key(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validate_key(key)?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn iterator<'a>(
        &'a self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<Box<dyn KvIterator + 'a>> {
        Ok(Box::new(MemIterator::new(
            &self.entries.read(),
            start,
            end,
            ascending,
        )))
    }
}

/// Cursor over a snapshot of a [`MemStore`] range.
pub struct MemIterator {
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl MemIterator {
    fn new(
        map: &BTreeMap<Vec<u8>, Vec<u8>>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Self {
        let empty_range = matches!((start, end), (Some(s), Some(e)) if s >= e);

        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = if empty_range {
            Vec::new()
        } else {
            let lower = start.map_or(Bound::Unbounded, Bound::Included);
            let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
            map.range::<[u8], _>((lower, upper))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        if !ascending {
            entries.reverse();
        }

        Self {
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
            entries,
            position: 0,
        }
    }

    fn current(&self) -> Result<&(Vec<u8>, Vec<u8>)> {
        self.entries
            .get(self.position)
            .ok_or_else(|| TapError::InvalidOperation("iterator is exhausted".into()))
    }
}

impl KvIterator for MemIterator {
    fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        (self.start.as_deref(), self.end.as_deref())
    }

    fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    fn next(&mut self) {
        if self.valid() {
            self.position += 1;
        }
    }

    fn key(&self) -> Result<&[u8]> {
        Ok(&self.current()?.0)
    }

    fn value(&self) -> Result<&[u8]> {
        Ok(&self.current()?.1)
    }

    fn error(&self) -> Option<&TapError> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.position = self.entries.len();
        Ok(())
    }
}
