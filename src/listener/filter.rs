//! Per-listener permission filter.

use crate::types::Operation;
use std::collections::{BTreeSet, HashSet};

/// Decides which operations and keys a listener may observe.
///
/// Empty whitelists allow every key. The blacklist always wins over the
/// whitelist. Key lists match exactly, prefix lists match by prefix, and
/// the empty prefix matches every key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyFilter {
    allowed_operations: HashSet<Operation>,
    whitelisted_keys: HashSet<Vec<u8>>,
    whitelisted_prefixes: BTreeSet<Vec<u8>>,
    blacklisted_keys: HashSet<Vec<u8>>,
    blacklisted_prefixes: BTreeSet<Vec<u8>>,
}

impl KeyFilter {
    /// A filter allowing nothing until operations are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter allowing every operation on every key.
    pub fn allow_all() -> Self {
        Self::with_operations(Operation::ALL)
    }

    /// A filter allowing the given operations on every key.
    pub fn with_operations(ops: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            allowed_operations: ops.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Whether `op` on `key` may be observed.
    pub fn allowed(&self, op: Operation, key: &[u8]) -> bool {
        if !self.allows_operation(op) {
            return false;
        }

        let whitelisted = (self.whitelisted_keys.is_empty() && self.whitelisted_prefixes.is_empty())
            || lists_contain(&self.whitelisted_keys, &self.whitelisted_prefixes, key);

        whitelisted && !lists_contain(&self.blacklisted_keys, &self.blacklisted_prefixes, key)
    }

    /// Whether `op` is allowed at all.
    pub fn allows_operation(&self, op: Operation) -> bool {
        self.allowed_operations.contains(&op)
    }

    /// Allow `op`.
    pub fn allow_operation(&mut self, op: Operation) -> &mut Self {
        self.allowed_operations.insert(op);
        self
    }

    /// Stop allowing `op`.
    pub fn disallow_operation(&mut self, op: Operation) -> &mut Self {
        self.allowed_operations.remove(&op);
        self
    }

    /// Whitelist an exact key.
    pub fn add_key_to_whitelist(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.whitelisted_keys.insert(key.into());
        self
    }

    /// Remove an exact key from the whitelist.
    pub fn remove_key_from_whitelist(&mut self, key: &[u8]) -> &mut Self {
        self.whitelisted_keys.remove(key);
        self
    }

    /// Whitelist every key starting with `prefix`. The empty prefix
    /// matches every key.
    pub fn add_prefix_to_whitelist(&mut self, prefix: impl Into<Vec<u8>>) -> &mut Self {
        self.whitelisted_prefixes.insert(prefix.into());
        self
    }

    /// Remove a prefix from the whitelist.
    pub fn remove_prefix_from_whitelist(&mut self, prefix: &[u8]) -> &mut Self {
        self.whitelisted_prefixes.remove(prefix);
        self
    }

    /// Blacklist an exact key.
    pub fn add_key_to_blacklist(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.blacklisted_keys.insert(key.into());
        self
    }

    /// Remove an exact key from the blacklist.
    pub fn remove_key_from_blacklist(&mut self, key: &[u8]) -> &mut Self {
        self.blacklisted_keys.remove(key);
        self
    }

    /// Blacklist every key starting with `prefix`.
    pub fn add_prefix_to_blacklist(&mut self, prefix: impl Into<Vec<u8>>) -> &mut Self {
        self.blacklisted_prefixes.insert(prefix.into());
        self
    }

    /// Remove a prefix from the blacklist.
    pub fn remove_prefix_from_blacklist(&mut self, prefix: &[u8]) -> &mut Self {
        self.blacklisted_prefixes.remove(prefix);
        self
    }
}

/// Exact-key match or prefix match, evaluated independently.
fn lists_contain(keys: &HashSet<Vec<u8>>, prefixes: &BTreeSet<Vec<u8>>, key: &[u8]) -> bool {
    keys.contains(key) || prefixes.iter().any(|p| key.starts_with(p))
}
