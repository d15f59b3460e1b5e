//! Dispatch of keys to per-table decode functions.

use super::TableUpdate;
use crate::error::Result;

type DecodeFn = Box<dyn Fn(&[u8], Option<&[u8]>) -> Result<Vec<TableUpdate>> + Send + Sync>;

/// How a route selects keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyMatch {
    /// Keys starting with these bytes.
    Prefix(Vec<u8>),
    /// Exactly this key.
    Exact(Vec<u8>),
}

impl KeyMatch {
    fn matches(&self, key: &[u8]) -> bool {
        match self {
            KeyMatch::Prefix(prefix) => key.starts_with(prefix),
            KeyMatch::Exact(exact) => key == exact.as_slice(),
        }
    }
}

struct Route {
    matcher: KeyMatch,
    decode: DecodeFn,
}

/// Ordered list of key matchers, fixed at construction.
///
/// The first route whose matcher accepts the key decodes it; keys no
/// route accepts decode to an empty list.
#[derive(Default)]
pub struct PrefixRouter {
    routes: Vec<Route>,
}

impl PrefixRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Routes are tried in insertion order.
    pub fn route<F>(mut self, matcher: KeyMatch, decode: F) -> Self
    where
        F: Fn(&[u8], Option<&[u8]>) -> Result<Vec<TableUpdate>> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            matcher,
            decode: Box::new(decode),
        });
        self
    }

    /// Decode with the first matching route.
    pub fn decode(&self, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
        match self.routes.iter().find(|r| r.matcher.matches(key)) {
            Some(route) => (route.decode)(key, value),
            None => Ok(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
