//! Core types shared by the interceptor, listeners and encoders.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form metadata attached to every trace record a listener emits.
pub type TraceContext = serde_json::Map<String, serde_json::Value>;

/// A key-value store operation that can be observed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "iterKey")]
    IterateKey,
    #[serde(rename = "iterValue")]
    IterateValue,
}

impl Operation {
    /// Every observable operation.
    pub const ALL: [Operation; 5] = [
        Operation::Write,
        Operation::Read,
        Operation::Delete,
        Operation::IterateKey,
        Operation::IterateValue,
    ];

    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Delete => "delete",
            Operation::IterateKey => "iterKey",
            Operation::IterateValue => "iterValue",
        }
    }

    /// Whether the operation mutates the store.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Operation::Write | Operation::Delete)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation({})", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed store operation.
///
/// Events borrow the caller's buffers and live only for the duration of
/// the emission call. A `None` value marks a deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event<'a> {
    pub operation: Operation,
    pub key: &'a [u8],
    pub value: Option<&'a [u8]>,
}

impl<'a> Event<'a> {
    pub fn new(operation: Operation, key: &'a [u8], value: Option<&'a [u8]>) -> Self {
        Self {
            operation,
            key,
            value,
        }
    }

    /// Value bytes, empty when absent.
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value.unwrap_or(&[])
    }
}
