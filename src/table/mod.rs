//! Relational projections of key-value entries.
//!
//! A [`TableDecoder`] turns a raw `(key, value)` pair into zero or more
//! [`TableUpdate`]s. Keys outside the decoder's schema decode to nothing;
//! malformed entries inside it are errors, since they mean the decoder
//! and the store's encoding have drifted apart.

pub mod bank;
mod key;
mod router;

pub use key::{KeyLayout, KeyPart};
pub use router::{KeyMatch, PrefixRouter};

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Static description of one logical table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub name: &'static str,
    /// Name of the row type carried in `TableUpdate::updated`.
    pub row_type: &'static str,
    /// Row fields composing the primary key.
    pub primary_key_fields: &'static [&'static str],
}

/// The fixed set of tables a decoder produces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub tables: Vec<TableInfo>,
}

impl TableSchema {
    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// How a table update applies to the existing row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Only the fields present change; `cleared_fields` are nulled out.
    Patch,
    /// `updated` is the whole new row.
    Replace,
}

/// A change to one table row.
#[derive(Clone, Debug, PartialEq)]
pub struct TableUpdate {
    pub table: String,
    pub mode: UpdateMode,
    pub updated: Option<serde_json::Value>,
    pub cleared_fields: Vec<String>,
}

impl TableUpdate {
    /// A partial update.
    pub fn patch(
        table: impl Into<String>,
        updated: Option<serde_json::Value>,
        cleared_fields: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            mode: UpdateMode::Patch,
            updated,
            cleared_fields,
        }
    }

    /// A whole-row replacement. Replacements never clear fields.
    pub fn replace(table: impl Into<String>, row: serde_json::Value) -> Self {
        Self {
            table: table.into(),
            mode: UpdateMode::Replace,
            updated: Some(row),
            cleared_fields: Vec::new(),
        }
    }

    /// Whether this update removes value-bearing fields.
    pub fn is_deletion(&self) -> bool {
        self.mode == UpdateMode::Patch && !self.cleared_fields.is_empty()
    }
}

/// Decodes key-value pairs into table updates.
pub trait TableDecoder: Send + Sync {
    /// The tables this decoder produces.
    fn schema(&self) -> TableSchema;

    /// Decode a key-value pair. A `None` value means the key was deleted.
    fn decode(&self, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>>;
}
