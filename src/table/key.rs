//! Key layouts: splitting a prefixed key into its identifying parts.

use crate::error::{Result, TapError};

/// One segment of a key after its prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPart {
    /// Exactly `width` bytes.
    Fixed { name: &'static str, width: usize },
    /// A single length byte followed by that many bytes.
    LengthPrefixed { name: &'static str },
    /// Everything that is left. Must be the last part.
    Rest { name: &'static str },
}

impl KeyPart {
    pub fn name(&self) -> &'static str {
        match self {
            KeyPart::Fixed { name, .. } | KeyPart::LengthPrefixed { name } | KeyPart::Rest { name } => {
                *name
            }
        }
    }
}

/// Describes how keys of one table are built: a prefix followed by parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyLayout {
    pub table: &'static str,
    pub prefix: Vec<u8>,
    pub parts: Vec<KeyPart>,
}

impl KeyLayout {
    pub fn new(table: &'static str, prefix: impl Into<Vec<u8>>, parts: Vec<KeyPart>) -> Self {
        Self {
            table,
            prefix: prefix.into(),
            parts,
        }
    }

    /// Whether `key` starts with this layout's prefix.
    pub fn matches(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Split `key` into one slice per part.
    ///
    /// The partition must be exact: missing bytes or trailing bytes after
    /// the last part are decode errors.
    pub fn split<'k>(&self, key: &'k [u8]) -> Result<Vec<&'k [u8]>> {
        let mut rest = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or_else(|| TapError::decode(self.table, "key does not carry table prefix"))?;

        let mut fields = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let (field, remaining) = match part {
                KeyPart::Fixed { name, width } => {
                    if rest.len() < *width {
                        return Err(self.short(name, *width, rest.len()));
                    }
                    rest.split_at(*width)
                }
                KeyPart::LengthPrefixed { name } => {
                    let (&len, after) = rest.split_first().ok_or_else(|| {
                        TapError::decode(self.table, format!("missing length byte for {}", name))
                    })?;
                    let len = len as usize;
                    if after.len() < len {
                        return Err(self.short(name, len, after.len()));
                    }
                    after.split_at(len)
                }
                KeyPart::Rest { .. } => (rest, &rest[rest.len()..]),
            };
            fields.push(field);
            rest = remaining;
        }

        if !rest.is_empty() {
            return Err(TapError::decode(
                self.table,
                format!("{} trailing key bytes", rest.len()),
            ));
        }

        Ok(fields)
    }

    /// Build a key from part values, the inverse of [`KeyLayout::split`].
    pub fn build(&self, fields: &[&[u8]]) -> Result<Vec<u8>> {
        if fields.len() != self.parts.len() {
            return Err(TapError::InvalidOperation(format!(
                "{} key has {} parts, got {}",
                self.table,
                self.parts.len(),
                fields.len()
            )));
        }

        let mut key = self.prefix.clone();
        for (part, field) in self.parts.iter().zip(fields) {
            match part {
                KeyPart::Fixed { name, width } if field.len() != *width => {
                    return Err(TapError::InvalidOperation(format!(
                        "{} must be {} bytes, got {}",
                        name,
                        width,
                        field.len()
                    )));
                }
                KeyPart::LengthPrefixed { name } => {
                    let len = u8::try_from(field.len()).map_err(|_| {
                        TapError::InvalidOperation(format!("{} longer than 255 bytes", name))
                    })?;
                    key.push(len);
                }
                _ => {}
            }
            key.extend_from_slice(field);
        }
        Ok(key)
    }

    fn short(&self, name: &str, want: usize, got: usize) -> TapError {
        TapError::decode(
            self.table,
            format!("{} needs {} bytes, key has {}", name, want, got),
        )
    }
}
