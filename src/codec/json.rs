//! JSON trace records, one object per line.

use crate::error::{Result, TapError};
use crate::table::{TableUpdate, UpdateMode};
use crate::types::{Event, Operation, TraceContext};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// A traced store operation with base64 key and value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceOperation {
    pub operation: Operation,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub metadata: TraceContext,
}

impl TraceOperation {
    /// Decoded key bytes.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.key)
            .map_err(|e| TapError::InvalidFrame(format!("key is not base64: {}", e)))
    }

    /// Decoded value bytes.
    pub fn value_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.value)
            .map_err(|e| TapError::InvalidFrame(format!("value is not base64: {}", e)))
    }
}

#[derive(Serialize)]
struct TraceOperationRef<'a> {
    operation: Operation,
    key: String,
    value: String,
    metadata: &'a TraceContext,
}

/// Table update as emitted by listeners carrying a table decoder.
#[derive(Serialize)]
struct TableUpdateRecord<'a> {
    operation: Operation,
    table: &'a str,
    mode: UpdateMode,
    updated: &'a Option<serde_json::Value>,
    cleared_fields: &'a [String],
    metadata: &'a TraceContext,
}

/// Encode an event as a newline-terminated JSON trace record.
///
/// Absent values are encoded as the base64 of empty bytes.
pub fn encode_json(event: &Event<'_>, metadata: &TraceContext) -> Result<Vec<u8>> {
    let record = TraceOperationRef {
        operation: event.operation,
        key: STANDARD.encode(event.key),
        value: STANDARD.encode(event.value_bytes()),
        metadata,
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one JSON trace record (with or without its trailing newline).
pub fn decode_json(line: &[u8]) -> Result<TraceOperation> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    serde_json::from_slice(line).map_err(|e| TapError::InvalidFrame(e.to_string()))
}

/// Encode a decoded table update as a newline-terminated JSON record.
pub fn encode_table_update(
    operation: Operation,
    update: &TableUpdate,
    metadata: &TraceContext,
) -> Result<Vec<u8>> {
    let record = TableUpdateRecord {
        operation,
        table: &update.table,
        mode: update.mode,
        updated: &update.updated,
        cleared_fields: &update.cleared_fields,
        metadata,
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_record_shape() {
        let mut metadata = TraceContext::new();
        metadata.insert("block".into(), json!(42));

        let event = Event::new(Operation::Write, b"acct:alice", Some(b"\x00\xff"));
        let line = encode_json(&event, &metadata).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["operation"], "write");
        assert_eq!(value["key"], STANDARD.encode(b"acct:alice"));
        assert_eq!(value["value"], "AP8=");
        assert_eq!(value["metadata"]["block"], 42);
    }

    #[test]
    fn test_deletion_keeps_value_field() {
        let event = Event::new(Operation::Delete, b"gone", None);
        let line = encode_json(&event, &TraceContext::new()).unwrap();

        let decoded = decode_json(&line).unwrap();
        assert_eq!(decoded.operation, Operation::Delete);
        assert_eq!(decoded.value, "");
        assert!(decoded.value_bytes().unwrap().is_empty());
        assert_eq!(decoded.key_bytes().unwrap(), b"gone");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_json(b"{not json}\n"),
            Err(TapError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_table_update_record() {
        let update = TableUpdate::patch(
            "Supply",
            Some(json!({"denom": "atom"})),
            vec!["amount".to_string()],
        );
        let line = encode_table_update(Operation::Delete, &update, &TraceContext::new()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["table"], "Supply");
        assert_eq!(value["mode"], "patch");
        assert_eq!(value["updated"]["denom"], "atom");
        assert_eq!(value["cleared_fields"], json!(["amount"]));
    }
}
