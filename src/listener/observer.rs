//! Registered observers of store operations.

use super::channel::FrameWriter;
use super::filter::KeyFilter;
use crate::codec::{encode_table_update, FrameFormat};
use crate::error::Result;
use crate::table::TableDecoder;
use crate::types::{Event, Operation, TraceContext};
use parking_lot::RwLock;
use std::sync::Arc;

/// An observer of store operations.
///
/// Each listener gates events through its own [`KeyFilter`], encodes the
/// ones it may see, and hands the frames to its writer. A listener with
/// a table decoder emits decoded table updates for writes and deletes
/// instead of raw frames.
pub struct Listener {
    writer: RwLock<Arc<dyn FrameWriter>>,
    context: RwLock<TraceContext>,
    filter: RwLock<KeyFilter>,
    format: FrameFormat,
    decoder: Option<Arc<dyn TableDecoder>>,
}

impl Listener {
    /// A listener observing every operation on every key.
    pub fn new(writer: Arc<dyn FrameWriter>) -> Self {
        Self::with_filter(writer, KeyFilter::allow_all())
    }

    /// A listener gated by `filter`.
    pub fn with_filter(writer: Arc<dyn FrameWriter>, filter: KeyFilter) -> Self {
        Self {
            writer: RwLock::new(writer),
            context: RwLock::new(TraceContext::new()),
            filter: RwLock::new(filter),
            format: FrameFormat::default(),
            decoder: None,
        }
    }

    /// Encode raw events with `format`. Defaults to JSON.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Attach `context` as the metadata of every JSON record.
    pub fn with_context(self, context: TraceContext) -> Self {
        *self.context.write() = context;
        self
    }

    /// Emit writes and deletes as table updates decoded by `decoder`.
    pub fn with_table_decoder(mut self, decoder: Arc<dyn TableDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// The raw event encoding.
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Copy of the current trace context.
    pub fn context(&self) -> TraceContext {
        self.context.read().clone()
    }

    /// Replace the trace context used by later events.
    pub fn set_trace_context(&self, context: TraceContext) {
        *self.context.write() = context;
    }

    /// Send later frames to `writer`.
    pub fn set_writer(&self, writer: Arc<dyn FrameWriter>) {
        *self.writer.write() = writer;
    }

    /// Snapshot of the current filter.
    pub fn filter(&self) -> KeyFilter {
        self.filter.read().clone()
    }

    /// Mutate the filter. Filtering on other threads waits for the update.
    pub fn update_filter<R>(&self, update: impl FnOnce(&mut KeyFilter) -> R) -> R {
        update(&mut self.filter.write())
    }

    /// Whether this listener may see `op` on `key`.
    pub fn allowed(&self, op: Operation, key: &[u8]) -> bool {
        self.filter.read().allowed(op, key)
    }

    /// Whether this listener accepts `op` on any key.
    pub fn allows_operation(&self, op: Operation) -> bool {
        self.filter.read().allows_operation(op)
    }

    /// Deliver an event if this listener may see it.
    ///
    /// Everything an event produces is handed to the writer in a single
    /// write, so a rejected write leaves no partial trace behind. Table
    /// updates are newline-terminated JSON records and stay separable.
    pub fn observe(&self, event: &Event<'_>) -> Result<()> {
        if !self.allowed(event.operation, event.key) {
            return Ok(());
        }

        let frame = {
            let context = self.context.read();
            match &self.decoder {
                Some(decoder) if event.operation.is_mutation() => {
                    let records = decoder
                        .decode(event.key, event.value)?
                        .iter()
                        .map(|update| encode_table_update(event.operation, update, &context))
                        .collect::<Result<Vec<_>>>()?;
                    if records.is_empty() {
                        None
                    } else {
                        Some(records.concat())
                    }
                }
                _ => self.format.encode(event, &context)?,
            }
        };

        match frame {
            Some(frame) => {
                let writer = self.writer.read().clone();
                writer.write_frame(&frame)
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("format", &self.format)
            .field("filter", &*self.filter.read())
            .field("decoded", &self.decoder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_fixed, decode_json};
    use crate::listener::channel::{Emitter, StateListener};
    use crate::table::bank::{supply_key, BankTableDecoder, SEND_ENABLED_KEY};
    use serde_json::json;

    #[test]
    fn test_observe_respects_filter() {
        let output = Arc::new(StateListener::new());
        let mut filter = KeyFilter::with_operations([Operation::Write]);
        filter.add_prefix_to_whitelist(b"acct:".to_vec());
        let listener = Listener::with_filter(output.clone(), filter);

        listener
            .observe(&Event::new(Operation::Write, b"acct:alice", Some(b"1")))
            .unwrap();
        listener
            .observe(&Event::new(Operation::Write, b"other", Some(b"2")))
            .unwrap();
        listener
            .observe(&Event::new(Operation::Delete, b"acct:alice", None))
            .unwrap();

        assert_eq!(output.len(), 1);
        let trace = decode_json(&output.output().recv().unwrap()).unwrap();
        assert_eq!(trace.key_bytes().unwrap(), b"acct:alice");
    }

    #[test]
    fn test_context_travels_with_json() {
        let output = Arc::new(StateListener::new());
        let mut context = TraceContext::new();
        context.insert("store".into(), json!("bank"));
        let listener = Listener::new(output.clone()).with_context(context);

        listener
            .observe(&Event::new(Operation::Read, b"k", Some(b"v")))
            .unwrap();
        let trace = decode_json(&output.output().recv().unwrap()).unwrap();
        assert_eq!(trace.metadata["store"], "bank");
    }

    #[test]
    fn test_set_writer_redirects_frames() {
        let first = Arc::new(StateListener::new());
        let second = Arc::new(StateListener::new());
        let listener = Listener::new(first.clone()).with_format(FrameFormat::Fixed);

        listener.set_writer(second.clone());
        listener
            .observe(&Event::new(Operation::Write, b"k", Some(b"v")))
            .unwrap();

        assert!(first.is_empty());
        let frame = second.output().recv().unwrap();
        assert_eq!(decode_fixed(&frame).unwrap().0.value, b"v");
    }

    #[test]
    fn test_decoded_listener_emits_table_updates() {
        let output = Arc::new(StateListener::new());
        let listener =
            Listener::new(output.clone()).with_table_decoder(Arc::new(BankTableDecoder::new()));

        listener
            .observe(&Event::new(Operation::Delete, &supply_key("uatom"), None))
            .unwrap();
        let record: serde_json::Value =
            serde_json::from_slice(&output.output().recv().unwrap()).unwrap();
        assert_eq!(record["operation"], "delete");
        assert_eq!(record["table"], "Supply");
        assert_eq!(record["mode"], "patch");
        assert_eq!(record["cleared_fields"], json!(["amount"]));

        // Reads are not table changes and keep the raw framing.
        listener
            .observe(&Event::new(Operation::Read, &supply_key("uatom"), Some(b"5")))
            .unwrap();
        let trace = decode_json(&output.output().recv().unwrap()).unwrap();
        assert_eq!(trace.operation, Operation::Read);
    }

    #[test]
    fn test_decode_error_propagates() {
        let output = Arc::new(StateListener::new());
        let listener =
            Listener::new(output.clone()).with_table_decoder(Arc::new(BankTableDecoder::new()));

        let result = listener.observe(&Event::new(
            Operation::Write,
            &supply_key("uatom"),
            Some(b"not-a-number"),
        ));
        assert!(result.is_err());
        assert!(output.is_empty());
    }

    #[test]
    fn test_multi_update_event_is_one_write() {
        let output = Arc::new(StateListener::with_capacity(1));
        let listener =
            Listener::new(output.clone()).with_table_decoder(Arc::new(BankTableDecoder::new()));
        let flags = br#"[{"denom":"uatom","enabled":true},{"denom":"uosmo","enabled":false}]"#;

        listener
            .observe(&Event::new(Operation::Write, SEND_ENABLED_KEY, Some(&flags[..])))
            .unwrap();
        assert_eq!(output.len(), 1);

        let frame = output.output().recv().unwrap();
        let records: Vec<serde_json::Value> = frame
            .split_inclusive(|b| *b == b'\n')
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["updated"]["denom"], "uosmo");

        // With the buffer full the whole event is rejected, not a prefix of it.
        output.write_frame(b"filler").unwrap();
        let result = listener.observe(&Event::new(
            Operation::Write,
            SEND_ENABLED_KEY,
            Some(&flags[..]),
        ));
        assert!(result.is_err());
        assert_eq!(output.output().try_iter().collect::<Vec<_>>(), vec![b"filler".to_vec()]);
    }

    #[test]
    fn test_update_filter() {
        let listener = Listener::new(Arc::new(StateListener::new()));
        assert!(listener.allowed(Operation::Write, b"secret"));

        listener.update_filter(|f| {
            f.add_prefix_to_blacklist(b"sec".to_vec());
        });
        assert!(!listener.allowed(Operation::Write, b"secret"));
        assert!(!listener.filter().allowed(Operation::Write, b"secret"));
    }
}
