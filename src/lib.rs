//! # kvtap
//!
//! Change-data capture for embedded key-value stores.
//!
//! ## Core Concepts
//!
//! - **Interception**: [`ListenStore`] wraps any [`KvStore`] and reports
//!   every operation without changing the store's behavior
//! - **Listeners**: per-observer permission filters deciding which
//!   operations and keys each observer may see
//! - **Framing**: fixed binary, newline-delimited and JSON trace encodings
//! - **Tables**: optional decoding of raw entries into relational row updates
//! - **Streaming**: fan-in/fan-out of listener output to file, memory and
//!   TCP sinks
//!
//! ## Example
//!
//! ```ignore
//! use kvtap::{KeyFilter, KvStore, ListenStore, Listener, MemStore, Operation, StateListener};
//!
//! let output = Arc::new(StateListener::new());
//! let mut filter = KeyFilter::with_operations([Operation::Write]);
//! filter.add_key_to_whitelist(b"acct:alice".to_vec());
//!
//! let store = ListenStore::new(
//!     MemStore::new(),
//!     vec![Arc::new(Listener::with_filter(output.clone(), filter))],
//! );
//! store.set(b"acct:alice", b"100")?;
//!
//! let service = StreamingService::default();
//! service.init(&options)?;
//! service.add_source("accounts", output.as_ref())?;
//! service.create_destination("accounts")?;
//! let handle = service.stream()?;
//! ```

pub mod codec;
pub mod error;
pub mod listener;
pub mod store;
pub mod streaming;
pub mod table;
pub mod types;

// Re-exports
pub use codec::{FrameFormat, TraceOperation};
pub use error::{Result, TapError};
pub use listener::{Emitter, FrameWriter, KeyFilter, Listener, OutputGate, StateListener};
pub use store::{KvIterator, KvStore, ListenIterator, ListenStore, MemStore};
pub use streaming::{
    AppOptions, FileSink, Interrupt, MemorySink, Sink, SinkKind, SinkRegistry, StreamHandle,
    StreamState, StreamerConfig, StreamingService, TcpSink,
};
pub use table::{TableDecoder, TableInfo, TableSchema, TableUpdate, UpdateMode};
pub use types::{Event, Operation, TraceContext};
