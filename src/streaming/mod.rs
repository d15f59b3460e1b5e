//! Streaming service: routes listener output to files, memory or sockets.
//!
//! Sources ([`crate::listener::Emitter`]s) and destinations ([`Sink`]s)
//! are registered under logical path names. Once streaming starts, every
//! path multiplexes its sources into all of its destinations until the
//! service is closed.
//!
//! # Example
//!
//! ```ignore
//! let service = StreamingService::new(SinkRegistry::with_defaults());
//! service.init(&json!({"streamer": {"writeDirPath": "/var/lib/kvtap"}}))?;
//!
//! service.add_source("bank", output.as_ref())?;
//! service.create_destination("bank")?;
//!
//! let handle = service.stream()?;
//! // ... store operations ...
//! service.close()?;
//! handle.wait()?;
//! ```

mod config;
mod service;
mod sink;

pub use config::{
    AppOptions, StreamerConfig, CHANNEL_CAPACITY_KEY, CLOSE_TIMEOUT_KEY, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_CLOSE_TIMEOUT_MS, SINK_TYPE_KEY, TCP_ADDRESS_KEY, WRITE_DIR_PATH_KEY,
};
pub use service::{StreamHandle, StreamState, StreamingService};
pub use sink::{
    FileSink, Interrupt, MemorySink, Sink, SinkConstructor, SinkKind, SinkRegistry, TcpSink,
};
