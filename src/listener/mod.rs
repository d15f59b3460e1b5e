//! Listeners: permission filtering and frame output for observers.
//!
//! A [`Listener`] is registered with a [`crate::store::ListenStore`]. On
//! each intercepted operation the listener consults its [`KeyFilter`],
//! encodes allowed events, and writes the frames to a [`FrameWriter`].
//! The usual writer is a [`StateListener`], whose bounded channel is the
//! source side of the streaming service.
//!
//! # Example
//!
//! ```ignore
//! let output = Arc::new(StateListener::new());
//! let mut filter = KeyFilter::with_operations([Operation::Write, Operation::Delete]);
//! filter.add_prefix_to_whitelist(b"acct:".to_vec());
//!
//! let listener = Arc::new(Listener::with_filter(output.clone(), filter));
//! let store = ListenStore::new(MemStore::new(), vec![listener]);
//!
//! streamer.add_source("accounts", output.as_ref())?;
//! ```

mod channel;
mod filter;
mod observer;

pub use channel::{Emitter, FrameWriter, OutputGate, StateListener, DEFAULT_BUFFER_SIZE};
pub use filter::KeyFilter;
pub use observer::Listener;
