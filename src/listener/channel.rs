//! Frame writers and the channel-backed listener output.

use crate::error::{Result, TapError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::io::Write;
use std::sync::Arc;

/// Default number of frames a [`StateListener`] buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Destination for encoded frames produced by a listener.
///
/// Writes happen on the thread performing the store operation and must
/// not block on slow consumers.
pub trait FrameWriter: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<()>;
}

/// Any writer behind a mutex can take frames directly.
impl<W: Write + Send> FrameWriter for Mutex<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.lock();
        writer.write_all(frame)?;
        Ok(())
    }
}

/// Shared open/closed switch for a listener's output.
///
/// Once closed, the owning listener rejects every further frame. Closing
/// waits for writes already in progress, so after `close` returns no new
/// frame can enter the channel.
#[derive(Clone, Debug, Default)]
pub struct OutputGate {
    closed: Arc<RwLock<bool>>,
}

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further frames.
    pub fn close(&self) {
        *self.closed.write() = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

/// A source of frames for the streaming service.
pub trait Emitter {
    /// Receiving end of the frames this source produces.
    fn output(&self) -> Receiver<Vec<u8>>;

    /// Gate the streaming service closes when it stops consuming.
    /// Sources without one keep accepting frames after close.
    fn gate(&self) -> Option<OutputGate> {
        None
    }
}

impl Emitter for Receiver<Vec<u8>> {
    fn output(&self) -> Receiver<Vec<u8>> {
        self.clone()
    }
}

type Transformation = Box<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

/// Listener output backed by a bounded channel.
///
/// Writes never wait: when the buffer is full the frame is rejected and
/// the write reports a delivery failure. Writes also fail once the
/// streaming service consuming the output has closed.
pub struct StateListener {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    gate: OutputGate,
    transformations: Vec<Transformation>,
}

impl StateListener {
    /// A listener buffering up to [`DEFAULT_BUFFER_SIZE`] frames.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// A listener buffering up to `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            gate: OutputGate::new(),
            transformations: Vec::new(),
        }
    }

    /// Add a transformation applied to each frame before it is queued.
    /// Transformations run in the order they were added.
    pub fn add_transformation<F>(&mut self, transformation: F)
    where
        F: Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    {
        self.transformations.push(Box::new(transformation));
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Whether the consumer has closed this output.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

impl Default for StateListener {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriter for StateListener {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        // The caller may reuse its buffer; queue a private copy.
        let frame = self
            .transformations
            .iter()
            .fold(frame.to_vec(), |bytes, transform| transform(bytes));

        // Held across the send so a concurrent close waits for it.
        let closed = self.gate.closed.read();
        if *closed {
            return Err(TapError::Delivery("listener output is closed".into()));
        }

        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TapError::Delivery(format!(
                "listener buffer full ({} frames); no consumer available",
                self.sender.capacity().unwrap_or(0)
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(TapError::Delivery("listener channel disconnected".into()))
            }
        }
    }
}

impl Emitter for StateListener {
    fn output(&self) -> Receiver<Vec<u8>> {
        self.receiver.clone()
    }

    fn gate(&self) -> Option<OutputGate> {
        Some(self.gate.clone())
    }
}
