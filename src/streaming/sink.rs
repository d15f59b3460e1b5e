//! Output sinks and the registry that builds them.

use super::config::StreamerConfig;
use crate::error::{Result, TapError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Destination for streamed frames.
///
/// Frames are written verbatim. `close` is idempotent; writes after
/// close fail.
pub trait Sink: Send {
    /// Write one frame.
    fn write(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Flush and release the destination.
    fn close(&mut self) -> io::Result<()>;

    /// Handle that can unblock a `write` stuck on another thread.
    /// Sinks whose writes cannot stall return `None`.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

/// Breaks a sink out of a blocked write from another thread.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self) -> io::Result<()>;
}

/// Shutting a socket down fails any write blocked on it.
impl Interrupt for TcpStream {
    fn interrupt(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed")
}

/// Appends frames to a file, creating it if absent.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Open `path` for appending, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// The file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed_error)?;
        writer.write_all(frame)?;
        writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryBuffer {
    frames: Vec<Vec<u8>>,
    closed: bool,
}

/// Keeps frames in memory. Clones share the same buffer, so one clone
/// can be handed to the streaming service and another inspected.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<MemoryBuffer>>,
}

impl MemorySink {
    /// An empty, open sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.buffer.lock().frames.clone()
    }

    /// All written bytes, concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.buffer.lock().frames.concat()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }
}

impl Sink for MemorySink {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(closed_error());
        }
        buffer.frames.push(frame.to_vec());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.buffer.lock().closed = true;
        Ok(())
    }
}

/// Streams frames over a TCP connection.
pub struct TcpSink {
    stream: Option<TcpStream>,
    /// Second handle to the same socket, used to interrupt writes.
    control: Arc<TcpStream>,
}

impl TcpSink {
    /// Connect to `address` (`host:port`).
    pub fn connect(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        let control = Arc::new(stream.try_clone()?);
        Ok(Self {
            stream: Some(stream),
            control,
        })
    }
}

impl Sink for TcpSink {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream
            .as_mut()
            .ok_or_else(closed_error)?
            .write_all(frame)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            stream.interrupt()?;
        }
        Ok(())
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        let control: Arc<dyn Interrupt> = self.control.clone();
        Some(control)
    }
}

/// Kinds of sink the registry can build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkKind {
    File,
    Memory,
    Tcp,
}

impl SinkKind {
    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::File => "file",
            SinkKind::Memory => "memory",
            SinkKind::Tcp => "tcp",
        }
    }
}

impl FromStr for SinkKind {
    type Err = TapError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "file" | "f" => Ok(SinkKind::File),
            "memory" | "mem" => Ok(SinkKind::Memory),
            "tcp" => Ok(SinkKind::Tcp),
            _ => Err(TapError::UnknownSink(name.to_string())),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a sink for a logical path.
pub type SinkConstructor = fn(&StreamerConfig, &str) -> Result<Box<dyn Sink>>;

/// Maps sink kinds to constructors.
///
/// Built once at startup and handed to the streaming service.
pub struct SinkRegistry {
    constructors: HashMap<SinkKind, SinkConstructor>,
}

impl SinkRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the file, memory and tcp sinks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SinkKind::File, file_sink);
        registry.register(SinkKind::Memory, memory_sink);
        registry.register(SinkKind::Tcp, tcp_sink);
        registry
    }

    /// Register a constructor, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: SinkKind,
        constructor: SinkConstructor,
    ) -> Option<SinkConstructor> {
        self.constructors.insert(kind, constructor)
    }

    /// Build a sink of the named type for `path`.
    pub fn create(
        &self,
        name: &str,
        config: &StreamerConfig,
        path: &str,
    ) -> Result<Box<dyn Sink>> {
        let kind: SinkKind = name.parse()?;
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| TapError::UnknownSink(format!("no constructor registered for {}", kind)))?;
        constructor(config, path)
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Destination file for `path`, which must stay inside `dir`.
fn destination_file(dir: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let contained = !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !contained {
        return Err(TapError::Config(format!(
            "stream path {:?} must be a relative file name",
            path
        )));
    }
    Ok(dir.join(relative))
}

fn file_sink(config: &StreamerConfig, path: &str) -> Result<Box<dyn Sink>> {
    let dir = config
        .write_dir_path
        .as_ref()
        .ok_or_else(|| TapError::Config("file sinks need a write directory".into()))?;
    let sink = FileSink::open(destination_file(dir, path)?)?;
    Ok(Box::new(sink))
}

fn memory_sink(_config: &StreamerConfig, _path: &str) -> Result<Box<dyn Sink>> {
    Ok(Box::new(MemorySink::new()))
}

fn tcp_sink(config: &StreamerConfig, _path: &str) -> Result<Box<dyn Sink>> {
    let address = config
        .tcp_address
        .as_deref()
        .ok_or_else(|| TapError::Config("tcp sinks need an address".into()))?;
    Ok(Box::new(TcpSink::connect(address)?))
}
