//! Fan-in/fan-out streaming of listener output to sinks.

use super::config::{AppOptions, StreamerConfig, DEFAULT_CLOSE_TIMEOUT_MS};
use super::sink::{Interrupt, Sink, SinkRegistry};
use crate::error::{Result, TapError};
use crate::listener::{Emitter, OutputGate};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long `close` gives an interrupted sink to give up its write.
const INTERRUPT_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle of the streaming service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Closed,
}

struct Source {
    receiver: Receiver<Vec<u8>>,
    gate: Option<OutputGate>,
}

/// A sink with its own lock, so one stalled write never blocks the
/// rest of the path's bookkeeping.
#[derive(Clone)]
struct Destination {
    sink: Arc<Mutex<Box<dyn Sink>>>,
    interrupter: Option<Arc<dyn Interrupt>>,
}

/// Sources and destinations registered under one path.
struct PathRoute {
    sources: Vec<Source>,
    destinations: Arc<Mutex<Vec<Destination>>>,
    /// Set once `close` starts closing the sinks; writes stop.
    closed: Arc<AtomicBool>,
    /// Aggregation queue, present once the path's write loop runs.
    aggregate: Option<Sender<Vec<u8>>>,
}

impl PathRoute {
    fn new() -> Self {
        Self {
            sources: Vec::new(),
            destinations: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            aggregate: None,
        }
    }
}

/// The sink error that stopped a stream.
struct SinkFailure {
    path: String,
    kind: io::ErrorKind,
    message: String,
}

impl SinkFailure {
    fn to_error(&self) -> TapError {
        TapError::Sink {
            path: self.path.clone(),
            source: io::Error::new(self.kind, self.message.clone()),
        }
    }
}

/// A one-shot broadcast: dropping the sender wakes every receiver.
struct Signal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Signal {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    fn fire(&self) {
        self.tx.lock().take();
    }

    /// A token held by a worker; the signal's receivers disconnect once
    /// every token is dropped and the signal has fired.
    fn token(&self) -> Option<Sender<()>> {
        self.tx.lock().clone()
    }
}

/// Shutdown coordination shared by every worker.
///
/// Shutdown runs in two phases. `quit` tells forwarders to stop
/// listening and hand over what their sources already hold; forwarders
/// hold `forwarders` tokens so `close` can tell when they are gone.
/// `drain` then tells write loops to flush their queues and exit. Every
/// worker holds a `done` token, which is what [`StreamHandle`] waits on.
struct Shutdown {
    quit: Signal,
    forwarders: Signal,
    drain: Signal,
    done: Signal,
    fatal: Mutex<Option<SinkFailure>>,
}

impl Shutdown {
    fn new() -> Self {
        Self {
            quit: Signal::new(),
            forwarders: Signal::new(),
            drain: Signal::new(),
            done: Signal::new(),
            fatal: Mutex::new(None),
        }
    }

    fn stop_forwarders(&self) {
        self.quit.fire();
        self.forwarders.fire();
    }

    fn finish(&self) {
        self.drain.fire();
        self.done.fire();
    }

    fn fail(&self, failure: SinkFailure) {
        self.fatal.lock().get_or_insert(failure);
        self.stop_forwarders();
        self.finish();
    }

    fn result(&self) -> Result<()> {
        match &*self.fatal.lock() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

/// Handle returned by [`StreamingService::stream`].
pub struct StreamHandle {
    shutdown: Arc<Shutdown>,
}

impl StreamHandle {
    /// Block until the service is closed or a sink fails.
    ///
    /// Returns the sink error that stopped the stream, if any. Every
    /// call reports the same error.
    pub fn wait(&self) -> Result<()> {
        let _ = self.shutdown.done.rx.recv();
        self.shutdown.result()
    }

    /// Like [`StreamHandle::wait`], giving up after `timeout`.
    /// Returns `None` if the stream is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.shutdown.done.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => None,
            _ => Some(self.shutdown.result()),
        }
    }
}

struct Inner {
    state: StreamState,
    config: Option<StreamerConfig>,
    routes: BTreeMap<String, PathRoute>,
}

/// Multiplexes listener output into per-path destinations.
///
/// Every path gets one aggregation queue drained by a write loop that
/// copies each frame to all of the path's sinks, and one forwarding loop
/// per source feeding that queue. [`close`] stops the sources, lets the
/// loops deliver every frame the sources had accepted, and then closes
/// every sink.
///
/// [`close`]: StreamingService::close
pub struct StreamingService {
    registry: SinkRegistry,
    inner: Mutex<Inner>,
    shutdown: Arc<Shutdown>,
}

impl StreamingService {
    /// A service building destinations from `registry`.
    pub fn new(registry: SinkRegistry) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                config: None,
                routes: BTreeMap::new(),
            }),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Load configuration. Only the first call takes effect.
    pub fn init(&self, opts: &dyn AppOptions) -> Result<()> {
        if self.is_initialized()? {
            tracing::warn!("streaming service already initialized; ignoring options");
            return Ok(());
        }
        self.init_with_config(StreamerConfig::from_options(opts)?)
    }

    /// Install an already-built configuration. Only the first call takes effect.
    pub fn init_with_config(&self, config: StreamerConfig) -> Result<()> {
        config.validate()?;

        let mut inner = self.inner.lock();
        if inner.state == StreamState::Closed {
            return Err(TapError::Closed);
        }
        if inner.config.is_some() {
            tracing::warn!("streaming service already initialized; ignoring config");
            return Ok(());
        }

        tracing::debug!(sink_type = %config.sink_type, "streaming service initialized");
        inner.config = Some(config);
        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        let inner = self.inner.lock();
        if inner.state == StreamState::Closed {
            return Err(TapError::Closed);
        }
        Ok(inner.config.is_some())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// State of a registered path.
    pub fn path_state(&self, path: &str) -> Option<StreamState> {
        let inner = self.inner.lock();
        inner.routes.get(path).map(|_| inner.state)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().routes.keys().cloned().collect()
    }

    /// Register a source for `path`.
    pub fn add_source(&self, path: &str, source: &dyn Emitter) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == StreamState::Closed {
            return Err(TapError::Closed);
        }

        let source = Source {
            receiver: source.output(),
            gate: source.gate(),
        };
        let route = inner
            .routes
            .entry(path.to_string())
            .or_insert_with(PathRoute::new);
        if let Some(aggregate) = &route.aggregate {
            self.spawn_forwarder(path, source.receiver.clone(), aggregate.clone())?;
        }
        route.sources.push(source);
        Ok(())
    }

    /// Register a destination sink for `path`. The service owns and
    /// eventually closes it.
    pub fn add_destination(&self, path: &str, sink: Box<dyn Sink>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == StreamState::Closed {
            return Err(TapError::Closed);
        }

        let streaming = inner.state == StreamState::Streaming;
        let capacity = channel_capacity(&inner);
        let route = inner
            .routes
            .entry(path.to_string())
            .or_insert_with(PathRoute::new);
        route.destinations.lock().push(Destination {
            interrupter: sink.interrupter(),
            sink: Arc::new(Mutex::new(sink)),
        });

        if streaming {
            self.start_route(path, route, capacity)?;
        }
        Ok(())
    }

    /// Build a destination for `path` with the configured sink type.
    pub fn create_destination(&self, path: &str) -> Result<()> {
        let sink = {
            let inner = self.inner.lock();
            if inner.state == StreamState::Closed {
                return Err(TapError::Closed);
            }
            let config = inner.config.as_ref().ok_or(TapError::NotInitialized)?;
            self.registry.create(&config.sink_type, config, path)?
        };
        self.add_destination(path, sink)
    }

    /// Start streaming every registered path.
    ///
    /// Returns immediately; the handle waits for [`StreamingService::close`]
    /// or a fatal sink error.
    pub fn stream(&self) -> Result<StreamHandle> {
        let mut inner = self.inner.lock();
        match inner.state {
            StreamState::Closed => return Err(TapError::Closed),
            StreamState::Streaming => {
                return Err(TapError::InvalidOperation("already streaming".into()))
            }
            StreamState::Idle => {}
        }
        if inner.config.is_none() {
            return Err(TapError::NotInitialized);
        }

        let capacity = channel_capacity(&inner);
        for (path, route) in inner.routes.iter_mut() {
            if route.destinations.lock().is_empty() {
                tracing::warn!(path = %path, sources = route.sources.len(), "path has no destinations");
                continue;
            }
            self.start_route(path, route, capacity)?;
        }

        inner.state = StreamState::Streaming;
        tracing::debug!(paths = inner.routes.len(), "streaming started");

        Ok(StreamHandle {
            shutdown: Arc::clone(&self.shutdown),
        })
    }

    /// Stop streaming and close every destination.
    ///
    /// Sources stop accepting frames first. Frames they had already
    /// accepted are delivered before the sinks are closed, as long as the
    /// sinks keep up within the configured close timeout. Sinks still
    /// stuck in a write after that are interrupted and reported as
    /// failed.
    ///
    /// All sinks are closed even if one fails; the first failure is
    /// returned. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let (routes, timeout) = {
            let mut inner = self.inner.lock();
            if inner.state == StreamState::Closed {
                tracing::warn!("streaming service already closed");
                return Ok(());
            }
            inner.state = StreamState::Closed;

            for route in inner.routes.values_mut() {
                for source in &route.sources {
                    if let Some(gate) = &source.gate {
                        gate.close();
                    }
                }
                // Forwarders hold the remaining senders; the queue
                // disconnects once they have handed everything over.
                route.aggregate = None;
            }

            let timeout = inner.config.as_ref().map_or(
                Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
                StreamerConfig::close_timeout,
            );
            let routes: Vec<(String, Arc<AtomicBool>, Vec<Destination>)> = inner
                .routes
                .iter()
                .map(|(path, route)| {
                    (
                        path.clone(),
                        Arc::clone(&route.closed),
                        route.destinations.lock().clone(),
                    )
                })
                .collect();
            (routes, timeout)
        };

        let deadline = Instant::now() + timeout;
        self.shutdown.stop_forwarders();
        let _ = self.shutdown.forwarders.rx.recv_deadline(deadline);
        self.shutdown.finish();

        if let Err(RecvTimeoutError::Timeout) = self.shutdown.done.rx.recv_deadline(deadline) {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "destinations did not drain in time; interrupting"
            );
            for (path, _, destinations) in &routes {
                for interrupter in destinations.iter().filter_map(|d| d.interrupter.as_ref()) {
                    if let Err(e) = interrupter.interrupt() {
                        tracing::warn!(path = %path, error = %e, "failed to interrupt destination");
                    }
                }
            }
            let _ = self.shutdown.done.rx.recv_timeout(INTERRUPT_GRACE);
        }

        let mut first_error = None;
        for (path, closed, destinations) in &routes {
            closed.store(true, Ordering::Release);
            for destination in destinations {
                let result = match destination.sink.try_lock_for(INTERRUPT_GRACE) {
                    Some(mut sink) => sink.close(),
                    None => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "destination stalled in write; abandoned",
                    )),
                };
                if let Err(e) = result {
                    tracing::error!(path = %path, error = %e, "failed to close destination");
                    first_error.get_or_insert(TapError::Sink {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
        }

        tracing::debug!("streaming service closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start the write loop for `route` and forwarders for its sources.
    fn start_route(&self, path: &str, route: &mut PathRoute, capacity: usize) -> Result<()> {
        if route.aggregate.is_some() {
            return Ok(());
        }

        let (aggregate_tx, aggregate_rx) = bounded(capacity);
        let writer = RouteWriter {
            path: path.to_string(),
            destinations: Arc::clone(&route.destinations),
            closed: Arc::clone(&route.closed),
            shutdown: Arc::clone(&self.shutdown),
        };
        let drain = self.shutdown.drain.rx.clone();
        self.spawn_worker(format!("kvtap-write-{}", path), move || {
            writer.run(aggregate_rx, drain)
        })?;

        for source in &route.sources {
            self.spawn_forwarder(path, source.receiver.clone(), aggregate_tx.clone())?;
        }
        route.aggregate = Some(aggregate_tx);
        Ok(())
    }

    fn spawn_forwarder(
        &self,
        path: &str,
        source: Receiver<Vec<u8>>,
        aggregate: Sender<Vec<u8>>,
    ) -> Result<()> {
        let quit = self.shutdown.quit.rx.clone();
        let token = self.shutdown.forwarders.token().ok_or(TapError::Closed)?;
        self.spawn_worker(format!("kvtap-listen-{}", path), move || {
            let _forwarding = token;
            listen_loop(source, aggregate, quit)
        })
    }

    fn spawn_worker<F>(&self, name: String, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.shutdown.done.token().ok_or(TapError::Closed)?;
        thread::Builder::new().name(name).spawn(move || {
            let _running = token;
            work();
        })?;
        Ok(())
    }
}

impl Default for StreamingService {
    fn default() -> Self {
        Self::new(SinkRegistry::with_defaults())
    }
}

fn channel_capacity(inner: &Inner) -> usize {
    inner
        .config
        .as_ref()
        .map_or(super::config::DEFAULT_CHANNEL_CAPACITY, |c| c.channel_capacity)
}

/// Forward frames from one source into the path's aggregation queue.
///
/// On quit, whatever the source already holds is handed over before the
/// loop exits.
fn listen_loop(source: Receiver<Vec<u8>>, aggregate: Sender<Vec<u8>>, quit: Receiver<()>) {
    loop {
        select! {
            recv(source) -> frame => {
                let Ok(frame) = frame else { return };
                if aggregate.send(frame).is_err() {
                    return;
                }
            }
            recv(quit) -> _ => break,
        }
    }

    for frame in source.try_iter() {
        if aggregate.send(frame).is_err() {
            return;
        }
    }
}

/// Write side of one path.
struct RouteWriter {
    path: String,
    destinations: Arc<Mutex<Vec<Destination>>>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Shutdown>,
}

impl RouteWriter {
    /// Copy aggregated frames to every sink until the queue disconnects
    /// or a drain is requested, then flush what is left.
    fn run(&self, aggregate: Receiver<Vec<u8>>, drain: Receiver<()>) {
        loop {
            select! {
                recv(aggregate) -> frame => {
                    let Ok(frame) = frame else { return };
                    if !self.deliver(&frame) {
                        return;
                    }
                }
                recv(drain) -> _ => break,
            }
        }

        for frame in aggregate.try_iter() {
            if !self.deliver(&frame) {
                return;
            }
        }
    }

    /// Write `frame` to every sink. Returns false once the path must stop.
    fn deliver(&self, frame: &[u8]) -> bool {
        let destinations = self.destinations.lock().clone();
        for destination in &destinations {
            let mut sink = destination.sink.lock();
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            if let Err(e) = sink.write(frame) {
                tracing::error!(path = %self.path, error = %e, "failed to write to destination; stopping stream");
                self.shutdown.fail(SinkFailure {
                    path: self.path.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return false;
            }
        }
        true
    }
}
