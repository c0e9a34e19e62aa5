//! The public engine handle.
//!
//! [`FileStreamEngine`] is cheap to clone and every method takes `&self`, so a
//! single engine can be shared between the loop thread and any number of
//! producers. Mutations travel to the loop thread either through the write
//! queue ([`FileStreamEngine::submit`]) or through the control channel
//! (stream creation, closing and stopping).

use crate::control::{
    self, Control, ControlReceiver, ControlSender, QueueEntry, QueueReceiver, QueueSender,
};
use crate::error::{EngineError, EngineErrorExt, StreamError};
use crate::event_loop::EventLoop;
use crate::registry::{StreamCallback, StreamEvent, StreamId, StreamRegistry};
use crate::settings::{EngineConfig, WriterSettings};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::fs::File;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn};

const LOOP_THREAD_NAME: &str = "scribe-loop";
const BLOCKING_THREAD_NAME: &str = "scribe-fs";

/// Receives every failure observed on the loop thread.
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Lifecycle of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    NotRunning = 0,
    Running = 1,
    Stopping = 2,
}

impl EngineState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::NotRunning,
        }
    }
}

/// Everything the loop thread owns while it runs. Parked in [`Shared`]
/// between runs so that queued work and id allocation survive a restart.
pub(crate) struct LoopCore {
    pub(crate) queue: QueueReceiver,
    pub(crate) control: ControlReceiver,
    pub(crate) registry: StreamRegistry<File>,
    pub(crate) backlog: VecDeque<Control>,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) line_terminator: String,
    pub(crate) backoff_interval: Duration,
    queue: QueueSender,
    control: ControlSender,
    core: Mutex<Option<LoopCore>>,
    state: AtomicU8,
    pending: AtomicUsize,
    on_error: ErrorCallback,
}

impl Shared {
    /// Logs `err` and hands it to the error callback.
    pub(crate) fn report(&self, err: &StreamError) {
        warn!(kind = %err.kind(), subject = err.subject(), "{err}");
        (self.on_error)(err);
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Marks one submitted payload as settled: written, failed or rejected.
    pub(crate) fn settle(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("line_terminator", &self.line_terminator)
            .field("backoff_interval", &self.backoff_interval)
            .field("state", &self.state())
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A fluent builder for [`FileStreamEngine`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct FileStreamEngineBuilder {
    settings: WriterSettings,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for FileStreamEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStreamEngineBuilder")
            .field("settings", &self.settings)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl FileStreamEngineBuilder {
    /// Replaces all settings at once.
    pub fn settings(mut self, settings: WriterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn output_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.output_directory = Some(path.into());
        self
    }

    pub const fn max_file_size(mut self, bytes: u64) -> Self {
        self.settings.max_file_size = bytes;
        self
    }

    pub fn backoff_interval(mut self, interval: Duration) -> Self {
        self.settings.backoff_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.settings.line_terminator = terminator.into();
        self
    }

    /// Sets the callback that receives every stream failure.
    pub fn on_error(mut self, callback: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> FileStreamEngine {
        let (queue, queue_rx) = control::queue();
        let (control, control_rx) = control::control();
        let core = LoopCore {
            queue: queue_rx,
            control: control_rx,
            registry: StreamRegistry::new(),
            backlog: VecDeque::new(),
        };

        FileStreamEngine {
            inner: Arc::new(Shared {
                config: EngineConfig::from_settings(&self.settings),
                line_terminator: self.settings.line_terminator.clone(),
                backoff_interval: self.settings.backoff_interval(),
                queue,
                control,
                core: Mutex::new(Some(core)),
                state: AtomicU8::new(EngineState::NotRunning as u8),
                pending: AtomicUsize::new(0),
                on_error: self.on_error.unwrap_or_else(|| Arc::new(|_: &StreamError| {})),
            }),
        }
    }
}

/// Asynchronous, rotating file writer driven by a single loop thread.
///
/// # Example
///
/// ```rust
/// use scribe_writer::{FileStreamEngine, StreamEvent};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let tmp = tempfile::tempdir()?;
/// let engine = FileStreamEngine::builder()
///     .output_directory(tmp.path())
///     .on_error(|err| eprintln!("{} ({})", err, err.kind()))
///     .build();
/// let loop_thread = engine.spawn()?;
///
/// let (tx, rx) = mpsc::channel();
/// engine.create_stream("audit", move |event| {
///     if let StreamEvent::Created { id } = event {
///         let _ = tx.send(id);
///     }
/// });
/// let id = rx.recv_timeout(Duration::from_secs(5))?;
///
/// engine.submit(id, "hello");
/// engine.stop()?;
/// loop_thread.join().expect("loop thread panicked")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStreamEngine {
    inner: Arc<Shared>,
}

impl FileStreamEngine {
    pub fn builder() -> FileStreamEngineBuilder {
        FileStreamEngineBuilder { settings: WriterSettings::default(), on_error: None }
    }

    /// An engine with default settings reporting failures to `on_error`.
    #[must_use]
    pub fn new(on_error: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        Self::builder().on_error(on_error).build()
    }

    /// Runs the event loop on the calling thread until [`stop`](Self::stop) is called.
    ///
    /// Work submitted before the loop starts is picked up immediately. After
    /// this returns the engine can be run again.
    ///
    /// # Errors
    /// Returns [`EngineError::AlreadyRunning`] if the loop is already active,
    /// or [`EngineError::Runtime`] if the loop's runtime cannot be created.
    pub fn run(&self) -> Result<(), EngineError> {
        let core = self.acquire()?;
        self.drive(core)
    }

    /// Starts the event loop on a dedicated, named thread.
    ///
    /// The engine counts as running as soon as this returns, so a following
    /// [`stop`](Self::stop) always reaches the new loop.
    ///
    /// # Errors
    /// Returns [`EngineError::AlreadyRunning`] if the loop is already active,
    /// or [`EngineError::Runtime`] if the thread cannot be spawned.
    pub fn spawn(&self) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
        let handoff = Arc::new(Mutex::new(Some(self.acquire()?)));
        let engine = self.clone();
        let slot = Arc::clone(&handoff);

        let spawned = std::thread::Builder::new().name(LOOP_THREAD_NAME.to_owned()).spawn(
            move || {
                let core = slot.lock().take();
                core.map_or_else(
                    || Err(EngineError::Disconnected { context: Some("loop core lost".into()) }),
                    |core| engine.drive(core),
                )
            },
        );

        if spawned.is_err()
            && let Some(core) = handoff.lock().take()
        {
            self.release(core, None);
        }
        spawned.context("Failed to spawn the loop thread")
    }

    /// Stops the loop and blocks until it has closed every stream file and exited.
    ///
    /// Returns immediately when the engine is not running. Streams are not
    /// drained first: queued payloads stay queued for the next run.
    ///
    /// # Errors
    /// Returns [`EngineError::Disconnected`] if the loop went away without
    /// acknowledging the request.
    ///
    /// # Panics
    /// Panics if called from within an asynchronous execution context.
    pub fn stop(&self) -> Result<(), EngineError> {
        let done = {
            let core = self.inner.core.lock();
            if core.is_some() {
                debug!("Stop requested while the engine is not running");
                return Ok(());
            }
            let (ack, done) = oneshot::channel();
            self.send_control(Control::Stop { ack })?;
            done
        };

        done.blocking_recv()
            .map_err(|_| EngineError::Disconnected { context: Some("stop not acknowledged".into()) })
    }

    /// Requests a new stream. `on_event` first receives
    /// [`StreamEvent::Created`] with the assigned id once the file is open,
    /// and later progress reports. Open failures go to the error callback.
    pub fn create_stream(
        &self,
        name: impl Into<String>,
        on_event: impl Fn(StreamEvent) + Send + Sync + 'static,
    ) {
        let on_event: StreamCallback = Arc::new(on_event);
        if let Err(err) = self.send_control(Control::Open { name: name.into(), on_event }) {
            warn!(%err, "Dropping stream creation request");
        }
    }

    /// Queues `payload` for `stream`. Never blocks and never validates the id;
    /// unknown ids are reported when the entry is drained.
    pub fn submit(&self, stream: StreamId, payload: impl Into<String>) {
        let entry = QueueEntry { stream, payload: payload.into() };
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        if self.inner.queue.send(entry).is_err() {
            self.inner.settle();
            warn!(stream = %stream, "Write queue closed, dropping payload");
        }
    }

    /// Payloads submitted but not yet written, failed or rejected.
    ///
    /// Queued payloads survive [`stop`](Self::stop); poll this until it
    /// reaches zero to flush before stopping.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Closes `stream` on the loop thread without waiting for it.
    pub fn close_stream(&self, stream: StreamId) {
        if let Err(err) = self.send_control(Control::Close { stream }) {
            warn!(%err, stream = %stream, "Dropping close request");
        }
    }

    /// Whether `stream` is currently registered, as seen by the loop thread.
    ///
    /// # Errors
    /// Returns [`EngineError::Disconnected`] if the loop went away without answering.
    ///
    /// # Panics
    /// Panics if called from within an asynchronous execution context while the loop runs.
    pub fn stream_exists(&self, stream: StreamId) -> Result<bool, EngineError> {
        let answer = {
            let core = self.inner.core.lock();
            if let Some(core) = core.as_ref() {
                return Ok(core.registry.exists(stream));
            }
            let (reply, answer) = oneshot::channel();
            self.send_control(Control::Exists { stream, reply })?;
            answer
        };

        answer
            .blocking_recv()
            .map_err(|_| EngineError::Disconnected { context: Some("exists not answered".into()) })
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.inner.config.path()
    }

    /// Changes the directory for files opened from now on. Not validated here;
    /// an unusable directory surfaces as an open failure later.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        self.inner.config.set_path(path);
    }

    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.inner.config.max_file_size()
    }

    pub fn set_max_file_size(&self, bytes: u64) {
        self.inner.config.set_max_file_size(bytes);
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.state()
    }

    fn send_control(&self, message: Control) -> Result<(), EngineError> {
        self.inner
            .control
            .send(message)
            .map_err(|_| EngineError::Disconnected { context: Some("control channel closed".into()) })
    }

    pub(crate) fn acquire(&self) -> Result<LoopCore, EngineError> {
        let core =
            self.inner.core.lock().take().ok_or(EngineError::AlreadyRunning { context: None })?;
        self.inner.set_state(EngineState::Running);
        Ok(core)
    }

    fn drive(&self, mut core: LoopCore) -> Result<(), EngineError> {
        let runtime = match build_runtime() {
            Ok(runtime) => runtime,
            Err(err) => {
                self.release(core, None);
                return Err(err);
            },
        };

        let span = info_span!("scribe_loop");
        let _enter = span.enter();
        info!(path = %self.path().display(), "Event loop started");

        let ack = runtime.block_on(EventLoop::new(&self.inner, &mut core).run());
        drop(runtime);

        self.release(core, ack);
        info!("Event loop stopped");
        Ok(())
    }

    /// Parks the core for the next run and acknowledges every pending stop.
    /// Requests that arrived too late for this run are kept for the next one.
    fn release(&self, mut core: LoopCore, ack: Option<oneshot::Sender<()>>) {
        let mut acks: Vec<_> = ack.into_iter().collect();
        let mut slot = self.inner.core.lock();

        while let Ok(message) = core.control.try_recv() {
            match message {
                Control::Stop { ack } => acks.push(ack),
                Control::Exists { stream, reply } => {
                    let _ = reply.send(core.registry.exists(stream));
                },
                other => core.backlog.push_back(other),
            }
        }

        *slot = Some(core);
        self.inner.set_state(EngineState::NotRunning);
        drop(slot);

        for ack in acks {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
impl FileStreamEngine {
    pub(crate) fn shared(&self) -> &Shared {
        &self.inner
    }
}

fn build_runtime() -> Result<Runtime, EngineError> {
    Builder::new_current_thread()
        .enable_all()
        .thread_name(BLOCKING_THREAD_NAME)
        .build()
        .context("Failed to initialize the event loop runtime")
}
