use parking_lot::Mutex;
use scribe_writer::{EngineError, ErrorKind, FileStreamEngine, StreamEvent, StreamId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// One reported stream failure: kind, subject and message.
pub type Reported = (ErrorKind, i64, String);

/// A running engine writing into its own temporary directory.
pub struct Harness {
    pub engine: FileStreamEngine,
    pub dir: TempDir,
    errors: Arc<Mutex<Vec<Reported>>>,
    loop_thread: Option<JoinHandle<Result<(), EngineError>>>,
}

impl Harness {
    /// Builds and spawns an engine with a short backoff interval.
    /// # Panics
    /// * If the temporary directory or the loop thread cannot be created.
    #[must_use]
    pub fn start() -> Self {
        let mut harness = Self::idle();
        harness.spawn();
        harness
    }

    /// Builds an engine without starting its loop.
    /// # Panics
    /// * If the temporary directory cannot be created.
    #[must_use]
    pub fn idle() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let engine = FileStreamEngine::builder()
            .output_directory(dir.path())
            .backoff_interval(Duration::from_millis(10))
            .on_error(move |err| sink.lock().push((err.kind(), err.subject(), err.to_string())))
            .build();

        Self { engine, dir, errors, loop_thread: None }
    }

    /// # Panics
    /// * If the loop is already running.
    pub fn spawn(&mut self) {
        self.loop_thread = Some(self.engine.spawn().expect("spawn loop"));
    }

    /// Stops the engine and joins the loop thread.
    /// # Panics
    /// * If stopping fails or the loop thread panicked.
    pub fn stop(&mut self) {
        self.engine.stop().expect("stop");
        if let Some(handle) = self.loop_thread.take() {
            handle.join().expect("loop thread panicked").expect("loop result");
        }
    }

    /// Creates a stream and waits for its id.
    /// # Panics
    /// * If the stream is not created within [`TIMEOUT`].
    pub fn create_stream(&self, name: &str) -> StreamId {
        self.create_stream_with_events(name).0
    }

    /// Creates a stream and returns its id along with every event it receives.
    /// # Panics
    /// * If the stream is not created within [`TIMEOUT`].
    pub fn create_stream_with_events(&self, name: &str) -> (StreamId, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel();
        self.engine.create_stream(name, move |event| {
            let _ = tx.send(event);
        });
        match rx.recv_timeout(TIMEOUT).expect("stream created") {
            StreamEvent::Created { id } => (id, rx),
            other => panic!("expected a creation event, got {other:?}"),
        }
    }

    #[must_use]
    pub fn errors(&self) -> Vec<Reported> {
        self.errors.lock().clone()
    }

    #[must_use]
    pub fn errors_of(&self, kind: ErrorKind) -> Vec<Reported> {
        self.errors().into_iter().filter(|(k, _, _)| *k == kind).collect()
    }

    /// Files in the output directory, sorted by name.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        files_in(self.dir.path())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.loop_thread.is_some() {
            let _ = self.engine.stop();
            if let Some(handle) = self.loop_thread.take() {
                let _ = handle.join();
            }
        }
    }
}

/// # Panics
/// * If `dir` cannot be read.
#[must_use]
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .expect("read output directory")
        .map(|entry| entry.expect("directory entry").path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

#[must_use]
pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// Polls `condition` until it holds or [`TIMEOUT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Gives the loop a few backoff rounds to do something it should not.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

/// Paths inside `dir` that this process still holds open.
/// # Panics
/// * If `/proc/self/fd` cannot be read.
#[cfg(target_os = "linux")]
#[must_use]
pub fn open_files_in(dir: &Path) -> Vec<PathBuf> {
    let dir = dir.canonicalize().expect("canonical output directory");
    std::fs::read_dir("/proc/self/fd")
        .expect("read /proc/self/fd")
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|target| target.starts_with(&dir))
        .collect()
}

/// Sleeps until the wall clock has just entered a new second, so that a
/// short burst of rotations shares one timestamp.
pub fn wait_for_second_start() {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let into_second = since_epoch.subsec_millis();
    if into_second > 100 {
        std::thread::sleep(Duration::from_millis(u64::from(1000 - into_second)));
    }
}
