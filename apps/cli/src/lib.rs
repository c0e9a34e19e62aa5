//! # scribe
//!
//! A thin host around [`scribe_writer::FileStreamEngine`]: it opens one stream
//! per requested name and fans every input line out to all of them.
//!
//! ```no_run
//! use scribe_cli::Session;
//! use scribe_writer::WriterSettings;
//!
//! # fn main() -> anyhow::Result<()> {
//! let session = Session::start(WriterSettings::default(), &["app".to_owned()])?;
//! session.pump(std::io::stdin().lock())?;
//! session.finish()
//! # }
//! ```

mod args;

pub use args::Cli;

use anyhow::{Context, Result, anyhow};
use scribe_writer::{EngineError, FileStreamEngine, StreamEvent, StreamId, WriterSettings};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_POLL: Duration = Duration::from_millis(10);

/// A running engine and the streams opened for this process.
#[derive(Debug)]
pub struct Session {
    engine: FileStreamEngine,
    streams: Vec<(String, StreamId)>,
    failures: Arc<AtomicU64>,
    loop_thread: JoinHandle<Result<(), EngineError>>,
}

impl Session {
    /// Starts the engine and opens one stream per name.
    ///
    /// # Errors
    /// Fails if the loop cannot be started or a stream is not opened within
    /// ten seconds, typically because the output directory is unusable.
    pub fn start(settings: WriterSettings, names: &[String]) -> Result<Self> {
        let failures = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&failures);
        let engine = FileStreamEngine::builder()
            .settings(settings)
            .on_error(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        let loop_thread = engine.spawn().context("Failed to start the writer loop")?;
        info!(path = %engine.path().display(), "Writer started");

        let mut session =
            Self { engine, streams: Vec::with_capacity(names.len()), failures, loop_thread };
        for name in names {
            match session.open(name) {
                Ok(id) => session.streams.push((name.clone(), id)),
                Err(err) => {
                    let _ = session.finish();
                    return Err(err);
                },
            }
        }
        Ok(session)
    }

    fn open(&self, name: &str) -> Result<StreamId> {
        let (tx, rx) = mpsc::channel();
        self.engine.create_stream(name, move |event| match event {
            StreamEvent::Created { id } => {
                let _ = tx.send(id);
            },
            StreamEvent::Progress { descriptor, bytes_written } => {
                debug!(descriptor, bytes_written, "Stream progress");
            },
        });

        let id = rx.recv_timeout(OPEN_TIMEOUT).map_err(|_| {
            anyhow!("Stream '{name}' was not opened in {}", self.engine.path().display())
        })?;
        info!(stream = %id, name, "Stream ready");
        Ok(id)
    }

    #[must_use]
    pub const fn engine(&self) -> &FileStreamEngine {
        &self.engine
    }

    #[must_use]
    pub fn streams(&self) -> &[(String, StreamId)] {
        &self.streams
    }

    /// Stream failures reported so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Submits every line of `input` to every stream and returns the line count.
    ///
    /// # Errors
    /// Returns the first read error of `input`.
    pub fn pump(&self, input: impl BufRead) -> Result<u64> {
        pump(&self.engine, &self.ids(), input)
    }

    /// Pumps `input` on a background thread until it ends or the process is
    /// asked to terminate, whichever comes first.
    ///
    /// # Errors
    /// Fails if the signal handlers cannot be installed or reading `input` fails.
    pub fn pump_until_shutdown(&self, input: impl BufRead + Send + 'static) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let engine = self.engine.clone();
        let ids = self.ids();
        std::thread::Builder::new()
            .name("scribe-input".to_owned())
            .spawn(move || {
                let _ = done_tx.send(pump(&engine, &ids, input));
            })
            .context("Failed to spawn the input reader")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build the signal runtime")?;

        runtime.block_on(async {
            tokio::select! {
                res = done_rx => {
                    let lines = res.context("Input reader vanished")??;
                    info!(lines, "Input closed");
                },
                res = shutdown_signal() => {
                    res?;
                    info!("Shutdown signal received");
                },
            }
            Ok::<_, anyhow::Error>(())
        })
    }

    /// Waits until every submitted line has been written or rejected.
    /// Returns `false` if `timeout` elapsed first.
    #[must_use]
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.engine.pending_writes() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(FLUSH_POLL);
        }
        true
    }

    /// Flushes pending lines, then stops the engine, closing every stream file.
    ///
    /// # Errors
    /// Fails if the loop cannot be stopped or exited with an error.
    pub fn finish(self) -> Result<()> {
        if !self.flush(FLUSH_TIMEOUT) {
            warn!(pending = self.engine.pending_writes(), "Stopping with unwritten lines");
        }
        self.engine.stop().context("Failed to stop the writer loop")?;
        self.loop_thread
            .join()
            .map_err(|_| anyhow!("Writer loop panicked"))?
            .context("Writer loop failed")?;

        let failures = self.failures.load(Ordering::Relaxed);
        if failures > 0 {
            warn!(failures, "Writer reported failures");
        }
        info!(streams = self.streams.len(), "Writer stopped");
        Ok(())
    }

    fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|(_, id)| *id).collect()
    }
}

/// Submits every line of `input` to each of `streams`.
///
/// # Errors
/// Returns the first read error of `input`.
pub fn pump(engine: &FileStreamEngine, streams: &[StreamId], input: impl BufRead) -> Result<u64> {
    let mut count = 0u64;
    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        for id in streams {
            engine.submit(*id, line.as_str());
        }
        count += 1;
    }
    Ok(count)
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res,
        res = terminate => res,
    }
}
