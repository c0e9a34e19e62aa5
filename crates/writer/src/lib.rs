//! # scribe-writer
//!
//! An embeddable, single-threaded asynchronous file writer.
//!
//! Callers request named output streams, enqueue text payloads from any
//! thread and the engine appends them to timestamped files on disk, rotating
//! to a fresh file whenever a stream grows past the configured size.
//!
//! All file operations and all bookkeeping happen on one loop thread driven by
//! [`FileStreamEngine::run`] (or [`FileStreamEngine::spawn`]). Producers never
//! block: [`FileStreamEngine::submit`] only enqueues. Failures never cross the
//! thread boundary as return values; they are delivered to the error callback
//! as [`StreamError`]s and the engine keeps going.
//!
//! ```rust,no_run
//! use scribe_writer::{FileStreamEngine, StreamEvent, WriterSettings};
//!
//! # fn main() -> Result<(), scribe_writer::EngineError> {
//! let settings = WriterSettings::load(None)?;
//! let engine = FileStreamEngine::builder()
//!     .settings(settings)
//!     .on_error(|err| eprintln!("[{}] {err}", err.kind()))
//!     .build();
//!
//! let loop_thread = engine.spawn()?;
//! engine.create_stream("audit", |event| match event {
//!     StreamEvent::Created { id } => println!("stream {id} ready"),
//!     StreamEvent::Progress { bytes_written, .. } => println!("{bytes_written} bytes"),
//! });
//!
//! engine.stop()?;
//! let _ = loop_thread.join();
//! # Ok(())
//! # }
//! ```

mod backoff;
mod control;
mod engine;
mod error;
mod event_loop;
mod naming;
mod native;
mod registry;
mod settings;

pub use engine::{EngineState, ErrorCallback, FileStreamEngine, FileStreamEngineBuilder};
pub use error::{EngineError, EngineErrorExt, ErrorKind, StreamError};
pub use naming::{file_name_at, stream_path};
pub use registry::{FileSlot, StreamCallback, StreamEvent, StreamHandle, StreamId, StreamRegistry};
pub use settings::{
    DEFAULT_BACKOFF_INTERVAL, DEFAULT_LINE_TERMINATOR, DEFAULT_MAX_FILE_SIZE, EngineConfig,
    WriterSettings, default_output_directory,
};
