//! Native file operations issued by the loop thread.
//!
//! Each operation is a future that hands the file back (or a fresh one) in a
//! [`Completion`], which the loop consumes as an event.

use crate::registry::{StreamCallback, StreamId};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

#[cfg(unix)]
const FILE_MODE: u32 = 0o700;

/// Outcome of a native operation.
pub(crate) enum Completion {
    Opened { name: String, on_event: StreamCallback, path: PathBuf, result: io::Result<File> },
    Written { id: StreamId, file: File, result: io::Result<usize> },
    Rotated {
        id: StreamId,
        descriptor: i64,
        closed: io::Result<()>,
        path: PathBuf,
        opened: io::Result<File>,
    },
    Closed { id: StreamId, descriptor: i64, result: io::Result<()> },
}

impl Completion {
    /// The file this completion hands back, if any.
    pub(crate) fn into_file(self) -> Option<File> {
        match self {
            Self::Opened { result, .. } => result.ok(),
            Self::Written { file, .. } => Some(file),
            Self::Rotated { opened, .. } => opened.ok(),
            Self::Closed { .. } => None,
        }
    }
}

/// Opens `path` for appending, creating it if needed.
pub(crate) async fn open(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options.open(path).await
}

/// Writes the whole buffer and waits until the OS has accepted it.
pub(crate) async fn write(file: &mut File, data: &[u8]) -> io::Result<usize> {
    file.write_all(data).await?;
    file.flush().await?;
    Ok(data.len())
}

/// Flushes pending data and releases the file.
pub(crate) async fn close(mut file: File) -> io::Result<()> {
    let result = file.flush().await;
    drop(file);
    result
}

/// Native descriptor of `file` as reported to callbacks.
#[cfg(unix)]
pub(crate) fn descriptor(file: &File) -> i64 {
    use std::os::unix::io::AsRawFd;
    i64::from(file.as_raw_fd())
}

#[cfg(windows)]
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn descriptor(file: &File) -> i64 {
    use std::os::windows::io::AsRawHandle;
    file.as_raw_handle() as usize as i64
}

#[cfg(not(any(unix, windows)))]
pub(crate) const fn descriptor(_file: &File) -> i64 {
    -1
}
