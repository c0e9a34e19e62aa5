use crate::registry::StreamId;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Flat classification of a [`StreamError`], handed to the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced stream id is not in the registry.
    UnknownStream,
    /// Opening or creating a file failed.
    OpenFailed,
    /// Writing a payload failed.
    WriteFailed,
    /// Closing a file during rotation failed.
    CloseFailed,
    /// The stream lost its file and rejects writes.
    Degraded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownStream => "unknown stream",
            Self::OpenFailed => "open failed",
            Self::WriteFailed => "write failed",
            Self::CloseFailed => "close failed",
            Self::Degraded => "stream degraded",
        };
        f.write_str(name)
    }
}

/// Failures observed on the loop thread while serving streams.
///
/// These are never returned from the public API. They are delivered to the
/// error callback supplied at construction and the engine keeps draining.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("File descriptor does not exist: stream {id}")]
    UnknownStream { id: StreamId },

    #[error("Unable to open file stream ({}): {source}", .path.display())]
    OpenFailed { path: PathBuf, source: std::io::Error },

    #[error("Write to file failed (stream {id}, descriptor {descriptor}): {source}")]
    WriteFailed { id: StreamId, descriptor: i64, source: std::io::Error },

    #[error("There was an error when closing the file (stream {id}, descriptor {descriptor}): {source}")]
    CloseFailed { id: StreamId, descriptor: i64, source: std::io::Error },

    #[error("Stream {id} has no usable file and rejects writes")]
    Degraded { id: StreamId },
}

impl StreamError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStream { .. } => ErrorKind::UnknownStream,
            Self::OpenFailed { .. } => ErrorKind::OpenFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::CloseFailed { .. } => ErrorKind::CloseFailed,
            Self::Degraded { .. } => ErrorKind::Degraded,
        }
    }

    /// The integer the failure is about: a stream id, a descriptor, or for
    /// open failures the negated native error code.
    #[must_use]
    pub fn subject(&self) -> i64 {
        match self {
            Self::UnknownStream { id } | Self::Degraded { id } => id.as_i64(),
            Self::WriteFailed { descriptor, .. } | Self::CloseFailed { descriptor, .. } => {
                *descriptor
            },
            Self::OpenFailed { source, .. } => source.raw_os_error().map_or(-1, |c| -i64::from(c)),
        }
    }

    /// Native OS error code, when the failure came from the operating system.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::OpenFailed { source, .. }
            | Self::WriteFailed { source, .. }
            | Self::CloseFailed { source, .. } => source.raw_os_error(),
            Self::UnknownStream { .. } | Self::Degraded { .. } => None,
        }
    }
}

/// Errors returned by the engine's lifecycle and configuration API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is already running{}", format_context(.context))]
    AlreadyRunning { context: Option<Cow<'static, str>> },

    #[error("Event loop runtime error{}: {source}", format_context(.context))]
    Runtime { source: std::io::Error, context: Option<Cow<'static, str>> },

    #[error("Event loop disconnected{}", format_context(.context))]
    Disconnected { context: Option<Cow<'static, str>> },

    #[error("Settings error{}: {source}", format_context(.context))]
    Settings { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

pub trait EngineErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError>;
}

impl<T> EngineErrorExt<T> for Result<T, EngineError> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                EngineError::AlreadyRunning { context: c }
                | EngineError::Runtime { context: c, .. }
                | EngineError::Disconnected { context: c }
                | EngineError::Settings { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl<T> EngineErrorExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError> {
        self.map_err(|source| EngineError::Runtime { source, context: Some(context.into()) })
    }
}

impl<T> EngineErrorExt<T> for Result<T, config::ConfigError> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError> {
        self.map_err(|source| EngineError::Settings { source, context: Some(context.into()) })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        Self::Runtime { source, context: None }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(source: config::ConfigError) -> Self {
        Self::Settings { source, context: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_kind_and_subject() {
        let err = StreamError::UnknownStream { id: StreamId::from(7) };
        assert_eq!(err.kind(), ErrorKind::UnknownStream);
        assert_eq!(err.subject(), 7);
        assert!(err.os_code().is_none());

        let err = StreamError::WriteFailed {
            id: StreamId::from(1),
            descriptor: 42,
            source: std::io::Error::from_raw_os_error(28),
        };
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        assert_eq!(err.subject(), 42);
        assert_eq!(err.os_code(), Some(28));
    }

    #[test]
    fn test_open_failure_subject_is_negated_os_code() {
        let err = StreamError::OpenFailed {
            path: PathBuf::from("/nowhere/file.txt"),
            source: std::io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.subject(), -2);
        assert!(err.to_string().contains("/nowhere/file.txt"));
    }

    #[test]
    fn test_engine_error_context() {
        let res: Result<(), EngineError> = Err(EngineError::AlreadyRunning { context: None });
        let err = res.context("second run").unwrap_err();
        assert_eq!(err.to_string(), "Engine is already running (second run)");

        let io: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = io.context("building runtime").unwrap_err();
        assert!(matches!(err, EngineError::Runtime { .. }));
        assert_eq!(err.to_string(), "Event loop runtime error (building runtime): boom");
    }
}
