//! # CLI Argument Definitions

use clap::Parser;
use scribe_logger::{LevelFilter, LogFormat};
use scribe_writer::{EngineError, WriterSettings};
use std::path::PathBuf;

const DEFAULT_STREAM: &str = "stdin";

/// Copies standard input, line by line, into rotating timestamped files.
#[derive(Debug, Parser)]
#[command(name = "scribe")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipe standard input into rotating log files")]
pub struct Cli {
    /// TOML settings file; `SCRIBE__*` environment variables override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory new files are created in
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Rotate a stream's file once it grows past this many bytes
    #[arg(short = 's', long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Stream to write every line to; repeat for several files
    #[arg(long = "stream", value_name = "NAME")]
    pub streams: Vec<String>,

    /// Minimum level of diagnostics printed to standard error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// Diagnostic line layout: compact, pretty or json
    #[arg(long, value_name = "FORMAT", default_value = "compact")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Loads the settings file and environment, then applies flag overrides.
    ///
    /// # Errors
    /// Returns [`EngineError::Settings`] if the settings cannot be loaded.
    pub fn settings(&self) -> Result<WriterSettings, EngineError> {
        let mut settings = WriterSettings::load(self.config.as_deref())?;
        self.apply(&mut settings);
        Ok(settings)
    }

    pub fn apply(&self, settings: &mut WriterSettings) {
        if let Some(dir) = &self.dir {
            settings.output_directory = Some(dir.clone());
        }
        if let Some(bytes) = self.max_size {
            settings.max_file_size = bytes;
        }
    }

    /// Requested stream names, or `stdin` when none were given.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        if self.streams.is_empty() { vec![DEFAULT_STREAM.to_owned()] } else { self.streams.clone() }
    }
}
