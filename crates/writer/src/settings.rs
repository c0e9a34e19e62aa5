//! Engine configuration.
//!
//! [`WriterSettings`] is the static, deserializable description used to build
//! an engine. [`EngineConfig`] is the live state shared between the loop
//! thread and producers: the output directory behind a reader-writer lock and
//! the rotation threshold behind an atomic.

use crate::error::{EngineError, EngineErrorExt};
use config::{Config, Environment, File, Map};
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// 32 `MiB`.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 << 24;
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_LINE_TERMINATOR: &str = "\r\n";
const ENV_PREFIX: &str = "SCRIBE";
const DOCUMENTS_DIR: &str = "Documents";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// Directory new files are created in. `None` selects [`default_output_directory`].
    pub output_directory: Option<PathBuf>,
    /// Rotation threshold in bytes.
    pub max_file_size: u64,
    /// Poll interval used once the queue has been seen empty.
    pub backoff_interval_ms: u64,
    /// Appended to every payload.
    pub line_terminator: String,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            output_directory: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            backoff_interval_ms: u64::try_from(DEFAULT_BACKOFF_INTERVAL.as_millis())
                .unwrap_or(100),
            line_terminator: DEFAULT_LINE_TERMINATOR.to_owned(),
        }
    }
}

impl WriterSettings {
    /// Loads settings from an optional file overlaid with `SCRIBE__*` environment variables.
    ///
    /// `SCRIBE__MAX_FILE_SIZE=1048576` maps to `max_file_size`, and so on.
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns [`EngineError::Settings`] if the file is missing or malformed, or
    /// a value cannot be converted to its field type.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        Self::load_with_env(path, None)
    }

    pub(crate) fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, EngineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading writer settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true).source(env),
        );

        builder
            .build()
            .context("Failed to build writer settings")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize writer settings")
    }

    #[must_use]
    pub const fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms)
    }
}

/// The user's documents directory, then `<home>/Documents`, then the temp directory.
#[must_use]
pub fn default_output_directory() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(DOCUMENTS_DIR)))
        .unwrap_or_else(std::env::temp_dir)
}

#[derive(Debug)]
pub struct EngineConfig {
    output_directory: RwLock<PathBuf>,
    max_file_size: AtomicU64,
}

impl EngineConfig {
    #[must_use]
    pub fn new(output_directory: PathBuf, max_file_size: u64) -> Self {
        Self { output_directory: RwLock::new(output_directory), max_file_size: AtomicU64::new(max_file_size) }
    }

    #[must_use]
    pub fn from_settings(settings: &WriterSettings) -> Self {
        let dir = settings.output_directory.clone().unwrap_or_else(default_output_directory);
        Self::new(dir, settings.max_file_size)
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.output_directory.read().clone()
    }

    pub fn set_path(&self, path: impl Into<PathBuf>) {
        *self.output_directory.write() = path.into();
    }

    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.load(Ordering::Acquire)
    }

    pub fn set_max_file_size(&self, bytes: u64) {
        self.max_file_size.store(bytes, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = WriterSettings::default();
        assert_eq!(settings.max_file_size, 32 * 1024 * 1024);
        assert_eq!(settings.backoff_interval(), Duration::from_millis(100));
        assert_eq!(settings.line_terminator, "\r\n");
        assert!(settings.output_directory.is_none());
    }

    #[test]
    fn test_load_without_sources_yields_defaults() {
        let settings = WriterSettings::load_with_env(None, Some(Map::new())).unwrap();
        assert_eq!(settings, WriterSettings::default());
    }

    #[test]
    fn test_load_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "output_directory = \"/var/log/scribe\"").unwrap();
        writeln!(file, "max_file_size = 4096").unwrap();
        file.flush().unwrap();

        let mut env = Map::new();
        env.insert("SCRIBE__MAX_FILE_SIZE".to_owned(), "8192".to_owned());

        let settings = WriterSettings::load_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(settings.output_directory.as_deref(), Some(Path::new("/var/log/scribe")));
        assert_eq!(settings.max_file_size, 8192);
        assert_eq!(settings.line_terminator, "\r\n");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = WriterSettings::load_with_env(Some(Path::new("/definitely/missing.toml")), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Settings { .. }));
    }

    #[test]
    fn test_engine_config_path_and_size() {
        let config = EngineConfig::new(PathBuf::from("C:\\path\\to\\file"), 10);
        assert_eq!(config.path(), PathBuf::from("C:\\path\\to\\file"));
        config.set_path("/tmp/other");
        assert_eq!(config.path(), PathBuf::from("/tmp/other"));

        assert_eq!(config.max_file_size(), 10);
        config.set_max_file_size(8);
        assert_eq!(config.max_file_size(), 8);
    }

    #[test]
    fn test_from_settings_falls_back_to_default_directory() {
        let config = EngineConfig::from_settings(&WriterSettings::default());
        assert_eq!(config.path(), default_output_directory());
        assert_eq!(config.max_file_size(), DEFAULT_MAX_FILE_SIZE);
    }
}
