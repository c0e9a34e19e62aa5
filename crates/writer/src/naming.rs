use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";
const INITIAL_SUFFIX: &str = "_INIT";
const EXTENSION: &str = "txt";

/// `<date>_<hhmmss>_<name>[_INIT].txt` for the given local time.
#[must_use]
pub fn file_name_at(name: &str, initial: bool, at: DateTime<Local>) -> String {
    let suffix = if initial { INITIAL_SUFFIX } else { "" };
    format!("{}_{name}{suffix}.{EXTENSION}", at.format(TIMESTAMP_FORMAT))
}

/// Path of a stream's next file inside `dir`, stamped with the current local time.
#[must_use]
pub fn stream_path(dir: &Path, name: &str, initial: bool) -> PathBuf {
    dir.join(file_name_at(name, initial, Local::now()))
}
