use scribe_logger::{LevelFilter, LogFormat, Logger};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn json_file_logging_writes_structured_lines() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempdir()?;
    let log_dir = tmp_dir.path().join("logs");

    let logger = Logger::builder()
        .name("scribe-file")
        .console(false)
        .path(&log_dir)
        .format(LogFormat::Json)
        .level(LevelFilter::INFO)
        .init()?;
    assert_eq!(logger.directory(), Some(log_dir.as_path()));

    tracing::info!(stream = 3, bytes = 14, "Rotating stream file");

    std::thread::sleep(Duration::from_millis(30));
    drop(logger);

    let log_file = fs::read_dir(&log_dir)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .expect("log file should be created");
    let name = log_file.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned();
    assert!(name.starts_with("scribe-file"), "unexpected log file {name}");

    let content = fs::read_to_string(&log_file)?;
    assert!(content.contains("\"message\":\"Rotating stream file\""), "got {content}");
    assert!(content.contains("\"stream\":3"));

    Ok(())
}
