use scribe_logger::{LevelFilter, Logger};

#[test]
fn console_only_logger_has_no_file_worker() {
    let logger = Logger::builder()
        .name("scribe-console")
        .console(true)
        .level(LevelFilter::DEBUG)
        .init()
        .expect("logger should initialize");

    tracing::debug!(stream = 0, "console only");
    assert!(logger.guard().is_none());
    assert!(logger.directory().is_none());
}
