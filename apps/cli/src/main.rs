use anyhow::Context;
use clap::Parser;
use scribe_cli::{Cli, Session};
use scribe_logger::Logger;
use std::io::BufReader;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log = Logger::builder()
        .name(env!("CARGO_PKG_NAME"))
        .level(cli.log_level)
        .format(cli.log_format)
        .init()?;

    let settings = cli.settings().context("Critical: writer settings are malformed")?;
    let session = Session::start(settings, &cli.stream_names())?;

    let pumped = session.pump_until_shutdown(BufReader::new(std::io::stdin()));
    let finished = session.finish();
    pumped.and(finished)
}
