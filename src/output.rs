use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BuildOutcome, ProgressEvent, ProgressSink};
use crate::resolver::ResolutionReport;
use crate::store::{NetworkPage, StoredNetwork};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub id: i64,
    pub deleted: bool,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_build(result: &BuildOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_network(result: &StoredNetwork) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_page(result: &NetworkPage) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolution(result: &ResolutionReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_delete(result: &DeleteResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Writes progress lines to stderr so stdout stays clean for results.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stderr,
                "\x1b[2m[{:>6.2}s]\x1b[0m {}",
                elapsed.as_secs_f64(),
                event.message
            ),
            None => writeln!(stderr, "\x1b[2m[   ...]\x1b[0m {}", event.message),
        };
    }
}
