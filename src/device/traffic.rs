use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::Hac;
use crate::service::{SimError, SimResult};

/// One scripted send: destination address and payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficEntry {
    pub dest: Hac,
    pub payload: String,
}

/// Parses a traffic script: one `"<net>_<dev>: <payload>"` line per send.
/// Blank lines are skipped; anything else malformed is fatal at
/// construction time.
pub fn parse_script(text: &str) -> SimResult<Vec<TrafficEntry>> {
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (dest, payload) = line
            .split_once(": ")
            .ok_or_else(|| SimError::MalformedScript(line.to_string()))?;
        // the frame size field is one byte and zero marks a control frame
        if payload.is_empty() || payload.len() > usize::from(u8::MAX) {
            return Err(SimError::MalformedScript(format!(
                "payload must be 1..=255 bytes, got {}: {:.40}",
                payload.len(),
                line
            )));
        }
        entries.push(TrafficEntry {
            dest: dest.parse()?,
            payload: payload.to_string(),
        });
    }
    Ok(entries)
}

/// Append-only record of accepted data frames: one `"<sender>: <payload>"`
/// line per frame, in processing order. The sender renders as its raw
/// address byte.
pub trait DeliverySink: Send {
    fn append(&mut self, sender: Hac, payload: &str) -> io::Result<()>;
}

/// File-backed sink; truncates its target at construction, as each run
/// starts from an empty delivery log.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<FileSink> {
        Ok(FileSink {
            file: File::create(path)?,
        })
    }
}

impl DeliverySink for FileSink {
    fn append(&mut self, sender: Hac, payload: &str) -> io::Result<()> {
        writeln!(self.file, "{}: {}", sender.as_byte(), payload)?;
        self.file.flush()
    }
}

/// In-memory sink for tests and embedding callers; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }
}

impl DeliverySink for MemorySink {
    fn append(&mut self, sender: Hac, payload: &str) -> io::Result<()> {
        self.records
            .lock()
            .push(format!("{}: {}", sender.as_byte(), payload));
        Ok(())
    }
}
