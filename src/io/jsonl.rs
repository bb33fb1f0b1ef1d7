//! JSONL crossing records
//!
//! Both backing stores hold one JSON object per line in the shape the ingest
//! job writes:
//!
//! ```json
//! {"ts":"2025-01-01T06:12:00Z","country_of_registration":"D","license_plate":"D-AB1234","vehicle_type":"truck"}
//! ```
//!
//! Only `ts`, `country_of_registration` and `license_plate` are read; the
//! direction comes from which stream (table or partition) the line lives in.

use crate::domain::{Direction, EntityKey, Event};
use crate::error::{RecordError, SourceError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Raw record as stored. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCrossing {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub country_of_registration: Option<String>,
    #[serde(default)]
    pub license_plate: Option<String>,
}

impl RawCrossing {
    /// Raw record for a typed event (used when writing fixtures and exports)
    pub fn from_event(event: &Event) -> Self {
        Self {
            ts: Some(event.timestamp.to_rfc3339()),
            country_of_registration: Some(event.key.region.to_string()),
            license_plate: Some(event.key.plate.to_string()),
        }
    }

    /// Normalize into an event, rejecting records with missing or invalid fields
    pub fn into_event(self, direction: Direction) -> Result<Event, RecordError> {
        let ts = self.ts.ok_or_else(|| RecordError::malformed("missing ts"))?;
        let timestamp = parse_timestamp(&ts)
            .ok_or_else(|| RecordError::malformed(format!("unparsable ts '{}'", ts)))?;
        let region = self
            .country_of_registration
            .ok_or_else(|| RecordError::malformed("missing country_of_registration"))?;
        let plate =
            self.license_plate.ok_or_else(|| RecordError::malformed("missing license_plate"))?;
        let key = EntityKey::parse(&region, &plate).ok_or_else(|| {
            RecordError::malformed(format!("invalid entity key '{}'/'{}'", region, plate))
        })?;
        Ok(Event::new(timestamp, key, direction))
    }
}

/// Parse RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse one raw line. Bytes that are not UTF-8 JSON make the record malformed.
pub fn parse_line(line: &[u8], direction: Direction) -> Result<Event, RecordError> {
    let raw: RawCrossing = serde_json::from_slice(line)
        .map_err(|e| RecordError::malformed(format!("invalid json: {}", e)))?;
    raw.into_event(direction)
}

/// Lazily parsed records of one JSONL file
pub struct JsonlRecords {
    path: PathBuf,
    direction: Direction,
    reader: BufReader<File>,
    line: Vec<u8>,
    failed: bool,
}

impl JsonlRecords {
    pub fn open(path: &Path, direction: Direction) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            direction,
            reader: BufReader::new(file),
            line: Vec::new(),
            failed: false,
        })
    }
}

impl Iterator for JsonlRecords {
    type Item = Result<Event, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) if self.line.trim_ascii().is_empty() => continue,
                Ok(_) => return Some(parse_line(&self.line, self.direction)),
                Err(e) => {
                    // A read error ends the file; the caller aborts the scan
                    self.failed = true;
                    return Some(Err(SourceError::io(&self.path, e).into()));
                }
            }
        }
    }
}

/// Write events as raw JSONL records
pub fn write_records<'a, W, I>(mut out: W, events: I) -> std::io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a Event>,
{
    let mut written = 0;
    for event in events {
        let line = serde_json::to_string(&RawCrossing::from_event(event))?;
        writeln!(out, "{}", line)?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}
