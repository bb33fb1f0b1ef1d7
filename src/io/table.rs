//! Row-oriented event source
//!
//! One JSONL file per direction under a root directory:
//! - `<root>/vehicles_incoming.jsonl`
//! - `<root>/vehicles_outgoing.jsonl`
//!
//! Rows are read sequentially and the time-range hint is applied while scanning,
//! the way an indexed range scan would only hand back qualifying rows.

use crate::domain::{Direction, Event, ScanRequest};
use crate::error::SourceError;
use crate::io::jsonl::{write_records, JsonlRecords};
use crate::io::source::{EventSource, Scan};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct TableSource {
    root: PathBuf,
}

impl TableSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File holding one direction's rows
    pub fn table_path(&self, direction: Direction) -> PathBuf {
        self.root.join(format!("vehicles_{}.jsonl", direction.stream_name()))
    }

    /// Write events into the table files, replacing existing content.
    /// Returns the number of rows written.
    pub fn write_events(&self, events: &[Event]) -> std::io::Result<usize> {
        fs::create_dir_all(&self.root)?;
        let mut total = 0;
        for direction in Direction::ALL {
            let path = self.table_path(direction);
            let file = BufWriter::new(File::create(&path)?);
            let written =
                write_records(file, events.iter().filter(|e| e.direction == direction))?;
            debug!(path = %path.display(), rows = %written, "table_written");
            total += written;
        }
        info!(root = %self.root.display(), rows = %total, "table_source_written");
        Ok(total)
    }
}

impl EventSource for TableSource {
    fn name(&self) -> &str {
        "table"
    }

    fn scan(&self, request: &ScanRequest) -> Result<Scan<'_>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::NotFound(self.root.clone()));
        }

        let mut tables = Vec::new();
        for direction in Direction::ALL {
            if !request.wants_direction(direction) {
                continue;
            }
            let path = self.table_path(direction);
            if !path.exists() {
                return Err(SourceError::NotFound(path));
            }
            tables.push(JsonlRecords::open(&path, direction)?);
        }
        debug!(root = %self.root.display(), tables = %tables.len(), "table_scan_started");

        let request = request.clone();
        Ok(Scan::new(Box::new(tables.into_iter().flatten().filter(move |item| match item {
            Ok(event) => request.wants_timestamp(event.timestamp),
            // Malformed rows and read failures are surfaced to the caller
            Err(_) => true,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKey, TimeRange};
    use crate::error::RecordError;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::tempdir;

    fn sample() -> Vec<Event> {
        let key = EntityKey::parse("F", "F-AB0001").unwrap();
        vec![
            Event::entry(Utc.with_ymd_and_hms(2025, 1, 1, 7, 0, 0).unwrap(), key.clone()),
            Event::exit(Utc.with_ymd_and_hms(2025, 1, 1, 17, 0, 0).unwrap(), key.clone()),
            Event::entry(Utc.with_ymd_and_hms(2025, 1, 5, 7, 0, 0).unwrap(), key),
        ]
    }

    #[test]
    fn test_write_then_scan() {
        let dir = tempdir().unwrap();
        let source = TableSource::new(dir.path());
        assert_eq!(source.write_events(&sample()).unwrap(), 3);

        let items: Vec<_> = source.scan(&ScanRequest::all()).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.is_ok()));
    }

    #[test]
    fn test_time_range_applied_during_scan() {
        let dir = tempdir().unwrap();
        let source = TableSource::new(dir.path());
        source.write_events(&sample()).unwrap();

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let items: Vec<_> = source.scan(&ScanRequest::for_range(range)).unwrap().collect();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_malformed_rows_are_passed_through() {
        let dir = tempdir().unwrap();
        let source = TableSource::new(dir.path());
        source.write_events(&sample()).unwrap();

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(source.table_path(Direction::Exit))
            .unwrap();
        writeln!(file, r#"{{"ts":"bogus","country_of_registration":"F","license_plate":"F-1"}}"#)
            .unwrap();

        let items: Vec<_> = source.scan(&ScanRequest::all()).unwrap().collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items.iter().filter(|i| matches!(i, Err(RecordError::Malformed(_)))).count(), 1);
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let source = TableSource::new("/no/such/table/root");
        assert!(matches!(source.scan(&ScanRequest::all()), Err(SourceError::NotFound(_))));
    }
}
