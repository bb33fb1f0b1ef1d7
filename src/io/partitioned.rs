//! Hive-partitioned event source
//!
//! Layout (one directory per direction and UTC day):
//!
//! ```text
//! <root>/<prefix>/direction=incoming/date=2025-01-01/part-00000.jsonl
//! <root>/<prefix>/direction=outgoing/date=2025-01-01/part-00000.jsonl
//! ```
//!
//! The date-bucket hint eliminates whole `date=` directories before any file is
//! opened. Events inside a kept partition are not time-filtered here; the core
//! applies the exact predicate.

use crate::domain::{Direction, Event, ScanRequest};
use crate::error::{AnalyticsError, RecordError, Result, SourceError};
use crate::io::jsonl::{write_records, JsonlRecords};
use crate::io::source::{EventSource, Scan};
use chrono::NaiveDate;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default rows per part file when writing
pub const DEFAULT_ROWS_PER_PART: usize = 250_000;

pub struct PartitionedSource {
    base: PathBuf,
    pruning: bool,
}

impl PartitionedSource {
    pub fn new(root: impl AsRef<Path>, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let base = if prefix.is_empty() { root.as_ref().to_path_buf() } else { root.as_ref().join(prefix) };
        Self { base, pruning: true }
    }

    /// Enable or disable partition elimination (results must not change)
    pub fn with_pruning(mut self, enabled: bool) -> Self {
        self.pruning = enabled;
        self
    }

    fn direction_dir(&self, direction: Direction) -> PathBuf {
        self.base.join(format!("direction={}", direction.stream_name()))
    }

    pub fn partition_dir(&self, direction: Direction, day: NaiveDate) -> PathBuf {
        self.direction_dir(direction).join(format!("date={}", day.format("%Y-%m-%d")))
    }

    pub fn part_path(&self, direction: Direction, day: NaiveDate, part: usize) -> PathBuf {
        self.partition_dir(direction, day).join(format!("part-{:05}.jsonl", part))
    }

    /// Lay events out by direction and UTC day, `rows_per_part` rows per file.
    /// Returns the number of part files written.
    pub fn write_events(&self, events: &[Event], rows_per_part: usize) -> Result<usize> {
        if rows_per_part == 0 {
            return Err(AnalyticsError::invalid("rows per part must be at least 1"));
        }
        let failed = |path: &Path, e: std::io::Error| {
            AnalyticsError::unavailable(self.name(), SourceError::io(path, e))
        };
        // An empty dataset is still a readable (empty) source
        fs::create_dir_all(&self.base).map_err(|e| failed(&self.base, e))?;
        let mut partitions: BTreeMap<(&'static str, NaiveDate), (Direction, Vec<&Event>)> =
            BTreeMap::new();
        for event in events {
            let day = event.timestamp.date_naive();
            partitions
                .entry((event.direction.stream_name(), day))
                .or_insert_with(|| (event.direction, Vec::new()))
                .1
                .push(event);
        }

        let mut files = 0;
        for ((_, day), (direction, rows)) in partitions {
            let dir = self.partition_dir(direction, day);
            fs::create_dir_all(&dir).map_err(|e| failed(&dir, e))?;
            for (part, chunk) in rows.chunks(rows_per_part).enumerate() {
                let path = self.part_path(direction, day, part);
                let file = File::create(&path).map_err(|e| failed(&path, e))?;
                let written = write_records(BufWriter::new(file), chunk.iter().copied())
                    .map_err(|e| failed(&path, e))?;
                debug!(path = %path.display(), rows = %written, "part_written");
                files += 1;
            }
        }
        info!(base = %self.base.display(), files = %files, "partitioned_source_written");
        Ok(files)
    }

    /// Part files to read for one direction, oldest partition first
    fn plan_direction(
        &self,
        direction: Direction,
        request: &ScanRequest,
        pruned: &mut u64,
    ) -> std::result::Result<Vec<PathBuf>, SourceError> {
        let dir = self.direction_dir(direction);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "direction_partition_missing");
            return Ok(Vec::new());
        }

        let mut days = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| SourceError::io(&dir, e))? {
            let entry = entry.map_err(|e| SourceError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(day) = name
                .to_str()
                .and_then(|n| n.strip_prefix("date="))
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                debug!(entry = ?name, "non_partition_entry_ignored");
                continue;
            };
            if self.pruning && !request.wants_day(day) {
                *pruned += 1;
                continue;
            }
            days.push((day, entry.path()));
        }
        days.sort();

        let mut files = Vec::new();
        for (_, day_dir) in days {
            let mut parts = Vec::new();
            for entry in fs::read_dir(&day_dir).map_err(|e| SourceError::io(&day_dir, e))? {
                let path = entry.map_err(|e| SourceError::io(&day_dir, e))?.path();
                if path.extension().is_some_and(|ext| ext == "jsonl") {
                    parts.push(path);
                }
            }
            parts.sort();
            files.extend(parts);
        }
        Ok(files)
    }
}

impl EventSource for PartitionedSource {
    fn name(&self) -> &str {
        "partitioned"
    }

    fn scan(&self, request: &ScanRequest) -> std::result::Result<Scan<'_>, SourceError> {
        if !self.base.is_dir() {
            return Err(SourceError::NotFound(self.base.clone()));
        }

        let mut pruned = 0;
        let mut files = VecDeque::new();
        for direction in Direction::ALL {
            if !request.wants_direction(direction) {
                continue;
            }
            for path in self.plan_direction(direction, request, &mut pruned)? {
                files.push_back((path, direction));
            }
        }
        debug!(base = %self.base.display(), files = %files.len(), pruned = %pruned, "partition_scan_planned");

        Ok(Scan::new(Box::new(PartFiles { files, current: None })).with_pruned(pruned))
    }
}

/// Reads planned part files one after another, opening each lazily
struct PartFiles {
    files: VecDeque<(PathBuf, Direction)>,
    current: Option<JsonlRecords>,
}

impl Iterator for PartFiles {
    type Item = std::result::Result<Event, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(records) = self.current.as_mut() {
                if let Some(item) = records.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let (path, direction) = self.files.pop_front()?;
            match JsonlRecords::open(&path, direction) {
                Ok(records) => self.current = Some(records),
                Err(e) => {
                    self.files.clear();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKey, WindowSpec};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample() -> Vec<Event> {
        let key = EntityKey::parse("I", "I-CC0042").unwrap();
        (0..6)
            .map(|d| {
                let ts = Utc.with_ymd_and_hms(2025, 1, 1 + d, 9, 0, 0).unwrap();
                if d % 2 == 0 {
                    Event::entry(ts, key.clone())
                } else {
                    Event::exit(ts, key.clone())
                }
            })
            .collect()
    }

    fn window(days: i64) -> ScanRequest {
        let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        ScanRequest::for_range(WindowSpec::new(start, days, 0).unwrap().time_range())
    }

    #[test]
    fn test_layout_paths() {
        let source = PartitionedSource::new("/lake", "/vehicles/");
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(
            source.part_path(Direction::Entry, day, 3),
            PathBuf::from("/lake/vehicles/direction=incoming/date=2025-01-01/part-00003.jsonl")
        );
    }

    #[test]
    fn test_write_splits_parts() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles");
        let key = EntityKey::parse("D", "D-1").unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let events = vec![Event::entry(ts, key.clone()); 5];

        assert_eq!(source.write_events(&events, 2).unwrap(), 3);
        let scanned = source.scan(&ScanRequest::all()).unwrap().count();
        assert_eq!(scanned, 5);
    }

    #[test]
    fn test_pruning_skips_partitions() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles");
        source.write_events(&sample(), 100).unwrap();

        // Window covers 2025-01-02 and 2025-01-03: one incoming, one outgoing day
        let scan = source.scan(&window(2)).unwrap();
        assert_eq!(scan.pruned, 4);
        let items: Vec<_> = scan.map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_pruning_disabled_reads_everything() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles").with_pruning(false);
        source.write_events(&sample(), 100).unwrap();

        let scan = source.scan(&window(2)).unwrap();
        assert_eq!(scan.pruned, 0);
        assert_eq!(scan.count(), 6);
    }

    #[test]
    fn test_direction_hint() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles");
        source.write_events(&sample(), 100).unwrap();

        let request = ScanRequest::all().with_direction(Some(Direction::Exit));
        let items: Vec<_> = source.scan(&request).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|e| e.direction == Direction::Exit));
    }

    #[test]
    fn test_interleaved_scans_keep_their_own_pruning() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles");
        source.write_events(&sample(), 100).unwrap();

        let narrow = source.scan(&window(1)).unwrap();
        let full = source.scan(&ScanRequest::all()).unwrap();
        assert_eq!(full.pruned, 0);
        assert_eq!(full.count(), 6);

        // Opening and draining the full scan does not touch the narrow one
        assert_eq!(narrow.pruned, 5);
        assert_eq!(narrow.count(), 1);
    }

    #[test]
    fn test_zero_rows_per_part_rejected() {
        let dir = tempdir().unwrap();
        let source = PartitionedSource::new(dir.path(), "vehicles");
        let err = source.write_events(&sample(), 0).unwrap_err();

        assert!(matches!(err, AnalyticsError::InvalidParameters(_)));
        assert!(!source.base.exists());
    }

    #[test]
    fn test_missing_base_is_not_found() {
        let source = PartitionedSource::new("/no/such/lake", "vehicles");
        assert!(matches!(source.scan(&ScanRequest::all()), Err(SourceError::NotFound(_))));
    }
}
