//! In-memory event source for library callers and tests

use crate::domain::{Event, ScanRequest};
use crate::error::SourceError;
use crate::io::source::{EventSource, Scan};

/// Serves already-typed events from memory.
///
/// Direction and time-range hints are honoured; the events themselves are
/// never modified.
pub struct MemorySource {
    name: String,
    events: Vec<Event>,
}

impl MemorySource {
    pub fn new(name: &str, events: Vec<Event>) -> Self {
        Self { name: name.to_string(), events }
    }
}

impl EventSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, request: &ScanRequest) -> Result<Scan<'_>, SourceError> {
        let request = request.clone();
        Ok(Scan::new(Box::new(
            self.events
                .iter()
                .filter(move |e| {
                    request.wants_direction(e.direction) && request.wants_timestamp(e.timestamp)
                })
                .cloned()
                .map(Ok),
        )))
    }
}
