//! IO modules - event sources and result output
//!
//! - `source` - the `EventSource` contract and scan draining
//! - `jsonl` - raw crossing records (one JSON object per line)
//! - `table` - row-oriented source, one file per direction
//! - `partitioned` - hive-partitioned source with date partition elimination
//! - `memory` - in-memory source over typed events
//! - `output` - JSON lines result writer

pub mod jsonl;
pub mod memory;
pub mod output;
pub mod partitioned;
pub mod source;
pub mod table;

// Re-export commonly used types
pub use memory::MemorySource;
pub use output::{JsonLines, Output};
pub use partitioned::PartitionedSource;
pub use source::{for_each_event, EventSource, EventStream, Scan, ScanStats};
pub use table::TableSource;
