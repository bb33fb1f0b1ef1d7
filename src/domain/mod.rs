//! Domain models - crossing events, stay sessions and query parameters
//!
//! - `Event` - a normalized border crossing (entry or exit) for one vehicle
//! - `EntityKey` - composite vehicle identity (region code + plate)
//! - `Session` - a reconstructed stay between an entry and an exit
//! - `WindowSpec` / `Limit` / `ScanRequest` - validated query parameters

pub mod session;
pub mod types;
pub mod window;

// Re-export commonly used types at module level
pub use session::Session;
pub use types::{Direction, EntityKey, Event, PlateId, RegionCode};
pub use window::{DateBucketRange, Limit, ScanRequest, TimeRange, WindowSpec};
