//! Shared types for crossing analytics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted region code (ISO-1 style codes are a single character)
pub const MAX_REGION_CODE_LEN: usize = 3;

/// Registration region of a vehicle, e.g. `D` or `CH`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCode(String);

impl RegionCode {
    /// Parse a region code: 1-3 ASCII alphanumerics, normalized to upper case.
    /// Returns None for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim();
        if code.is_empty()
            || code.len() > MAX_REGION_CODE_LEN
            || !code.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return None;
        }
        Some(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// License plate as recorded by the crossing sensor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlateId(String);

impl PlateId {
    pub fn parse(raw: &str) -> Option<Self> {
        let plate = raw.trim();
        if plate.is_empty() {
            return None;
        }
        Some(Self(plate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite identity of a tracked vehicle.
///
/// Ordering is region first, then plate. Ranking uses it as the tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub region: RegionCode,
    pub plate: PlateId,
}

impl EntityKey {
    #[inline]
    pub fn new(region: RegionCode, plate: PlateId) -> Self {
        Self { region, plate }
    }

    /// Build a key from raw strings, validating both parts
    pub fn parse(region: &str, plate: &str) -> Option<Self> {
        Some(Self { region: RegionCode::parse(region)?, plate: PlateId::parse(plate)? })
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.plate)
    }
}

/// Crossing direction. Incoming crossings open a stay, outgoing ones close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Entry, Direction::Exit];

    /// Stream name used by the backing stores (`incoming` / `outgoing`)
    pub fn stream_name(&self) -> &'static str {
        match self {
            Direction::Entry => "incoming",
            Direction::Exit => "outgoing",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" | "incoming" | "in" => Ok(Direction::Entry),
            "exit" | "outgoing" | "out" => Ok(Direction::Exit),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// A single normalized crossing event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub key: EntityKey,
    pub direction: Direction,
}

impl Event {
    #[inline]
    pub fn new(timestamp: DateTime<Utc>, key: EntityKey, direction: Direction) -> Self {
        Self { timestamp, key, direction }
    }

    #[inline]
    pub fn entry(timestamp: DateTime<Utc>, key: EntityKey) -> Self {
        Self::new(timestamp, key, Direction::Entry)
    }

    #[inline]
    pub fn exit(timestamp: DateTime<Utc>, key: EntityKey) -> Self {
        Self::new(timestamp, key, Direction::Exit)
    }
}

/// Convert a span in milliseconds to fractional hours
#[inline]
pub fn millis_to_hours(millis: i64) -> f64 {
    millis as f64 / 3_600_000.0
}
