//! Border crossing analytics
//!
//! Session reconstruction, windowed frequency counts and quantile summaries over
//! entry/exit event streams, with pluggable event sources.

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
