//! Placement model
//!
//! Normalized, validated view of a job's placement built from raw records.

mod builder;
pub mod cpuset;
mod types;

pub use builder::build_snapshot;
pub use types::{AccelType, CommandDetail, NodeRecord, PlacementRecord, PlacementSnapshot};
