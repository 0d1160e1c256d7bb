//! Top-level placement queries
//!
//! Each call reads the placement once and builds a fresh snapshot. The
//! first failure of either step is returned unchanged.

use crate::config::ReaderConfig;
use crate::error::Result;
use crate::model::{build_snapshot, PlacementSnapshot};
use crate::reader::{fetch_raw_placement_in, fetch_raw_placement_with, JobContext, PlacementSource};

/// Query the placement of the current aprun job
pub fn query_placement() -> Result<PlacementSnapshot> {
    query_placement_in(&ReaderConfig::from_env())
}

/// Query the placement of the job described by `config`
pub fn query_placement_in(config: &ReaderConfig) -> Result<PlacementSnapshot> {
    build_snapshot(fetch_raw_placement_in(config)?)
}

/// Query the placement of an explicit job through any source
pub fn query_placement_with<S>(source: &S, context: &JobContext) -> Result<PlacementSnapshot>
where
    S: PlacementSource + ?Sized,
{
    build_snapshot(fetch_raw_placement_with(source, context)?)
}
