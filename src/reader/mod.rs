//! Placement reader
//!
//! Issues one read-only placement query for the current job and returns
//! the raw records without interpreting them.

mod alps;
mod context;
mod raw;

pub use alps::AlpsInterface;
pub use context::JobContext;
pub use raw::{RawCommand, RawNode, RawRecordSet, CPU_MASK_WORD_BITS};

use crate::config::ReaderConfig;
use crate::error::Result;

/// A platform interface that can report placement for a job
///
/// Implementations perform exactly one query per call and never retry.
pub trait PlacementSource {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Query the raw placement records of a job
    fn fetch(&self, context: &JobContext) -> Result<RawRecordSet>;
}

/// Fetch raw placement for the ambient job from ALPS
pub fn fetch_raw_placement() -> Result<RawRecordSet> {
    fetch_raw_placement_in(&ReaderConfig::from_env())
}

/// Fetch raw placement for the job described by `config` from ALPS
pub fn fetch_raw_placement_in(config: &ReaderConfig) -> Result<RawRecordSet> {
    let context = JobContext::detect(config)?;
    fetch_raw_placement_with(&AlpsInterface::new(config.clone()), &context)
}

/// Fetch raw placement for an explicit job from any source
pub fn fetch_raw_placement_with<S>(source: &S, context: &JobContext) -> Result<RawRecordSet>
where
    S: PlacementSource + ?Sized,
{
    tracing::debug!("Querying {} placement for {}", source.name(), context);
    let raw = source.fetch(context)?;
    tracing::debug!(
        "{} returned {} node entries and {} PE entries",
        source.name(),
        raw.node_entries(),
        raw.pe_entries()
    );
    Ok(raw)
}
