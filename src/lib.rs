//! # AlpsInfo - ALPS Job Placement for Cray Systems
//!
//! AlpsInfo lets an aprun-launched application inspect its own placement:
//! which PEs (ranks) run on which compute nodes, which CPUs they are bound
//! to, and what command and working directory each PE was started with.
//! It is meant for topology-aware communication schedules, affinity-aware
//! work distribution and diagnostics.
//!
//! ## Features
//!
//! - **Single Read-Only Query**: One ALPS appinfo call per snapshot, no retries
//! - **Validated Model**: Every rank placed exactly once, every node consistent
//! - **Typed Failures**: No job, interface unavailable, query failed, malformed data
//! - **Injectable Sources**: Swap ALPS for any [`reader::PlacementSource`] in tests
//! - **Launch Parameters**: Width, depth, PEs per node and NUMA settings per command
//!
//! The ALPS interface is linked only when the `alps` feature is enabled.
//!
//! ## Quick Start
//!
//! ```no_run
//! use alpsinfo::query_placement;
//!
//! match query_placement() {
//!     Ok(snapshot) => {
//!         let home = snapshot.node_for(0).unwrap();
//!         println!("rank 0 runs on nid {} (CPUs {})", home.id, home.cpu_list());
//!     }
//!     Err(e) if e.is_no_job_context() => println!("not running under aprun"),
//!     Err(e) => eprintln!("placement unavailable: {}", e),
//! }
//! ```
//!
//! ## Injecting Placement Data
//!
//! ```
//! use alpsinfo::reader::{JobContext, PlacementSource, RawNode, RawRecordSet};
//! use alpsinfo::{query_placement_with, Result};
//!
//! struct Canned;
//!
//! impl PlacementSource for Canned {
//!     fn name(&self) -> &'static str {
//!         "canned"
//!     }
//!
//!     fn fetch(&self, context: &JobContext) -> Result<RawRecordSet> {
//!         Ok(RawRecordSet::new(context.apid())
//!             .with_node(RawNode::new(10).with_cpus([0, 1]).with_pes([0, 1]))
//!             .with_pe(0, "./app", "/home/x")
//!             .with_pe(1, "./app", "/home/x"))
//!     }
//! }
//!
//! let context = JobContext::new(42).unwrap();
//! let snapshot = query_placement_with(&Canned, &context).unwrap();
//! assert_eq!(snapshot.pes_on(10), Some(&[0, 1][..]));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod model;
mod query;
pub mod reader;

// Re-export commonly used types
pub use config::ReaderConfig;
pub use error::{MalformedKind, PlacementError, Result};
pub use model::{
    build_snapshot, AccelType, CommandDetail, NodeRecord, PlacementRecord, PlacementSnapshot,
};
pub use query::{query_placement, query_placement_in, query_placement_with};
pub use reader::{fetch_raw_placement, JobContext, PlacementSource, RawRecordSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use alpsinfo::prelude::*;
    //! ```

    pub use crate::config::ReaderConfig;
    pub use crate::error::{MalformedKind, PlacementError, Result};
    pub use crate::model::{NodeRecord, PlacementRecord, PlacementSnapshot};
    pub use crate::query::{query_placement, query_placement_with};
    pub use crate::reader::{JobContext, PlacementSource, RawNode, RawRecordSet};
}
