//! Error types for AlpsInfo
//!
//! Every failure of a placement query is surfaced as a distinct
//! [`PlacementError`] variant so callers can decide whether it is fatal
//! (abort an affinity-dependent optimization) or ignorable.

use thiserror::Error;

/// Main error type for placement queries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// The process is not running under an aprun-launched job
    #[error("No ALPS job context: ${var} is unset or not a valid application id")]
    NoJobContext {
        /// Environment variable that was consulted
        var: String,
    },

    /// The placement interface could not be reached
    #[error("ALPS placement interface unavailable: {0}")]
    InterfaceUnavailable(String),

    /// The placement interface reported an error for this job
    #[error("ALPS query failed for apid {apid} (code {code}): {message}")]
    QueryFailed {
        /// Application id that was queried
        apid: u64,
        /// Error code returned by the interface
        code: i32,
        /// Error message returned by the interface
        message: String,
    },

    /// Raw placement data failed structural validation
    #[error("Malformed placement data: {0}")]
    MalformedPlacementData(#[from] MalformedKind),
}

/// Structural defects detected while building a snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    /// The record set contains no nodes at all
    #[error("no nodes reported for the job")]
    NoNodes,

    /// The same node id was reported twice
    #[error("node {node} reported more than once")]
    DuplicateNode { node: u32 },

    /// A node was reported without any PEs
    #[error("node {node} has no PEs placed on it")]
    EmptyNode { node: u32 },

    /// A node hosts PEs but reserves no CPUs for them
    #[error("node {node} hosts PEs but has an empty CPU set")]
    NoCpus { node: u32 },

    /// A rank appears in the PE lists of two nodes (or twice on one)
    #[error("PE {rank} placed on node {node} is already placed on node {first_node}")]
    DuplicateRank { rank: u32, node: u32, first_node: u32 },

    /// A placed rank has no per-PE metadata entry
    #[error("PE {rank} on node {node} has no command/working-directory entry")]
    MissingPeMetadata { rank: u32, node: u32 },

    /// Two metadata entries exist for the same rank
    #[error("PE {rank} has more than one command/working-directory entry")]
    DuplicatePeMetadata { rank: u32 },

    /// A metadata entry exists for a rank no node lists
    #[error("PE {rank} has metadata but is not placed on any node")]
    UnplacedRank { rank: u32 },

    /// The placed ranks do not cover `0..total`
    #[error("PE {rank} is out of range for {total} placed PEs")]
    RankGap { rank: u32, total: u32 },

    /// A node references a command index that was not reported
    #[error("node {node} references command {index} but only {count} commands exist")]
    UnknownCommand { node: u32, index: usize, count: usize },

    /// A placement list entry carries a value outside its valid range
    #[error("placement entry {entry} has invalid {field} {value}")]
    InvalidPlaceEntry {
        entry: usize,
        field: &'static str,
        value: i64,
    },
}

impl MalformedKind {
    /// Rank implicated by this defect, if any
    pub fn rank(&self) -> Option<u32> {
        match self {
            Self::DuplicateRank { rank, .. }
            | Self::MissingPeMetadata { rank, .. }
            | Self::DuplicatePeMetadata { rank }
            | Self::UnplacedRank { rank }
            | Self::RankGap { rank, .. } => Some(*rank),
            _ => None,
        }
    }

    /// Node implicated by this defect, if any
    pub fn node(&self) -> Option<u32> {
        match self {
            Self::DuplicateNode { node }
            | Self::EmptyNode { node }
            | Self::NoCpus { node }
            | Self::DuplicateRank { node, .. }
            | Self::MissingPeMetadata { node, .. }
            | Self::UnknownCommand { node, .. } => Some(*node),
            _ => None,
        }
    }
}

impl PlacementError {
    /// Create a "no job context" error for the given variable
    pub fn no_job_context(var: impl Into<String>) -> Self {
        Self::NoJobContext { var: var.into() }
    }

    /// Create an "interface unavailable" error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::InterfaceUnavailable(message.into())
    }

    /// Create a "query failed" error
    pub fn query_failed(apid: u64, code: i32, message: impl Into<String>) -> Self {
        Self::QueryFailed {
            apid,
            code,
            message: message.into(),
        }
    }

    /// Check if the process simply is not inside a job
    ///
    /// Callers usually treat this as "skip affinity optimizations".
    pub fn is_no_job_context(&self) -> bool {
        matches!(self, Self::NoJobContext { .. })
    }

    /// Check if this error comes from the environment rather than the data
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            Self::NoJobContext { .. } | Self::InterfaceUnavailable(_)
        )
    }

    /// Get the structural defect, if this is a validation failure
    pub fn malformed(&self) -> Option<&MalformedKind> {
        match self {
            Self::MalformedPlacementData(kind) => Some(kind),
            _ => None,
        }
    }

    /// Get the offending PE rank, if any
    pub fn offending_rank(&self) -> Option<u32> {
        self.malformed().and_then(MalformedKind::rank)
    }

    /// Get the offending node id, if any
    pub fn offending_node(&self) -> Option<u32> {
        self.malformed().and_then(MalformedKind::node)
    }
}

/// Result type alias for placement operations
pub type Result<T> = std::result::Result<T, PlacementError>;
