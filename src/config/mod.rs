//! Configuration module for AlpsInfo
//!
//! Controls where the reader looks for the job context and launch
//! working directory.

mod settings;

pub use settings::*;
