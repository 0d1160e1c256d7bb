//! ALPS job context detection
//!
//! An aprun-launched process finds its application id in the environment.
//! Outside of a job the variable is missing and there is nothing to query.

use crate::config::ReaderConfig;
use crate::error::{PlacementError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Identity of the running aprun job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobContext {
    apid: u64,
}

impl JobContext {
    /// Create a context for a known application id
    ///
    /// ALPS never hands out apid 0, so it is treated as "no job".
    pub fn new(apid: u64) -> Option<Self> {
        (apid != 0).then_some(Self { apid })
    }

    /// Parse an application id as found in `ALPS_APP_ID`
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<u64>().ok().and_then(Self::new)
    }

    /// Detect the job context using the given configuration
    pub fn detect(config: &ReaderConfig) -> Result<Self> {
        let context = env::var(&config.app_id_var)
            .ok()
            .and_then(|value| Self::parse(&value));

        match context {
            Some(context) => {
                tracing::debug!("Detected ALPS job context: apid {}", context.apid);
                Ok(context)
            }
            None => {
                tracing::debug!("No ALPS job context in ${}", config.app_id_var);
                Err(PlacementError::no_job_context(&config.app_id_var))
            }
        }
    }

    /// Detect the job context with defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::detect(&ReaderConfig::from_env())
    }

    /// Application id assigned by ALPS
    pub fn apid(&self) -> u64 {
        self.apid
    }
}

impl fmt::Display for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "apid {}", self.apid)
    }
}
