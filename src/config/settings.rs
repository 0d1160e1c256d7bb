//! Reader settings for AlpsInfo
//!
//! Defines where the job context and launch working directory are read
//! from, with defaults matching a standard aprun environment.

use serde::{Deserialize, Serialize};
use std::env;

/// Default environment variable carrying the ALPS application id
pub const DEFAULT_APP_ID_VAR: &str = "ALPS_APP_ID";

/// Default environment variable carrying the launch working directory
pub const DEFAULT_WORKDIR_VAR: &str = "PWD";

/// Override for [`ReaderConfig::app_id_var`]
pub const APP_ID_VAR_OVERRIDE: &str = "ALPSINFO_APP_ID_VAR";

/// Override for [`ReaderConfig::workdir_var`]
pub const WORKDIR_VAR_OVERRIDE: &str = "ALPSINFO_WORKDIR_VAR";

/// Runtime configuration for the placement reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Environment variable holding the ALPS application id
    pub app_id_var: String,
    /// Environment variable holding the launch working directory
    ///
    /// aprun starts every PE in the directory it was invoked from. When the
    /// variable is unset the process' current directory is used instead.
    pub workdir_var: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            app_id_var: DEFAULT_APP_ID_VAR.to_string(),
            workdir_var: DEFAULT_WORKDIR_VAR.to_string(),
        }
    }
}

impl ReaderConfig {
    /// Build configuration from defaults plus `ALPSINFO_*` overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(var) = non_empty_var(APP_ID_VAR_OVERRIDE) {
            config.app_id_var = var;
        }
        if let Some(var) = non_empty_var(WORKDIR_VAR_OVERRIDE) {
            config.workdir_var = var;
        }

        config
    }

    /// Set the application id variable
    pub fn with_app_id_var(mut self, var: impl Into<String>) -> Self {
        self.app_id_var = var.into();
        self
    }

    /// Set the working directory variable
    pub fn with_workdir_var(mut self, var: impl Into<String>) -> Self {
        self.workdir_var = var.into();
        self
    }

    /// Parse configuration from a JSON document
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
