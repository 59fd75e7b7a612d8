//! Loader configuration
//!
//! Read from TOML, every field optional:
//!
//! ```toml
//! worker_count = 8
//! thread_name = "stl-worker"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{LoaderError, LoaderResult};

pub const DEFAULT_WORKER_COUNT: usize = 8;
pub const MAX_WORKER_COUNT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Number of decode workers per load
    pub worker_count: usize,
    /// Prefix for worker thread names; workers are `{thread_name}-{index}`
    pub thread_name: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            thread_name: "stl-worker".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn from_toml_str(text: &str) -> LoaderResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> LoaderResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> LoaderResult<()> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(LoaderError::Config(format!(
                "worker_count must be between 1 and {}, got {}",
                MAX_WORKER_COUNT, self.worker_count
            )));
        }
        if self.thread_name.is_empty() {
            return Err(LoaderError::Config("thread_name must not be empty".to_string()));
        }
        Ok(())
    }
}
