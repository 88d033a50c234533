//! Executor configuration
//!
//! Hosts load this however they like (file, env, embedded JSON); the crate only
//! defines the shape, the defaults and the validation rules.

use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, QueryResult};
use crate::observability::Severity;

/// Configuration shared by every executor of one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Bytes requested from the document source per read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Maximum container nesting accepted before the document is rejected
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Scratch buffers kept by the pool between elements
    #[serde(default = "default_pooled_buffers")]
    pub pooled_buffers: usize,

    /// Initial capacity of a pooled scratch buffer
    #[serde(default = "default_pooled_buffer_capacity")]
    pub pooled_buffer_capacity: usize,

    /// Whether a missing path segment re-reads a rewindable source as a tree
    #[serde(default = "default_allow_tree_fallback")]
    pub allow_tree_fallback: bool,

    /// Minimum severity written by the logger
    #[serde(default = "default_log_level")]
    pub log_level: Severity,
}

fn default_read_chunk_size() -> usize {
    8192
}
fn default_max_depth() -> usize {
    512
}
fn default_pooled_buffers() -> usize {
    16
}
fn default_pooled_buffer_capacity() -> usize {
    4096
}
fn default_allow_tree_fallback() -> bool {
    true
}
fn default_log_level() -> Severity {
    Severity::Info
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            max_depth: default_max_depth(),
            pooled_buffers: default_pooled_buffers(),
            pooled_buffer_capacity: default_pooled_buffer_capacity(),
            allow_tree_fallback: default_allow_tree_fallback(),
            log_level: default_log_level(),
        }
    }
}

impl ExecutorConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(content: &str) -> QueryResult<Self> {
        let config: ExecutorConfig = serde_json::from_str(content)
            .map_err(|e| QueryError::InvalidConfig(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> QueryResult<()> {
        if self.read_chunk_size == 0 {
            return Err(QueryError::InvalidConfig(
                "read_chunk_size must be > 0".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(QueryError::InvalidConfig("max_depth must be > 0".into()));
        }
        Ok(())
    }

    /// Config with a small read chunk, useful for exercising incremental reads
    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }
}
