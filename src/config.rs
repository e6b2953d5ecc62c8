//! Configuration for strata
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StrataError};

/// Block sizes must be whole multiples of the page size.
pub const PAGE_SIZE: usize = 4096;

/// Main configuration for a block store and the tree built on it
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Block Store Configuration
    // -------------------------------------------------------------------------
    /// Backing file. `None` maps anonymous memory that disappears on close.
    pub path: Option<PathBuf>,

    /// Size of every block in bytes, a non-zero multiple of 4096
    pub block_size: usize,

    /// Blocks added per growth when the free list is empty. The first one is
    /// handed out, the rest are pushed onto the free list.
    pub growth_blocks: usize,

    // -------------------------------------------------------------------------
    // B+Tree Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on decoded internal nodes kept in the node cache
    pub node_cache_capacity: usize,

    /// Largest value stored inline in a leaf. `None` derives it from the
    /// block and key sizes.
    pub inline_value_limit: Option<usize>,

    /// Values longer than this go to a big-value chain instead of the varchar
    /// store. `None` uses the block size.
    pub big_value_threshold: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            block_size: PAGE_SIZE,
            growth_blocks: 1,
            node_cache_capacity: 1024,
            inline_value_limit: None,
            big_value_threshold: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the settings that do not depend on a key size
    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;
        if self.growth_blocks == 0 {
            return Err(StrataError::Config(
                "growth_blocks must be at least 1".to_string(),
            ));
        }
        if let Some(threshold) = self.big_value_threshold {
            if threshold == 0 {
                return Err(StrataError::Config(
                    "big_value_threshold must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Block size rule shared by every way of opening a store.
pub(crate) fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size % PAGE_SIZE != 0 {
        return Err(StrataError::Config(format!(
            "block size {} is not a positive multiple of {}",
            block_size, PAGE_SIZE
        )));
    }
    if block_size > u32::MAX as usize {
        return Err(StrataError::Config(format!(
            "block size {} does not fit the control block",
            block_size
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Use anonymous memory instead of a file
    pub fn anonymous(mut self) -> Self {
        self.config.path = None;
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set how many blocks a single growth adds
    pub fn growth_blocks(mut self, blocks: usize) -> Self {
        self.config.growth_blocks = blocks;
        self
    }

    /// Set the node cache capacity (in decoded internal nodes)
    pub fn node_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.node_cache_capacity = capacity;
        self
    }

    /// Override the inline value limit (in bytes)
    pub fn inline_value_limit(mut self, limit: usize) -> Self {
        self.config.inline_value_limit = Some(limit);
        self
    }

    /// Override the big value threshold (in bytes)
    pub fn big_value_threshold(mut self, threshold: usize) -> Self {
        self.config.big_value_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
