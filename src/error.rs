//! Error types.
//!
//! Two families, matching the error taxonomy: `ConfigError` is returned by
//! constructors (invalid argument, §7) and is the only error type exposed in
//! the public API surface. `AllocError` is internal — every `alloc`/`nalloc`
//! boundary collapses it to `None`, matching the C original's "null on
//! failure" contract.

use std::alloc::Layout;

use thiserror::Error;

/// Returned by [`crate::ManagerConfig::validate`] when constructor
/// parameters are out of range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool_size must be > 0")]
    ZeroPoolSize,

    #[error("min_block_size must be > 0")]
    ZeroMinBlockSize,

    #[error("min_block_size ({min}) must be <= max_block_size ({max})")]
    MinExceedsMax { min: usize, max: usize },

    #[error("max_block_size ({max}) must be <= pool_size / 2 ({limit})")]
    MaxExceedsPoolShare { max: usize, limit: usize },

    #[error("stepping must be >= 1, got {0}")]
    ZeroStepping(usize),
}

/// Internal failure modes. Never returned from the public API directly;
/// `Mgr::nalloc` maps every variant to `None`.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("out of memory requesting layout {0:?}")]
    OutOfMemory(Layout),

    #[error("invalid layout: size={size}, align={align}")]
    InvalidLayout { size: usize, align: usize },
}

impl AllocError {
    pub(crate) fn layout(size: usize, align: usize) -> Result<Layout, AllocError> {
        Layout::from_size_align(size, align)
            .map_err(|_| AllocError::InvalidLayout { size, align })
    }
}
