//! Manager configuration: the five [`create`](crate::Mgr::create) parameters,
//! validated once and shared by both constructors.

use crate::error::ConfigError;

/// Alignment ceiling blocks are rounded up to when `full_align` is set,
/// chosen to satisfy the widest common SIMD vector.
pub const TBMAN_ALIGN: usize = 16;

/// Nominal block count a freshly carved token-block aims for; actual count
/// is clamped to whatever capacity remains in the owning pool. Keeping this
/// fixed (rather than "one token-block per pool") is what lets a pool host
/// token-blocks of more than one size class, per the data model.
pub const TOKEN_BLOCK_NOMINAL_COUNT: usize = 64;

const DEFAULT_POOL_SIZE: usize = 64 * 1024;
const DEFAULT_MIN_BLOCK: usize = 8;
const DEFAULT_STEPPING: usize = 4;

/// Validated constructor parameters for a [`Mgr`](crate::Mgr).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub pool_size: usize,
    pub min_block_size: usize,
    pub max_block_size: usize,
    /// 1 = size classes are powers of two; k>1 = k steps per power of two.
    pub stepping: usize,
    /// If true, every block is aligned to `min(largest_pow2_le(size),
    /// TBMAN_ALIGN)`; if false, only natural word alignment is guaranteed.
    pub full_align: bool,
}

impl Default for ManagerConfig {
    /// `create_default`: pool_size=64KiB, min=8, max=pool_size/4, stepping=4,
    /// full_align=true.
    fn default() -> Self {
        ManagerConfig {
            pool_size: DEFAULT_POOL_SIZE,
            min_block_size: DEFAULT_MIN_BLOCK,
            max_block_size: DEFAULT_POOL_SIZE / 4,
            stepping: DEFAULT_STEPPING,
            full_align: true,
        }
    }
}

impl ManagerConfig {
    pub fn new(
        pool_size: usize,
        min_block_size: usize,
        max_block_size: usize,
        stepping: usize,
        full_align: bool,
    ) -> Result<Self, ConfigError> {
        let cfg = ManagerConfig { pool_size, min_block_size, max_block_size, stepping, full_align };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Implements §6's `create` precondition: all sizes > 0; min <= max <=
    /// pool_size/2; stepping >= 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.min_block_size == 0 {
            return Err(ConfigError::ZeroMinBlockSize);
        }
        if self.min_block_size > self.max_block_size {
            return Err(ConfigError::MinExceedsMax { min: self.min_block_size, max: self.max_block_size });
        }
        let limit = self.pool_size / 2;
        if self.max_block_size > limit {
            return Err(ConfigError::MaxExceedsPoolShare { max: self.max_block_size, limit });
        }
        if self.stepping == 0 {
            return Err(ConfigError::ZeroStepping(self.stepping));
        }
        Ok(())
    }
}
