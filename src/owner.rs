//! Pointer → owner resolution (§4.4).
//!
//! Two structures back the two lookup paths: `pool_ranges` is the
//! address-range tree the design notes recommend in place of a hash table
//! (pools are few; a `BTreeMap` keyed by pool base address turns "which pool
//! owns this pointer" into one `range` query), while `owner_map` is the
//! pointer-keyed fallback the unassisted `free(p)` path needs.
//!
//! `PoolId`/`TokenBlockId` are generated handles rather than `Vec` indices —
//! directly modeled on `AllocatorId` in the teacher crate's allocator
//! manager — so that releasing a pool or token-block never invalidates
//! another one's identity.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(NonZeroUsize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenBlockId(NonZeroUsize);

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_TOKEN_BLOCK_ID: AtomicUsize = AtomicUsize::new(1);

impl PoolId {
    pub(crate) fn next() -> Self {
        let raw = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        PoolId(NonZeroUsize::new(raw).expect("pool id counter overflowed"))
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: usize) -> Self {
        PoolId(NonZeroUsize::new(n).unwrap())
    }
}

impl TokenBlockId {
    pub(crate) fn next() -> Self {
        let raw = NEXT_TOKEN_BLOCK_ID.fetch_add(1, Ordering::Relaxed);
        TokenBlockId(NonZeroUsize::new(raw).expect("token-block id counter overflowed"))
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: usize) -> Self {
        TokenBlockId(NonZeroUsize::new(n).unwrap())
    }
}

/// Manager-wide owner index: pool address ranges plus the pointer→owner
/// fallback map used by unassisted `free`/`realloc`.
#[derive(Default)]
pub struct OwnerIndex {
    pool_ranges: BTreeMap<usize, PoolId>,
    owner_map: HashMap<usize, (PoolId, TokenBlockId)>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        OwnerIndex::default()
    }

    pub fn register_pool(&mut self, base_addr: usize, id: PoolId) {
        self.pool_ranges.insert(base_addr, id);
    }

    pub fn unregister_pool(&mut self, base_addr: usize) {
        self.pool_ranges.remove(&base_addr);
    }

    /// Candidate pool whose base address is the greatest one `<= addr`.
    /// Caller must still confirm `addr` falls inside that pool's extent.
    pub fn candidate_pool(&self, addr: usize) -> Option<PoolId> {
        self.pool_ranges.range(..=addr).next_back().map(|(_, id)| *id)
    }

    pub fn record_owner(&mut self, ptr_addr: usize, pool: PoolId, token_block: TokenBlockId) {
        self.owner_map.insert(ptr_addr, (pool, token_block));
    }

    pub fn remove_owner(&mut self, ptr_addr: usize) -> Option<(PoolId, TokenBlockId)> {
        self.owner_map.remove(&ptr_addr)
    }

    pub fn lookup_owner(&self, ptr_addr: usize) -> Option<(PoolId, TokenBlockId)> {
        self.owner_map.get(&ptr_addr).copied()
    }
}
