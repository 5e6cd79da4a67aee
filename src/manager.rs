//! The manager (`Mgr`): the top-level object and the five external
//! operations (§6).

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::config::ManagerConfig;
use crate::error::ConfigError;
use crate::external;
use crate::owner::{OwnerIndex, PoolId, TokenBlockId};
use crate::pool::Pool;
use crate::size_class::SizeClassTable;
use crate::stats::GrantedStats;

struct Inner {
    pools: HashMap<PoolId, Pool>,
    owner_index: OwnerIndex,
    /// Per size-class-index sequence of token-blocks with a free slot; the
    /// front is the next allocation target (§3 "open_table").
    open_table: HashMap<usize, VecDeque<(PoolId, TokenBlockId)>>,
    external_map: HashMap<usize, usize>,
    /// At most one fully-empty pool is retained as a cache (§9 decision 1).
    empty_pool_cache: Option<PoolId>,
    /// Lives here, not on `Mgr`, so every update happens in the same
    /// critical section as the bitmap/owner-map mutation it accounts for.
    stats: GrantedStats,
}

enum Owner {
    Internal { pool_id: PoolId, tb_id: TokenBlockId, class_idx: usize, class_size: usize },
    External { size: usize },
}

/// Thread-safe hierarchical token-block memory manager.
///
/// One mutex guards all mutable state (§5); `granted_space()` is served from
/// an atomic counter updated under that same lock.
pub struct Mgr {
    config: ManagerConfig,
    size_classes: SizeClassTable,
    inner: Mutex<Inner>,
}

impl Mgr {
    /// `create_default`: pool_size=64KiB, min=8, max=pool_size/4, stepping=4,
    /// full_align=true.
    pub fn create_default() -> Self {
        Mgr::from_config(ManagerConfig::default()).expect("default config is always valid")
    }

    /// `create`: validates its five parameters before constructing anything.
    pub fn create(
        pool_size: usize,
        min_block_size: usize,
        max_block_size: usize,
        stepping: usize,
        full_align: bool,
    ) -> Result<Self, ConfigError> {
        let cfg = ManagerConfig::new(pool_size, min_block_size, max_block_size, stepping, full_align)?;
        Mgr::from_config(cfg)
    }

    fn from_config(cfg: ManagerConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let size_classes = SizeClassTable::build(&cfg);
        tracing::debug!(config = ?cfg, classes = ?size_classes.classes(), "manager created");
        Ok(Mgr {
            config: cfg,
            size_classes,
            inner: Mutex::new(Inner {
                pools: HashMap::new(),
                owner_index: OwnerIndex::new(),
                open_table: HashMap::new(),
                external_map: HashMap::new(),
                empty_pool_cache: None,
                stats: GrantedStats::new(),
            }),
        })
    }

    /// Total bytes currently granted to callers (§4.6).
    pub fn granted_space(&self) -> usize {
        self.inner.lock().stats.total()
    }

    /// Number of pools currently retained (live + the one empty-pool
    /// cache, if any). `#[cfg(test)]` wouldn't be visible to
    /// `tests/integration.rs` (a separate crate linked against the
    /// ordinary, non-test build of this library), so this is a plain
    /// `pub fn` instead — exposed only for exercising §8 S5's
    /// retained-pool bound from test code.
    pub fn pool_count(&self) -> usize {
        self.inner.lock().pools.len()
    }

    /// The `pool_size` this manager was configured with, for the same
    /// test-introspection purpose as [`Mgr::pool_count`].
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Size-unassisted form: `current_size` is assumed 0, matching
    /// `tbman_alloc`'s relationship to `tbman_nalloc` in the original header.
    pub fn alloc(&self, current_ptr: Option<NonNull<u8>>, requested_size: usize) -> (Option<NonNull<u8>>, usize) {
        self.nalloc(current_ptr, 0, requested_size)
    }

    /// The unified allocate/reallocate/free primitive (§4.5).
    pub fn nalloc(
        &self,
        current_ptr: Option<NonNull<u8>>,
        current_size: usize,
        requested_size: usize,
    ) -> (Option<NonNull<u8>>, usize) {
        if requested_size == 0 {
            if let Some(ptr) = current_ptr {
                self.free(ptr, current_size);
            }
            return (None, 0);
        }
        match current_ptr {
            None => self.do_alloc(requested_size),
            Some(ptr) => self.do_realloc(ptr, current_size, requested_size),
        }
    }

    /// Releases every pool and reports a leak if live allocations remain.
    /// Consumes the manager; there is no reopening it.
    pub fn discard(self) {
        let mut inner = self.inner.lock();
        let granted = inner.stats.total();
        if granted > 0 {
            tracing::warn!(leaked_bytes = granted, "discarding manager with live allocations");
        }
        let externals: Vec<(usize, usize)> = inner.external_map.drain().collect();
        for (addr, size) in externals {
            let ptr = unsafe { NonNull::new_unchecked(addr as *mut u8) };
            external::free_external(ptr, size);
        }
        inner.pools.clear();
    }

    fn do_alloc(&self, requested_size: usize) -> (Option<NonNull<u8>>, usize) {
        let Some((idx, class_size)) = self.size_classes.lookup(requested_size) else {
            return self.do_alloc_external(requested_size);
        };
        let mut inner = self.inner.lock();
        let Some((pool_id, tb_id)) = self.ensure_open_token_block(&mut inner, idx, class_size) else {
            tracing::warn!(size_class = class_size, "pool creation failed, out of memory");
            return (None, 0);
        };
        let pool = inner.pools.get_mut(&pool_id).expect("just-acquired pool");
        let tb = pool.token_block_mut(tb_id);
        let (ptr, _slot) = tb.carve();
        if tb.is_full() {
            close_token_block(&mut inner, idx, pool_id, tb_id);
        }
        inner.owner_index.record_owner(ptr.as_ptr() as usize, pool_id, tb_id);
        inner.stats.add(class_size);
        drop(inner);
        tracing::debug!(size_class = class_size, "allocated block");
        (Some(ptr), class_size)
    }

    fn do_alloc_external(&self, requested_size: usize) -> (Option<NonNull<u8>>, usize) {
        match external::alloc_external(requested_size) {
            Ok(ptr) => {
                let mut inner = self.inner.lock();
                inner.external_map.insert(ptr.as_ptr() as usize, requested_size);
                inner.stats.add(requested_size);
                drop(inner);
                tracing::debug!(size = requested_size, "external allocation");
                (Some(ptr), requested_size)
            }
            Err(err) => {
                tracing::warn!(size = requested_size, error = %err, "external allocation failed");
                (None, 0)
            }
        }
    }

    /// Returns the front-of-queue open token-block for `idx`, reusing a
    /// recycled token-block or carving a fresh pool if none is open.
    fn ensure_open_token_block(
        &self,
        inner: &mut Inner,
        idx: usize,
        class_size: usize,
    ) -> Option<(PoolId, TokenBlockId)> {
        if let Some(&front) = inner.open_table.get(&idx).and_then(|dq| dq.front()) {
            return Some(front);
        }
        let pool_ids: Vec<PoolId> = inner.pools.keys().copied().collect();
        for pool_id in pool_ids {
            let pool = inner.pools.get_mut(&pool_id).expect("pool id from own key set");
            let was_fully_empty = pool.is_fully_empty();
            if let Some(tb_id) = pool.acquire_token_block(class_size, self.config.full_align) {
                if was_fully_empty && inner.empty_pool_cache == Some(pool_id) {
                    inner.empty_pool_cache = None;
                }
                inner.open_table.entry(idx).or_default().push_front((pool_id, tb_id));
                return Some((pool_id, tb_id));
            }
        }
        let mut pool = Pool::new(&self.config).ok()?;
        let pool_id = pool.id();
        let tb_id = pool.acquire_token_block(class_size, self.config.full_align)?;
        inner.owner_index.register_pool(pool.base_addr(), pool_id);
        inner.pools.insert(pool_id, pool);
        inner.open_table.entry(idx).or_default().push_front((pool_id, tb_id));
        tracing::debug!(?pool_id, "new pool created");
        Some((pool_id, tb_id))
    }

    fn free(&self, ptr: NonNull<u8>, current_size: usize) {
        let addr = ptr.as_ptr() as usize;
        let mut inner = self.inner.lock();
        match self.resolve_owner(&inner, addr, current_size) {
            Some(Owner::Internal { pool_id, tb_id, class_idx, class_size }) => {
                self.release_internal(&mut inner, pool_id, tb_id, class_idx, addr);
                inner.stats.sub(class_size);
                drop(inner);
            }
            Some(Owner::External { size }) => {
                inner.external_map.remove(&addr);
                inner.stats.sub(size);
                drop(inner);
                external::free_external(ptr, size);
            }
            None => {
                debug_assert!(false, "free of a pointer not owned by this manager");
                tracing::warn!("free of an unrecognized pointer ignored");
            }
        }
    }

    fn do_realloc(&self, ptr: NonNull<u8>, current_size: usize, requested_size: usize) -> (Option<NonNull<u8>>, usize) {
        let addr = ptr.as_ptr() as usize;
        let owner = {
            let inner = self.inner.lock();
            self.resolve_owner(&inner, addr, current_size)
        };
        let Some(owner) = owner else {
            debug_assert!(false, "realloc of a pointer not owned by this manager");
            return (None, 0);
        };

        // Same-size-class fast path (§8 invariant 5): no copy, same pointer.
        if let Owner::Internal { class_idx, .. } = &owner {
            if let Some((new_idx, new_class_size)) = self.size_classes.lookup(requested_size) {
                if new_idx == *class_idx {
                    return (Some(ptr), new_class_size);
                }
            }
        }

        // External-to-external fast path: the OS allocator's own realloc,
        // no allocate-new/copy/free-old round trip.
        if let Owner::External { size } = &owner {
            let size = *size;
            if self.size_classes.lookup(requested_size).is_none() {
                return match external::realloc_external(ptr, size, requested_size) {
                    Ok(new_ptr) => {
                        let mut inner = self.inner.lock();
                        inner.external_map.remove(&addr);
                        inner.external_map.insert(new_ptr.as_ptr() as usize, requested_size);
                        inner.stats.sub(size);
                        inner.stats.add(requested_size);
                        drop(inner);
                        tracing::debug!(size = requested_size, "external reallocation");
                        (Some(new_ptr), requested_size)
                    }
                    Err(err) => {
                        tracing::warn!(size = requested_size, error = %err, "external reallocation failed");
                        (None, 0)
                    }
                };
            }
        }

        let old_granted = match &owner {
            Owner::Internal { class_size, .. } => *class_size,
            Owner::External { size } => *size,
        };

        let (new_ptr, new_granted) = self.do_alloc(requested_size);
        let Some(new_ptr) = new_ptr else {
            // OOM: existing allocation must not be mutated.
            return (None, 0);
        };

        let copy_len = old_granted.min(requested_size);
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
        }

        let mut inner = self.inner.lock();
        match owner {
            Owner::Internal { pool_id, tb_id, class_idx, class_size } => {
                self.release_internal(&mut inner, pool_id, tb_id, class_idx, addr);
                inner.stats.sub(class_size);
                drop(inner);
            }
            Owner::External { size } => {
                inner.external_map.remove(&addr);
                inner.stats.sub(size);
                drop(inner);
                external::free_external(ptr, size);
            }
        }

        (Some(new_ptr), new_granted)
    }

    /// Locates the owner of `addr` via the size-assisted path when
    /// `current_size > 0` (§4.4.1), falling back to the unassisted
    /// `owner_map`/`external_map` lookup otherwise (§4.4.2).
    fn resolve_owner(&self, inner: &Inner, addr: usize, current_size: usize) -> Option<Owner> {
        if current_size > 0 {
            if let Some((class_idx, class_size)) = self.size_classes.lookup(current_size) {
                if let Some(pool_id) = inner.owner_index.candidate_pool(addr) {
                    if let Some(pool) = inner.pools.get(&pool_id) {
                        if pool.contains_addr(addr) {
                            if let Some(tb_id) = pool.find_token_block(addr) {
                                debug_assert_eq!(
                                    pool.token_block(tb_id).size_class(),
                                    class_size,
                                    "current_size does not match the token-block's size class"
                                );
                                return Some(Owner::Internal { pool_id, tb_id, class_idx, class_size });
                            }
                        }
                    }
                }
            }
        }
        if let Some((pool_id, tb_id)) = inner.owner_index.lookup_owner(addr) {
            let class_size = inner.pools[&pool_id].token_block(tb_id).size_class();
            let class_idx = self
                .size_classes
                .classes()
                .iter()
                .position(|&c| c == class_size)
                .expect("size class of a live token-block must be in the table");
            return Some(Owner::Internal { pool_id, tb_id, class_idx, class_size });
        }
        if let Some(&size) = inner.external_map.get(&addr) {
            return Some(Owner::External { size });
        }
        None
    }

    /// Releases one slot from `tb_id`, updating the open table, the owner
    /// map, and (if the token-block/pool just emptied) the pool cache.
    fn release_internal(&self, inner: &mut Inner, pool_id: PoolId, tb_id: TokenBlockId, class_idx: usize, addr: usize) {
        inner.owner_index.remove_owner(addr);
        let pool = inner.pools.get_mut(&pool_id).expect("owner-resolved pool must exist");
        let tb = pool.token_block_mut(tb_id);
        let was_full = tb.is_full();
        let slot_index = tb.index_of(unsafe { NonNull::new_unchecked(addr as *mut u8) });
        let became_empty = tb.release(slot_index);

        if was_full {
            inner.open_table.entry(class_idx).or_default().push_front((pool_id, tb_id));
        }
        if became_empty {
            close_token_block(inner, class_idx, pool_id, tb_id);
            let pool = inner.pools.get_mut(&pool_id).expect("owner-resolved pool must exist");
            pool.note_release(tb_id, true);
            if pool.is_fully_empty() {
                self.maybe_release_pool(inner, pool_id);
            }
        }
    }

    fn maybe_release_pool(&self, inner: &mut Inner, pool_id: PoolId) {
        match inner.empty_pool_cache {
            None => {
                inner.empty_pool_cache = Some(pool_id);
                tracing::debug!(?pool_id, "retaining empty pool as cache");
            }
            Some(cached) if cached != pool_id => {
                if let Some(pool) = inner.pools.remove(&pool_id) {
                    inner.owner_index.unregister_pool(pool.base_addr());
                    tracing::debug!(?pool_id, "releasing empty pool to the OS");
                }
            }
            _ => {}
        }
    }
}

fn close_token_block(inner: &mut Inner, class_idx: usize, pool_id: PoolId, tb_id: TokenBlockId) {
    if let Some(dq) = inner.open_table.get_mut(&class_idx) {
        dq.retain(|&(p, t)| !(p == pool_id && t == tb_id));
    }
}

unsafe impl Send for Mgr {}
unsafe impl Sync for Mgr {}
