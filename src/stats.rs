//! Granted-byte accounting (§4.6).

/// Tracks `granted_total`. Lives inside the manager's `Inner` so every
/// update happens in the same critical section as the bitmap/owner-map
/// mutation it accounts for, matching "`granted_total` is updated
/// atomically with the allocation/release under the manager's lock" —
/// the mutex is what makes it atomic here, not the field's own type.
#[derive(Default)]
pub struct GrantedStats {
    granted_total: usize,
}

impl GrantedStats {
    pub fn new() -> Self {
        GrantedStats::default()
    }

    pub fn add(&mut self, granted: usize) {
        self.granted_total += granted;
    }

    pub fn sub(&mut self, granted: usize) {
        self.granted_total -= granted;
    }

    pub fn total(&self) -> usize {
        self.granted_total
    }
}
