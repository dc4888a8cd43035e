//! Per-user job quota.

use serde::Serialize;

/// How many jobs a user currently holds against their cap.
///
/// Invariant: `used <= total`. Every job record counts once until it is
/// deleted, regardless of its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub used: i32,
    pub total: i32,
}

impl Quota {
    pub fn new(used: i32, total: i32) -> Self {
        Self { used, total }
    }

    /// Whether one more job may be created.
    pub fn has_capacity(&self) -> bool {
        self.used < self.total
    }

    pub fn remaining(&self) -> i32 {
        (self.total - self.used).max(0)
    }
}
