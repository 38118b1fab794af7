// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Logical memory accounting for operator buffers.
//!
//! Responsibilities:
//! - Defines the reserve/release contract (`MemoryAccountant`) consumed by operators.
//! - Provides a hierarchical tracker with optional byte limits (circuit breaking).
//! - Provides an RAII `Reservation` so every successful reserve is matched by one release.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Raised when a reservation would push a tracker over its configured limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "memory limit exceeded on tracker '{label}': requested {requested} bytes, \
     used {used} of {limit} bytes"
)]
pub struct MemoryLimitExceeded {
    pub label: String,
    pub requested: i64,
    pub used: i64,
    pub limit: i64,
}

/// Byte-budget service shared by concurrently running operators.
///
/// Implementations must be thread-safe. Callers pair every successful
/// `reserve` with exactly one `release` of the same size.
pub trait MemoryAccountant: Send + Sync + std::fmt::Debug {
    fn reserve(&self, bytes: i64) -> Result<(), MemoryLimitExceeded>;

    fn release(&self, bytes: i64);
}

/// Tracks logical memory usage for a component and its ancestors.
///
/// This is a lightweight accounting utility that only records bytes explicitly
/// reported by the caller. It does NOT reflect real process RSS or allocator
/// statistics.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
    allocated: AtomicI64,
    deallocated: AtomicI64,
    children: Mutex<Vec<Weak<MemTracker>>>,
}

impl MemTracker {
    /// Create a root tracker with no parent and no limit.
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Self::new_root_with_limit(label, -1)
    }

    /// Create a root tracker. A negative `limit` means unlimited.
    pub fn new_root_with_limit(label: impl Into<String>, limit: i64) -> Arc<Self> {
        Arc::new(Self::build(label.into(), limit, None))
    }

    /// Create an unlimited child tracker with the provided parent.
    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Self::new_child_with_limit(label, -1, parent)
    }

    pub fn new_child_with_limit(
        label: impl Into<String>,
        limit: i64,
        parent: &Arc<MemTracker>,
    ) -> Arc<Self> {
        let child = Arc::new(Self::build(label.into(), limit, Some(Arc::clone(parent))));
        let mut children = parent.children.lock().unwrap_or_else(|e| e.into_inner());
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        drop(children);
        child
    }

    fn build(label: String, limit: i64, parent: Option<Arc<MemTracker>>) -> Self {
        Self {
            label,
            limit,
            parent,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            allocated: AtomicI64::new(0),
            deallocated: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn has_limit(&self) -> bool {
        self.limit >= 0
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn allocated(&self) -> i64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn deallocated(&self) -> i64 {
        self.deallocated.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> Vec<Arc<MemTracker>> {
        let mut out = Vec::new();
        let guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
        for weak in guard.iter() {
            if let Some(child) = weak.upgrade() {
                out.push(child);
            }
        }
        out
    }

    /// Increase consumption for this tracker and all ancestors, failing without
    /// side effects if any tracker on the path would exceed its limit.
    pub fn try_consume(&self, bytes: i64) -> Result<(), MemoryLimitExceeded> {
        if bytes <= 0 {
            return Ok(());
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if current.limit >= 0 && new_value > current.limit {
                current.current.fetch_sub(bytes, Ordering::AcqRel);
                let err = MemoryLimitExceeded {
                    label: current.label.clone(),
                    requested: bytes,
                    used: new_value - bytes,
                    limit: current.limit,
                };
                // Roll back every tracker below the one that rejected.
                let mut undo: Option<&MemTracker> = Some(self);
                while let Some(u) = undo {
                    if std::ptr::eq(u, current) {
                        break;
                    }
                    u.current.fetch_sub(bytes, Ordering::AcqRel);
                    undo = u.parent.as_deref();
                }
                return Err(err);
            }
            tracker = current.parent.as_deref();
        }

        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.allocated.fetch_add(bytes, Ordering::AcqRel);
            current.update_peak(current.current());
            tracker = current.parent.as_deref();
        }
        Ok(())
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.current.fetch_sub(bytes, Ordering::AcqRel);
            current.deallocated.fetch_add(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl MemoryAccountant for MemTracker {
    fn reserve(&self, bytes: i64) -> Result<(), MemoryLimitExceeded> {
        self.try_consume(bytes)
    }

    fn release(&self, bytes: i64) {
        MemTracker::release(self, bytes);
    }
}

/// Bytes reserved against an accountant, released when dropped.
///
/// This is the scoped-acquisition primitive used by operator buffers: once a
/// `Reservation` holds bytes, every exit path (success, error, cancellation)
/// gives them back exactly once.
#[derive(Debug)]
pub struct Reservation {
    bytes: i64,
    accountant: Arc<dyn MemoryAccountant>,
}

impl Reservation {
    /// An empty reservation that can grow later.
    pub fn empty(accountant: Arc<dyn MemoryAccountant>) -> Self {
        Self {
            bytes: 0,
            accountant,
        }
    }

    pub fn try_new(
        bytes: usize,
        accountant: Arc<dyn MemoryAccountant>,
    ) -> Result<Self, MemoryLimitExceeded> {
        let mut reservation = Self::empty(accountant);
        reservation.try_grow(bytes)?;
        Ok(reservation)
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn try_grow(&mut self, bytes: usize) -> Result<(), MemoryLimitExceeded> {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        if bytes == 0 {
            return Ok(());
        }
        self.accountant.reserve(bytes)?;
        self.bytes = self.bytes.saturating_add(bytes);
        Ok(())
    }

    /// Give back everything held so far; the reservation stays usable.
    pub fn clear(&mut self) {
        if self.bytes > 0 {
            self.accountant.release(self.bytes);
        }
        self.bytes = 0;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_consume_respects_limit_and_rolls_back_children() {
        let root = MemTracker::new_root_with_limit("root", 100);
        let child = MemTracker::new_child("child", &root);

        child.try_consume(60).expect("first reserve");
        let err = child.try_consume(50).expect_err("over limit");
        assert_eq!(err.label, "root");
        assert_eq!(err.used, 60);
        assert_eq!(child.current(), 60);
        assert_eq!(root.current(), 60);

        child.release(60);
        assert_eq!(root.current(), 0);
        assert_eq!(root.peak(), 60);
    }

    #[test]
    fn child_limit_rejects_before_parent_is_touched() {
        let root = MemTracker::new_root("root");
        let child = MemTracker::new_child_with_limit("child", 10, &root);
        assert!(child.try_consume(11).is_err());
        assert_eq!(root.current(), 0);
        assert_eq!(root.allocated(), 0);
    }

    #[test]
    fn reservation_releases_on_drop() {
        let root = MemTracker::new_root_with_limit("root", 64);
        let accountant: Arc<dyn MemoryAccountant> = root.clone();
        {
            let mut r = Reservation::try_new(32, Arc::clone(&accountant)).expect("reserve");
            r.try_grow(16).expect("grow");
            assert_eq!(root.current(), 48);
            assert!(r.try_grow(32).is_err());
            assert_eq!(r.bytes(), 48);
        }
        assert_eq!(root.current(), 0);
        assert_eq!(root.allocated(), root.deallocated());
    }

    #[test]
    fn children_are_listed_while_alive() {
        let root = MemTracker::new_root("root");
        let a = MemTracker::new_child("a", &root);
        {
            let _b = MemTracker::new_child("b", &root);
            assert_eq!(root.children().len(), 2);
        }
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].label(), a.label());
    }

    #[test]
    fn dropped_children_are_pruned_on_registration() {
        let root = MemTracker::new_root("root");
        let _kept = MemTracker::new_child("kept", &root);
        for i in 0..100 {
            let _short_lived = MemTracker::new_child(format!("driver-{i}"), &root);
        }
        let last = MemTracker::new_child("last", &root);
        let registered = root.children.lock().map(|c| c.len()).unwrap_or(usize::MAX);
        assert_eq!(registered, 2);
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.children()[1].label(), last.label());
    }
}
