//! Per-container synchronization and snapshot discipline.
//!
//! Every container that has ever been assigned to a tracked field gets a
//! [`ContainerLock`] in the global [`ContainerLockTable`]. `enter`/`leave`
//! are called by every instrumented mutator; `enter_with_copies`/
//! `leave_with_copies` additionally snapshot containers the first time a
//! thread touches them inside one instrumented call, so a `Default`-kind
//! mutator can diff its before/after state.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chashmap::CHashMap;
use parking_lot::{Condvar, Mutex};
use thread_local::ThreadLocal;

use crate::identity::IdentityKey;
use crate::multiset::{delta, DeltaEntry, Multiset};

/// Which thread currently holds the container's cross-thread exclusion, if
/// any. A plain `Option<ThreadId>` rather than an owned guard object: the
/// guard would need to live across the separate `enter` and `leave` calls
/// an instrumented method makes, and no Rust lock type hands out a guard
/// detached from the borrow that produced it.
struct Holder {
    owner: Option<ThreadId>,
}

/// A reentrant lock plus a per-thread entry counter. Reentrancy is layered
/// on `Holder` plus a condition variable rather than a single non-reentrant
/// mutex: the depth counter, kept per-thread so nested calls from the same
/// thread never block each other, decides whether this call is the
/// outermost one, and only the outermost entry/exit actually waits on or
/// releases `holder`.
pub struct ContainerLock {
    holder: Mutex<Holder>,
    released: Condvar,
    depth: ThreadLocal<Cell<u32>>,
}

impl Default for ContainerLock {
    fn default() -> Self {
        ContainerLock::new()
    }
}

impl ContainerLock {
    pub fn new() -> Self {
        ContainerLock {
            holder: Mutex::new(Holder { owner: None }),
            released: Condvar::new(),
            depth: ThreadLocal::new(),
        }
    }

    fn depth_cell(&self) -> &Cell<u32> {
        self.depth.get_or(|| Cell::new(0))
    }

    /// Enters the container. If `synchronize` is true and this thread is
    /// not already inside the lock, blocks until no other thread holds it.
    /// Returns whether this call is the outermost instrumented call on this
    /// container from the current thread.
    pub fn enter(&self, synchronize: bool) -> bool {
        let cell = self.depth_cell();
        let depth = cell.get();
        if synchronize && depth == 0 {
            let this_thread = thread::current().id();
            let mut holder = self.holder.lock();
            while holder.owner.is_some() {
                self.released.wait(&mut holder);
            }
            holder.owner = Some(this_thread);
        }
        cell.set(depth + 1);
        depth == 0
    }

    /// Leaves the container, releasing cross-thread exclusion once the
    /// counter returns to zero.
    pub fn leave(&self, synchronize: bool) {
        let cell = self.depth_cell();
        let depth = cell.get().saturating_sub(1);
        cell.set(depth);
        if synchronize && depth == 0 {
            let mut holder = self.holder.lock();
            holder.owner = None;
            drop(holder);
            self.released.notify_one();
        }
    }
}

/// The process-wide table of [`ContainerLock`]s, keyed by container
/// identity. Entries are created lazily the first time a container is seen
/// and are never removed; the lock itself is cheap to keep around even
/// after `clear_history` forgets the container's modifications.
pub struct ContainerLockTable {
    locks: CHashMap<IdentityKey, Arc<ContainerLock>>,
}

impl Default for ContainerLockTable {
    fn default() -> Self {
        ContainerLockTable::new()
    }
}

impl ContainerLockTable {
    pub fn new() -> Self {
        ContainerLockTable {
            locks: CHashMap::new(),
        }
    }

    pub fn lock_for(&self, container: &IdentityKey) -> Arc<ContainerLock> {
        self.locks
            .upsert(container.clone(), || Arc::new(ContainerLock::new()), |_| {});
        self.locks
            .get(container)
            .expect("just upserted")
            .clone()
    }

    pub fn enter(&self, container: &IdentityKey, synchronize: bool) -> bool {
        self.lock_for(container).enter(synchronize)
    }

    pub fn leave(&self, container: &IdentityKey, synchronize: bool) {
        self.lock_for(container).leave(synchronize);
    }

    /// Field-owner/nestmate role helper: on the outermost entry for
    /// `container` within the current instrumented call, snapshots it into
    /// `copies` via `snapshot`.
    pub fn enter_with_copies<F: FnOnce() -> Multiset>(
        &self,
        container: IdentityKey,
        copies: &mut HashMap<IdentityKey, Multiset>,
        snapshot: F,
    ) {
        if self.enter(&container, true) {
            copies.insert(container, snapshot());
        }
    }

    /// Drains every entry snapshotted by `enter_with_copies` during this
    /// call, diffs each against its current contents (obtained via
    /// `after_snapshot`), and releases the corresponding lock.
    pub fn leave_with_copies<F: FnMut(&IdentityKey) -> Multiset>(
        &self,
        copies: &mut HashMap<IdentityKey, Multiset>,
        mut after_snapshot: F,
    ) -> Vec<(IdentityKey, Vec<DeltaEntry>)> {
        let mut results = Vec::with_capacity(copies.len());
        for (container, before) in copies.drain() {
            let after = after_snapshot(&container);
            results.push((container.clone(), delta(&before, &after)));
            self.leave(&container, true);
        }
        results
    }
}
