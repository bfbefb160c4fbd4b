//! Weak handles that detect the destruction of their owner.
//!
//! A [`WeakHandleFactory`] lives inside the owning object. Handles minted by
//! it are cheap to clone and may be moved to any thread; a background thread
//! can ask whether the owner is gone, but only the thread that created the
//! factory may turn a handle back into a reference to the owner.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

/// Shared liveness cell between a factory and its handles
struct HandleCell {
    alive: AtomicBool,
    owner_thread: ThreadId,
}

/// Objects that hand out weak handles to themselves
pub trait WeakOwner: Sized {
    /// The factory embedded in this object
    fn weak_factory(&self) -> &WeakHandleFactory<Self>;
}

/// Mints [`WeakHandle`]s for one owner and invalidates them when dropped.
pub struct WeakHandleFactory<T> {
    /// Allocated on the first `make_handle` call
    cell: OnceLock<Arc<HandleCell>>,
    owner_thread: ThreadId,
    _owner: PhantomData<fn() -> T>,
}

impl<T> WeakHandleFactory<T> {
    /// Create a factory owned by the current thread
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            owner_thread: thread::current().id(),
            _owner: PhantomData,
        }
    }

    /// Mint a handle that shares this factory's liveness cell
    pub fn make_handle(&self) -> WeakHandle<T> {
        let cell = self.cell.get_or_init(|| {
            Arc::new(HandleCell {
                alive: AtomicBool::new(true),
                owner_thread: self.owner_thread,
            })
        });
        WeakHandle {
            cell: Arc::clone(cell),
            _owner: PhantomData,
        }
    }

    /// Whether any handle has been minted since the last invalidation
    pub fn has_handles(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Mark every outstanding handle as gone.
    ///
    /// Handles minted afterwards are live again and unrelated to the old ones.
    pub fn invalidate(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.alive.store(false, Ordering::Release);
        }
    }

    fn owns(&self, cell: &Arc<HandleCell>) -> bool {
        matches!(self.cell.get(), Some(own) if Arc::ptr_eq(own, cell))
    }
}

impl<T> Default for WeakHandleFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for WeakHandleFactory<T> {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl<T> fmt::Debug for WeakHandleFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandleFactory")
            .field("has_handles", &self.has_handles())
            .field("owner_thread", &self.owner_thread)
            .finish()
    }
}

/// A non-owning reference to a [`WeakOwner`].
///
/// Resolving checks that the owner is still alive and that the candidate
/// object is the same owner that minted the handle, so a continuation that
/// outlives a reload resolves to `None` against the replacement object.
pub struct WeakHandle<T> {
    cell: Arc<HandleCell>,
    _owner: PhantomData<fn() -> T>,
}

impl<T> WeakHandle<T> {
    /// Whether the owner has been destroyed. Safe on any thread.
    pub fn is_gone(&self) -> bool {
        !self.cell.alive.load(Ordering::Acquire)
    }

    fn assert_owner_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.cell.owner_thread,
            "weak handle resolved off its owning thread"
        );
    }
}

impl<T: WeakOwner> WeakHandle<T> {
    /// Resolve against `candidate`, yielding it only if it is the live owner.
    ///
    /// # Panics
    ///
    /// Panics when called on a thread other than the owner's.
    pub fn resolve<'a>(&self, candidate: &'a mut T) -> Option<&'a mut T> {
        self.assert_owner_thread();
        if self.is_gone() || !candidate.weak_factory().owns(&self.cell) {
            return None;
        }
        Some(candidate)
    }

    /// Shared-reference variant of [`WeakHandle::resolve`]
    pub fn resolve_ref<'a>(&self, candidate: &'a T) -> Option<&'a T> {
        self.assert_owner_thread();
        if self.is_gone() || !candidate.weak_factory().owns(&self.cell) {
            return None;
        }
        Some(candidate)
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _owner: PhantomData,
        }
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("gone", &self.is_gone())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Owner {
        value: u32,
        weak: WeakHandleFactory<Owner>,
    }

    impl Owner {
        fn new(value: u32) -> Self {
            Self {
                value,
                weak: WeakHandleFactory::new(),
            }
        }
    }

    impl WeakOwner for Owner {
        fn weak_factory(&self) -> &WeakHandleFactory<Self> {
            &self.weak
        }
    }

    #[test]
    fn test_resolve_live_owner() {
        let mut owner = Owner::new(7);
        let handle = owner.weak.make_handle();
        assert!(!handle.is_gone());
        let resolved = handle.resolve(&mut owner).map(|o| o.value);
        assert_eq!(resolved, Some(7));
    }

    #[test]
    fn test_handles_share_one_cell() {
        let owner = Owner::new(1);
        assert!(!owner.weak.has_handles());
        let a = owner.weak.make_handle();
        let b = a.clone();
        let c = owner.weak.make_handle();
        assert!(owner.weak.has_handles());
        assert!(a.resolve_ref(&owner).is_some());
        assert!(b.resolve_ref(&owner).is_some());
        assert!(c.resolve_ref(&owner).is_some());
    }

    #[test]
    fn test_dropping_owner_invalidates() {
        let owner = Owner::new(1);
        let handle = owner.weak.make_handle();
        drop(owner);
        assert!(handle.is_gone());
    }

    #[test]
    fn test_replacement_owner_does_not_resolve_stale_handle() {
        let mut owner = Owner::new(1);
        let stale = owner.weak.make_handle();
        owner = Owner::new(2);
        assert!(stale.is_gone());
        assert!(stale.resolve(&mut owner).is_none());
        let fresh = owner.weak.make_handle();
        assert_eq!(fresh.resolve(&mut owner).map(|o| o.value), Some(2));
    }

    #[test]
    fn test_foreign_live_owner_is_rejected() {
        let first = Owner::new(1);
        let mut second = Owner::new(2);
        let handle = first.weak.make_handle();
        let _other = second.weak.make_handle();
        assert!(handle.resolve(&mut second).is_none());
    }

    #[test]
    fn test_invalidate_then_mint_again() {
        let mut owner = Owner::new(3);
        let old = owner.weak.make_handle();
        owner.weak.invalidate();
        assert!(old.is_gone());
        assert!(old.resolve(&mut owner).is_none());
        let new = owner.weak.make_handle();
        assert!(new.resolve(&mut owner).is_some());
    }

    #[test]
    fn test_gone_is_visible_from_other_thread() {
        let owner = Owner::new(1);
        let handle = owner.weak.make_handle();
        drop(owner);
        let seen = std::thread::spawn(move || handle.is_gone()).join().unwrap();
        assert!(seen);
    }

    #[test]
    #[should_panic(expected = "owning thread")]
    fn test_resolve_off_thread_panics() {
        let owner = Owner::new(1);
        let handle = owner.weak.make_handle();
        let result = std::thread::spawn(move || {
            let mut other = Owner::new(2);
            handle.resolve(&mut other).is_some()
        })
        .join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }
}
