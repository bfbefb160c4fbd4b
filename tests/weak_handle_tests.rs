//! Integration tests for weak handles crossing threads
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use framehost::{Signal, WeakHandle, WeakHandleFactory, WeakOwner};
use pretty_assertions::assert_eq;

struct Document {
    revision: u32,
    weak: WeakHandleFactory<Document>,
}

impl Document {
    fn new(revision: u32) -> Self {
        Self {
            revision,
            weak: WeakHandleFactory::new(),
        }
    }

    fn handle(&self) -> WeakHandle<Document> {
        self.weak.make_handle()
    }
}

impl WeakOwner for Document {
    fn weak_factory(&self) -> &WeakHandleFactory<Self> {
        &self.weak
    }
}

#[test]
fn test_background_thread_observes_owner_drop() {
    let document = Document::new(1);
    let handle = document.handle();
    let dropped = std::sync::Arc::new(Signal::new());
    let (before_tx, before_rx) = mpsc::channel();
    let (after_tx, after_rx) = mpsc::channel();

    let remote = handle.clone();
    let waiter = std::sync::Arc::clone(&dropped);
    let worker = thread::spawn(move || {
        before_tx.send(remote.is_gone()).unwrap();
        waiter.wait();
        after_tx.send(remote.is_gone()).unwrap();
    });

    // The owner must outlive the worker's first look.
    let before = before_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!before);

    drop(document);
    dropped.set_and_notify();
    worker.join().unwrap();

    assert!(after_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(handle.is_gone());
}

#[test]
fn test_continuation_from_old_owner_skips_replacement() {
    let old = Document::new(1);
    let handle = old.handle();
    drop(old);

    // A replacement built at the same place is a different owner.
    let mut replacement = Document::new(2);
    assert!(handle.resolve(&mut replacement).is_none());

    let fresh = replacement.handle();
    let resolved = fresh.resolve(&mut replacement).map(|doc| doc.revision);
    assert_eq!(resolved, Some(2));
}

#[test]
fn test_handles_cloned_across_threads_share_liveness() {
    let mut document = Document::new(7);
    let handles: Vec<_> = (0..4).map(|_| document.handle()).collect();
    let checks: Vec<_> = handles
        .into_iter()
        .map(|h| thread::spawn(move || h.is_gone()))
        .collect();
    for check in checks {
        assert!(!check.join().unwrap());
    }

    let survivor = document.handle();
    document.weak.invalidate();
    assert!(survivor.is_gone());
    assert!(survivor.resolve(&mut document).is_none());
}

#[test]
fn test_resolve_off_owner_thread_panics() {
    let document = Document::new(3);
    let handle = document.handle();
    let result = thread::spawn(move || {
        let mut stranger = Document::new(4);
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle.resolve(&mut stranger).is_some()
        }))
        .is_err()
    })
    .join()
    .unwrap();
    assert!(result);
    drop(document);
}
