//! Session-scoped set of identities already signed in.

use crate::types::Identity;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct LedgerState {
    present: BTreeSet<Identity>,
    closed: bool,
}

/// Thread-safe, grow-only set of present identities.
///
/// All mutation goes through [`try_mark_present`](Self::try_mark_present),
/// which checks and inserts under one lock, so concurrent callers for the
/// same identity see exactly one `true`. The ledger lives for one session;
/// a restart starts empty.
#[derive(Default)]
pub struct SigninLedger {
    state: Mutex<LedgerState>,
}

impl SigninLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Every write is a single insert or flag store; poison carries no torn state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `identity` present. Returns `true` only on the absent → present
    /// transition; `false` if it was already present or the ledger is closed.
    pub fn try_mark_present(&self, identity: &Identity) -> bool {
        let mut state = self.lock();
        if state.closed {
            tracing::warn!(%identity, "sign-in after ledger closed; ignored");
            return false;
        }
        state.present.insert(identity.clone())
    }

    /// Read-only membership query. May be stale relative to a concurrent
    /// writer; only cosmetic labelling relies on it.
    pub fn is_present(&self, identity: &Identity) -> bool {
        self.lock().present.contains(identity)
    }

    /// Point-in-time copy of the present set, in identity order.
    pub fn snapshot(&self) -> BTreeSet<Identity> {
        self.lock().present.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().present.is_empty()
    }

    /// Freeze the ledger and return its final contents. Later
    /// `try_mark_present` calls are refused.
    pub fn close(&self) -> BTreeSet<Identity> {
        let mut state = self.lock();
        state.closed = true;
        state.present.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_first_mark_is_transition() {
        let ledger = SigninLedger::new();
        let alice = Identity::from("Alice");
        assert!(!ledger.is_present(&alice));
        assert!(ledger.try_mark_present(&alice));
        assert!(ledger.is_present(&alice));
    }

    #[test]
    fn test_repeat_marks_return_false() {
        let ledger = SigninLedger::new();
        let alice = Identity::from("Alice");
        assert!(ledger.try_mark_present(&alice));
        for _ in 0..10 {
            assert!(!ledger.try_mark_present(&alice));
        }
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let ledger = SigninLedger::new();
        assert!(ledger.try_mark_present(&"Alice".into()));
        assert!(ledger.try_mark_present(&"Bob".into()));
        assert!(!ledger.try_mark_present(&"Alice".into()));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let ledger = SigninLedger::new();
        ledger.try_mark_present(&"Carol".into());
        ledger.try_mark_present(&"Alice".into());
        let snap = ledger.snapshot();
        ledger.try_mark_present(&"Bob".into());

        let names: Vec<&str> = snap.iter().map(Identity::as_str).collect();
        assert_eq!(names, ["Alice", "Carol"]);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_concurrent_marks_single_winner() {
        const THREADS: usize = 16;
        let ledger = SigninLedger::new();
        let alice = Identity::from("Alice");
        let winners = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    if ledger.try_mark_present(&alice) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_marks_many_identities() {
        const THREADS: usize = 8;
        const IDENTITIES: usize = 50;
        let ledger = SigninLedger::new();
        let transitions = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    for i in 0..IDENTITIES {
                        if ledger.try_mark_present(&Identity::new(format!("student-{i}"))) {
                            transitions.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(transitions.load(Ordering::SeqCst), IDENTITIES);
        assert_eq!(ledger.len(), IDENTITIES);
    }

    #[test]
    fn test_closed_ledger_refuses_marks() {
        let ledger = SigninLedger::new();
        ledger.try_mark_present(&"Alice".into());
        let final_set = ledger.close();
        assert_eq!(final_set.len(), 1);
        assert!(ledger.is_closed());
        assert!(!ledger.try_mark_present(&"Bob".into()));
        assert!(!ledger.is_present(&"Bob".into()));
        assert_eq!(ledger.snapshot(), final_set);
    }
}
