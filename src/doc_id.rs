//! Document identity.
//!
//! Every open document gets a process-unique numeric id. Page handles carry
//! it so that a page from one document is rejected by another. The counter
//! is the only state shared between documents; it is a plain atomic and can
//! be swapped for a private one in tests.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

lazy_static! {
    static ref GLOBAL_COUNTER: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
}

/// Source of document ids.
#[derive(Debug, Clone)]
pub struct DocumentIdSource {
    counter: Arc<AtomicU64>,
}

impl Default for DocumentIdSource {
    fn default() -> Self {
        Self::global()
    }
}

impl DocumentIdSource {
    /// The process-wide counter.
    pub fn global() -> Self {
        Self {
            counter: Arc::clone(&GLOBAL_COUNTER),
        }
    }

    /// A private counter whose first id is `start + 1`.
    pub fn isolated(start: u64) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Fetch-and-increment; ids start at 1.
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id handed out.
    pub fn last_id(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_counter_sequence() {
        let ids = DocumentIdSource::isolated(10);
        assert_eq!(ids.next_id(), 11);
        assert_eq!(ids.next_id(), 12);
        assert_eq!(ids.last_id(), 12);
    }

    #[test]
    fn test_clones_share_counter() {
        let a = DocumentIdSource::isolated(0);
        let b = a.clone();
        a.next_id();
        assert_eq!(b.next_id(), 2);
    }

    #[test]
    fn test_global_is_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| DocumentIdSource::global().next_id()))
            .collect();
        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
