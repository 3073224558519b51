//! Process identifier sets shared by every hook
//!
//! Reads happen on every intercepted call, writes only when a new process
//! gets block-listed, so a reader-writer lock fits.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use super::Pid;

/// Thread-safe, append-mostly set of pids
#[derive(Debug, Default)]
pub struct ProcessSet {
    inner: RwLock<HashSet<Pid>>,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        // A panic while holding the lock cannot leave a HashSet half-inserted
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pid)
    }

    /// Insert `pid`, returning true if it was not already present
    pub fn insert(&self, pid: Pid) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current members
    pub fn snapshot(&self) -> HashSet<Pid> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl FromIterator<Pid> for ProcessSet {
    fn from_iter<I: IntoIterator<Item = Pid>>(iter: I) -> Self {
        Self {
            inner: RwLock::new(iter.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_reports_novelty() {
        let set = ProcessSet::new();
        assert!(set.insert(10));
        assert!(!set.insert(10));
        assert!(set.contains(10));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let set = Arc::new(ProcessSet::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        set.insert(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), 800);
    }
}
