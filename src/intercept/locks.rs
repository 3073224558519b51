//! Path-scoped locks for namespace operations
//!
//! rename and unlink have no open handle to serialize on, so they lock the
//! path instead. A fixed table of stripes keeps memory bounded; two paths
//! may share a stripe, which only costs some parallelism.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const STRIPES: usize = 64;

pub struct PathLocks {
    stripes: Vec<Mutex<()>>,
}

/// Held while an operation on one or two paths is in flight
pub struct PathGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index(path: &Path) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() as usize) % STRIPES
    }

    fn acquire(&self, index: usize) -> MutexGuard<'_, ()> {
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        PathGuard {
            _first: self.acquire(Self::index(path)),
            _second: None,
        }
    }

    /// Lock two paths, always in stripe order so concurrent renames in
    /// opposite directions cannot deadlock
    pub fn lock_pair(&self, a: &Path, b: &Path) -> PathGuard<'_> {
        let (ia, ib) = (Self::index(a), Self::index(b));
        if ia == ib {
            return PathGuard {
                _first: self.acquire(ia),
                _second: None,
            };
        }
        let (low, high) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let first = self.acquire(low);
        let second = self.acquire(high);
        PathGuard {
            _first: first,
            _second: Some(second),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_same_path_pair_does_not_self_deadlock() {
        let locks = PathLocks::new();
        let _guard = locks.lock_pair(Path::new("a"), Path::new("a"));
    }

    #[test]
    fn test_opposite_renames_finish() {
        let locks = Arc::new(PathLocks::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = Arc::clone(&locks);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let _g = if i % 2 == 0 {
                            locks.lock_pair(Path::new("left.txt"), Path::new("right.txt"))
                        } else {
                            locks.lock_pair(Path::new("right.txt"), Path::new("left.txt"))
                        };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
