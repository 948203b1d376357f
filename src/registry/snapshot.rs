//! Atomically replaced registry snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::registry::Endpoint;

/// Full `service name -> endpoints` mapping.
pub type Snapshot = HashMap<String, Vec<Endpoint>>;

/// Holder of the current snapshot.
///
/// Readers get an `Arc` to a complete snapshot and never observe a partially
/// written one. Writers replace the whole mapping; the last replace wins.
#[derive(Debug)]
pub struct SnapshotHolder {
    current: ArcSwap<Snapshot>,
}

impl SnapshotHolder {
    /// Create an empty holder.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, next: Snapshot) {
        self.current.store(Arc::new(next));
    }
}

impl Default for SnapshotHolder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(n: usize, port: u16) -> Snapshot {
        (0..n)
            .map(|i| (format!("svc-{i}"), vec![Endpoint::new("10.0.0.1", port)]))
            .collect()
    }

    #[test]
    fn test_replace_is_visible() {
        let holder = SnapshotHolder::new();
        assert!(holder.snapshot().is_empty());
        holder.replace(uniform(3, 80));
        assert_eq!(holder.snapshot().len(), 3);
    }

    #[test]
    fn test_old_snapshot_survives_replace() {
        let holder = SnapshotHolder::new();
        holder.replace(uniform(2, 80));
        let old = holder.snapshot();
        holder.replace(uniform(5, 81));
        assert_eq!(old.len(), 2);
        assert_eq!(holder.snapshot().len(), 5);
    }

    #[test]
    fn test_readers_never_see_mixed_snapshots() {
        let holder = Arc::new(SnapshotHolder::new());
        holder.replace(uniform(10, 1));

        let writer = {
            let holder = holder.clone();
            std::thread::spawn(move || {
                for round in 0..500u16 {
                    holder.replace(uniform(10, 2 + round % 2));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let holder = holder.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let snap = holder.snapshot();
                        let first = snap["svc-0"][0].port();
                        assert_eq!(snap.len(), 10);
                        assert!(snap.values().all(|eps| eps[0].port() == first));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
