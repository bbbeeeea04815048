//! Nodes of the hierarchical namespace.
//!
//! A level can be an inner node or a leaf and can hold data either way:
//! inner levels typically carry host-wide metrics while their children
//! carry the per-device breakdown. Every level has one readers-writer
//! lock covering both its metric slots and its children map; locks are
//! only ever taken root-to-leaf.

use crate::storage::buffer::BufferChain;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct LevelInner {
    /// One buffer chain slot per metric, indexed by the schema offset.
    pub(crate) metrics: Vec<Option<BufferChain>>,
    /// Lower levels, created lazily on first write.
    pub(crate) children: HashMap<String, Arc<Level>>,
}

/// A node in the level tree. Handles are shared: the ingest path caches
/// them to skip walking the top of the tree for every line.
pub struct Level {
    pub(crate) inner: RwLock<LevelInner>,
}

impl Level {
    pub(crate) fn new(num_metrics: usize) -> Arc<Level> {
        Arc::new(Level {
            inner: RwLock::new(LevelInner {
                metrics: (0..num_metrics).map(|_| None).collect(),
                children: HashMap::new(),
            }),
        })
    }

    /// Descend along `selector`, creating missing levels. The fast path
    /// only takes read locks; creation re-checks under the write lock
    /// because another writer may have raced us to it.
    pub(crate) fn find_level_or_create(
        self: &Arc<Self>,
        selector: &[&str],
        num_metrics: usize,
    ) -> Arc<Level> {
        if selector.is_empty() {
            return Arc::clone(self);
        }

        {
            let inner = self.inner.read();
            if let Some(child) = inner.children.get(selector[0]) {
                let child = Arc::clone(child);
                drop(inner);
                return child.find_level_or_create(&selector[1..], num_metrics);
            }
        }

        let child = {
            let mut inner = self.inner.write();
            Arc::clone(
                inner
                    .children
                    .entry(selector[0].to_string())
                    .or_insert_with(|| Level::new(num_metrics)),
            )
        };
        child.find_level_or_create(&selector[1..], num_metrics)
    }

    /// Descend along `selector` without creating anything.
    pub(crate) fn find_level(self: &Arc<Self>, selector: &[&str]) -> Option<Arc<Level>> {
        if selector.is_empty() {
            return Some(Arc::clone(self));
        }

        let child = {
            let inner = self.inner.read();
            Arc::clone(inner.children.get(selector[0])?)
        };
        child.find_level(&selector[1..])
    }

    /// Release all buffers below this level that only hold values older
    /// than `t`. Returns the number of buffers released.
    pub(crate) fn free(&self, t: i64) -> usize {
        let children: Vec<Arc<Level>>;
        let mut freed = 0;
        {
            let mut inner = self.inner.write();
            for slot in &mut inner.metrics {
                let emptied = match slot {
                    Some(chain) => {
                        freed += chain.free(t);
                        chain.is_empty()
                    },
                    None => false,
                };
                if emptied {
                    *slot = None;
                }
            }
            children = inner.children.values().cloned().collect();
        }

        for child in children {
            freed += child.free(t);
        }
        freed
    }

    /// Heap consumption of the samples below this level.
    pub(crate) fn size_in_bytes(&self) -> usize {
        let children: Vec<Arc<Level>>;
        let mut size = 0;
        {
            let inner = self.inner.read();
            for chain in inner.metrics.iter().flatten() {
                size += chain.sample_count() * std::mem::size_of::<crate::core::Float>();
            }
            children = inner.children.values().cloned().collect();
        }

        for child in children {
            size += child.size_in_bytes();
        }
        size
    }

    /// Snapshot of the child names at this level.
    pub(crate) fn child_names(&self) -> Vec<String> {
        self.inner.read().children.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let root = Level::new(2);
        let a = root.find_level_or_create(&["cluster", "host"], 2);
        let b = root.find_level_or_create(&["cluster", "host"], 2);
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(root.child_names(), vec!["cluster".to_string()]);
    }

    #[test]
    fn test_find_without_create() {
        let root = Level::new(1);
        assert!(root.find_level(&["nope"]).is_none());

        root.find_level_or_create(&["c", "h"], 1);
        assert!(root.find_level(&["c", "h"]).is_some());
        assert!(root.find_level(&["c", "other"]).is_none());
    }

    #[test]
    fn test_concurrent_creation() {
        let root = Level::new(1);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let root = Arc::clone(&root);
            handles.push(std::thread::spawn(move || {
                root.find_level_or_create(&["cluster", "host", "cpu0"], 1)
            }));
        }

        let levels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for level in &levels[1..] {
            assert!(Arc::ptr_eq(&levels[0], level));
        }
    }
}
