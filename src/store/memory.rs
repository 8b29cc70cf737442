use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::store::{DocumentStore, MutableDocumentStore};

/// 内存文档存储（DashMap 实现）
///
/// 记录 visit 调用次数，便于观察缓存是否真的回源；
/// `set_failing(true)` 可模拟存储故障。
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<u32, Vec<u8>>,
    visits: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, B>(docs: I) -> Self
    where
        I: IntoIterator<Item = (u32, B)>,
        B: AsRef<[u8]>,
    {
        let store = Self::new();
        for (id, body) in docs {
            store.docs.insert(id, body.as_ref().to_vec());
        }
        store
    }

    /// 累计 visit 次数
    pub fn visit_count(&self) -> u64 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn visit(&self, ids: &[u32], visitor: &mut dyn FnMut(u32, &[u8])) -> Result<()> {
        self.visits.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Store("memory store is in failing mode".into()));
        }
        for &id in ids {
            if let Some(body) = self.docs.get(&id) {
                visitor(id, body.value().as_slice());
            }
        }
        Ok(())
    }
}

impl MutableDocumentStore for MemoryStore {
    fn put(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.docs.insert(id, payload.to_vec());
        Ok(())
    }

    fn remove(&self, id: u32) -> Result<bool> {
        Ok(self.docs.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_skips_missing_and_counts_calls() {
        let store = MemoryStore::with_documents([(1, "one"), (3, "three")]);
        let mut seen = Vec::new();
        store
            .visit(&[1, 2, 3], &mut |id, body| seen.push((id, body.to_vec())))
            .unwrap();
        assert_eq!(seen, vec![(1, b"one".to_vec()), (3, b"three".to_vec())]);
        assert_eq!(store.visit_count(), 1);
    }

    #[test]
    fn failing_mode_returns_store_error() {
        let store = MemoryStore::with_documents([(1, "one")]);
        store.set_failing(true);
        let err = store.visit(&[1], &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn put_and_remove() {
        let store = MemoryStore::new();
        store.put(7, b"seven").unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.remove(7).unwrap());
        assert!(!store.remove(7).unwrap());
        assert!(store.is_empty());
    }
}
