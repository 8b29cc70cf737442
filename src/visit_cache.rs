use crate::cache::BoundedCompositeKeyCache;
use crate::config::VisitCacheConfig;
use crate::core::{CompressedBlobSet, KeySet};
use crate::error::{Error, Result};
use crate::stats::CacheStats;
use crate::store::{BackingStore, DocumentStore, MutableDocumentStore};

/// 文档 visit 缓存的对外入口：`read(ids)` / `remove(id)` / `stats()`。
///
/// 读路径：
/// 1) 空 ids 直接返回空结果，不碰缓存
/// 2) 精确命中时跳过重叠扫描
/// 3) 否则先失效被新 batch 覆盖的旧子集，再走 fetch-or-populate
pub struct VisitCache<S> {
    store: BackingStore<S>,
    cache: BoundedCompositeKeyCache,
}

impl<S: DocumentStore> VisitCache<S> {
    pub fn new(store: S, config: &VisitCacheConfig) -> Self {
        tracing::debug!(
            "VisitCache: capacity={} bytes, compression={}",
            config.capacity_bytes,
            config.compression.kind
        );
        Self {
            store: BackingStore::new(store, config.compression),
            cache: BoundedCompositeKeyCache::new(config.capacity_bytes),
        }
    }

    /// 调用方保证同一次扫描的 batch 只增长；与缓存部分重叠的 batch 直接 panic。
    pub fn read(&self, ids: &[u32]) -> Result<CompressedBlobSet> {
        match self.try_read(ids) {
            Err(e @ Error::BatchOverlap(_)) => panic!("{e}"),
            other => other,
        }
    }

    /// 给不受信任的调用方（HTTP）用：部分重叠返回 `Error::BatchOverlap`，缓存不变。
    pub fn try_read(&self, ids: &[u32]) -> Result<CompressedBlobSet> {
        let key = KeySet::from(ids);
        if key.is_empty() {
            return Ok(CompressedBlobSet::empty());
        }
        if !self.cache.has_key(&key) {
            self.cache.try_locate_and_invalidate_other_subsets(&key)?;
        }
        self.cache
            .fetch_or_populate(&key, |k| self.store.read(k))
    }

    /// 文档被更新/删除：丢弃覆盖它的缓存条目
    pub fn remove(&self, id: u32) {
        if self.cache.remove_key(id) {
            tracing::debug!("Dropped cached visit batch covering doc {}", id);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn store(&self) -> &S {
        self.store.store()
    }

    pub fn cache(&self) -> &BoundedCompositeKeyCache {
        &self.cache
    }
}

impl<S: MutableDocumentStore> VisitCache<S> {
    /// 先写存储，再失效覆盖该文档的缓存条目
    pub fn write(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.store.store().put(id, payload)?;
        self.remove(id);
        Ok(())
    }

    /// 从存储删除后失效缓存，返回文档是否存在过
    pub fn erase(&self, id: u32) -> Result<bool> {
        let existed = self.store.store().remove(id)?;
        self.remove(id);
        Ok(existed)
    }
}
