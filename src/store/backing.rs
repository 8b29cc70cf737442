use crate::codec::CompressionConfig;
use crate::core::{BlobSet, CompressedBlobSet, KeySet};
use crate::error::Result;
use crate::store::DocumentStore;

/// 回源适配层：一次 batched visit 把 KeySet 读成 CompressedBlobSet。
///
/// 可能很慢（I/O），调用方不得持有缓存锁。
pub struct BackingStore<S> {
    store: S,
    compression: CompressionConfig,
}

impl<S: DocumentStore> BackingStore<S> {
    pub fn new(store: S, compression: CompressionConfig) -> Self {
        Self { store, compression }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn compression(&self) -> &CompressionConfig {
        &self.compression
    }

    pub fn read(&self, key: &KeySet) -> Result<CompressedBlobSet> {
        let mut collected = BlobSet::new();
        self.store.visit(key.ids(), &mut |id, payload| {
            // 空 payload 等同于不存在
            if !payload.is_empty() {
                collected.append(id, payload);
            }
        })?;

        tracing::trace!(
            "Visited {} ids, found {} ({} bytes)",
            key.len(),
            collected.len(),
            collected.buffer().len()
        );
        CompressedBlobSet::new(&self.compression, &collected)
    }
}
