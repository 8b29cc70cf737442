use std::collections::HashMap;

use parking_lot::Mutex;

use crate::cache::lru::ByteLru;
use crate::cache::subset_index::SubsetIndex;
use crate::core::{CompressedBlobSet, KeySet};
use crate::error::{Error, Result};
use crate::stats::CacheStats;

fn entry_size(value: &CompressedBlobSet) -> usize {
    value.size()
}

/// 锁内状态：map、反查索引、字节总量与计数器总是在同一临界区内一起修改
struct CacheState {
    lru: ByteLru<KeySet, CompressedBlobSet>,
    index: SubsetIndex,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
    /// 正在锁外回源的 key；remove_key 命中其中的 id 时标记为 stale
    in_flight: HashMap<u64, InFlight>,
    next_ticket: u64,
}

struct InFlight {
    key: KeySet,
    stale: bool,
}

impl CacheState {
    fn invalidate(&mut self, key: &KeySet) -> bool {
        if self.lru.remove(key, &mut self.index).is_some() {
            self.invalidations += 1;
            tracing::debug!("Invalidated cached key set {:?}", key);
            true
        } else {
            false
        }
    }

    /// 回源结果重新加锁后的插入路径
    fn insert_populated(
        &mut self,
        key: &KeySet,
        value: CompressedBlobSet,
        stale: bool,
    ) -> CompressedBlobSet {
        // 并发回源同一个 key：保留先插入的值，丢弃本次结果
        if let Some(existing) = self.lru.peek(key) {
            tracing::debug!("Concurrent populate of {:?} lost the race, discarding", key);
            return existing.clone();
        }
        if value.is_empty() {
            return value;
        }
        if stale {
            tracing::debug!("Document removed while populating {:?}, not caching", key);
            return value;
        }

        // 锁外回源期间别的线程可能插入了重叠的 key，这里再查一次，保证缓存条目两两不相交
        let mut covered = Vec::new();
        for rep in self.index.find_sets_containing(key) {
            let Some(old) = self.index.key_set_for_representative(rep) else {
                continue;
            };
            if old.contains(key) {
                // 更大的 batch 已经在缓存里，本次结果只返回不缓存
                return value;
            }
            assert!(
                key.contains(old),
                "visit batch {:?} partially overlaps cached batch {:?}",
                key,
                old
            );
            covered.push(old.clone());
        }
        for old in &covered {
            self.invalidate(old);
        }

        let evicted = self.lru.insert(key.clone(), value.clone(), &mut self.index);
        if !evicted.is_empty() {
            self.evictions += evicted.len() as u64;
            tracing::debug!(
                "Evicted {} key set(s), {} / {} bytes in use",
                evicted.len(),
                self.lru.total_bytes(),
                self.lru.capacity()
            );
        }
        value
    }
}

/// 以 KeySet 为复合 key、按字节预算 LRU 淘汰的缓存。
///
/// 一把 `parking_lot::Mutex` 守护全部状态；回源（`populate`）在锁外执行。
pub struct BoundedCompositeKeyCache {
    state: Mutex<CacheState>,
}

impl BoundedCompositeKeyCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                lru: ByteLru::new(capacity_bytes, entry_size),
                index: SubsetIndex::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                invalidations: 0,
                in_flight: HashMap::new(),
                next_ticket: 0,
            }),
        }
    }

    /// 仅查询是否存在，不影响命中计数与 LRU 顺序
    pub fn has_key(&self, key: &KeySet) -> bool {
        self.state.lock().lru.contains(key)
    }

    /// 命中直接返回；未命中在锁外调用 `populate`，再加锁插入。
    ///
    /// `populate` 失败时什么也不缓存，错误原样返回。
    pub fn fetch_or_populate<F>(&self, key: &KeySet, populate: F) -> Result<CompressedBlobSet>
    where
        F: FnOnce(&KeySet) -> Result<CompressedBlobSet>,
    {
        let ticket = {
            let mut st = self.state.lock();
            if let Some(v) = st.lru.get(key).cloned() {
                st.hits += 1;
                return Ok(v);
            }
            st.misses += 1;
            st.next_ticket += 1;
            let ticket = st.next_ticket;
            st.in_flight.insert(
                ticket,
                InFlight {
                    key: key.clone(),
                    stale: false,
                },
            );
            ticket
        };

        let populated = populate(key);

        let mut st = self.state.lock();
        let stale = st.in_flight.remove(&ticket).is_some_and(|f| f.stale);
        Ok(st.insert_populated(key, populated?, stale))
    }

    /// 失效所有与 `keys` 共享 id 的缓存条目（必须是 `keys` 的子集）。
    ///
    /// 调用方契约：同一次扫描的 visit batch 只增长，因此最多找到一个条目，
    /// 且它被 `keys` 完全覆盖。违反契约直接 panic。
    pub fn locate_and_invalidate_other_subsets(&self, keys: &KeySet) {
        if let Err(e) = self.try_locate_and_invalidate_other_subsets(keys) {
            panic!("{e}");
        }
    }

    /// 同上，但违约时返回 `Error::BatchOverlap` 而不是 panic，缓存保持不变。
    pub fn try_locate_and_invalidate_other_subsets(&self, keys: &KeySet) -> Result<()> {
        let mut st = self.state.lock();
        let found = st.index.find_sets_containing(keys);
        if found.len() > 1 {
            return Err(Error::BatchOverlap(format!(
                "visit batch {:?} overlaps {} cached batches",
                keys,
                found.len()
            )));
        }
        let Some(rep) = found.into_iter().next() else {
            return Ok(());
        };
        let Some(old) = st.index.key_set_for_representative(rep).cloned() else {
            return Ok(());
        };
        if !keys.contains(&old) {
            return Err(Error::BatchOverlap(format!(
                "visit batch {:?} partially overlaps cached batch {:?}",
                keys, old
            )));
        }
        st.invalidate(&old);
        Ok(())
    }

    /// 失效覆盖 `id` 的条目（文档被更新/删除时调用）。返回是否失效了条目。
    pub fn remove_key(&self, id: u32) -> bool {
        let mut st = self.state.lock();
        for f in st.in_flight.values_mut() {
            if f.key.contains_id(id) {
                f.stale = true;
            }
        }
        let Some(key) = st.index.key_set_of(id).cloned() else {
            return false;
        };
        st.invalidate(&key)
    }

    pub fn invalidate(&self, key: &KeySet) -> bool {
        self.state.lock().invalidate(key)
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        CacheStats {
            hits: st.hits,
            misses: st.misses,
            entry_count: st.lru.len(),
            total_bytes: st.lru.total_bytes(),
            capacity_bytes: st.lru.capacity(),
            evictions: st.evictions,
            invalidations: st.invalidations,
        }
    }

    /// 当前缓存的 KeySet，最久未用在前
    pub fn keys(&self) -> Vec<KeySet> {
        self.state.lock().lru.keys_by_recency().cloned().collect()
    }

    /// 校验代表映射、条目不相交以及 map 与索引的一致性
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let st = self.state.lock();
        st.index.check_invariants()?;
        if st.index.entry_count() != st.lru.len() {
            return Err(format!(
                "index tracks {} key sets but cache holds {}",
                st.index.entry_count(),
                st.lru.len()
            ));
        }
        for key in st.lru.keys_by_recency() {
            let rep = key.representative();
            if rep.and_then(|r| st.index.key_set_for_representative(r)) != Some(key) {
                return Err(format!("cached {key:?} missing from index"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionConfig;
    use crate::core::BlobSet;
    use crate::error::Error;

    fn blobs_for(key: &KeySet, payload_len: usize) -> CompressedBlobSet {
        let mut b = BlobSet::new();
        for &id in key.ids() {
            b.append(id, &vec![id as u8; payload_len]);
        }
        CompressedBlobSet::new(&CompressionConfig::uncompressed(), &b).unwrap()
    }

    fn populate_ok(len: usize) -> impl Fn(&KeySet) -> Result<CompressedBlobSet> {
        move |k| Ok(blobs_for(k, len))
    }

    #[test]
    fn miss_then_hit() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([5, 9, 12]);

        let first = cache.fetch_or_populate(&key, populate_ok(4)).unwrap();
        let second = cache
            .fetch_or_populate(&key, |_| panic!("must be served from cache"))
            .unwrap();
        assert_eq!(first, second);

        let s = cache.stats();
        assert_eq!((s.hits, s.misses, s.entry_count), (1, 1, 1));
        assert_eq!(s.total_bytes, first.size());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn has_key_does_not_touch_counters() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        assert!(!cache.has_key(&key));
        cache.fetch_or_populate(&key, populate_ok(1)).unwrap();
        assert!(cache.has_key(&key));
        assert_eq!(cache.stats().lookups(), 1);
    }

    #[test]
    fn populate_failure_caches_nothing() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1]);
        let err = cache
            .fetch_or_populate(&key, |_| Err(Error::Store("disk on fire".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(!cache.has_key(&key));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn empty_result_is_not_cached() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        let v = cache
            .fetch_or_populate(&key, |_| Ok(CompressedBlobSet::empty()))
            .unwrap();
        assert!(v.is_empty());
        assert!(!cache.has_key(&key));
    }

    #[test]
    fn superset_request_invalidates_cached_subset() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let small = KeySet::new([1, 2]);
        let big = KeySet::new([1, 2, 3]);
        cache.fetch_or_populate(&small, populate_ok(2)).unwrap();

        cache.locate_and_invalidate_other_subsets(&big);
        assert!(!cache.has_key(&small));
        cache.fetch_or_populate(&big, populate_ok(2)).unwrap();

        assert_eq!(cache.keys(), vec![big]);
        assert_eq!(cache.stats().invalidations, 1);
        cache.check_invariants().unwrap();
    }

    #[test]
    #[should_panic(expected = "partially overlaps")]
    fn partial_overlap_is_a_contract_violation() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        cache
            .fetch_or_populate(&KeySet::new([1, 2]), populate_ok(1))
            .unwrap();
        cache.locate_and_invalidate_other_subsets(&KeySet::new([2, 3]));
    }

    #[test]
    #[should_panic(expected = "overlaps 2 cached batches")]
    fn two_overlapping_entries_is_a_contract_violation() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        cache
            .fetch_or_populate(&KeySet::new([1]), populate_ok(1))
            .unwrap();
        cache
            .fetch_or_populate(&KeySet::new([2]), populate_ok(1))
            .unwrap();
        cache.locate_and_invalidate_other_subsets(&KeySet::new([1, 2]));
    }

    #[test]
    fn remove_key_drops_covering_entry() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([5, 9, 12]);
        cache.fetch_or_populate(&key, populate_ok(3)).unwrap();

        assert!(!cache.remove_key(100));
        assert!(cache.remove_key(9));
        assert!(!cache.has_key(&key));
        assert_eq!(cache.stats().total_bytes, 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn remove_during_populate_is_not_cached() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        let v = cache
            .fetch_or_populate(&key, |k| {
                // 模拟回源期间文档被更新
                cache.remove_key(2);
                Ok(blobs_for(k, 1))
            })
            .unwrap();
        assert_eq!(v.len(), 2);
        assert!(!cache.has_key(&key));
    }

    #[test]
    fn unrelated_remove_during_populate_still_caches() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        cache
            .fetch_or_populate(&key, |k| {
                cache.remove_key(500);
                Ok(blobs_for(k, 1))
            })
            .unwrap();
        assert!(cache.has_key(&key));

        cache
            .fetch_or_populate(&key, |_| panic!("must be served from cache"))
            .unwrap();
        assert_eq!((cache.stats().hits, cache.stats().misses), (1, 1));
    }

    #[test]
    fn failed_populate_releases_in_flight_slot() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        cache
            .fetch_or_populate(&key, |_| Err(Error::Store("timeout".into())))
            .unwrap_err();
        assert!(cache.state.lock().in_flight.is_empty());
    }

    #[test]
    fn try_variant_reports_overlap_without_touching_cache() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let cached = KeySet::new([5, 9, 12]);
        cache.fetch_or_populate(&cached, populate_ok(1)).unwrap();

        let err = cache
            .try_locate_and_invalidate_other_subsets(&KeySet::new([5, 9]))
            .unwrap_err();
        assert!(matches!(err, Error::BatchOverlap(_)));
        assert!(cache.has_key(&cached));
        assert_eq!(cache.stats().invalidations, 0);

        cache
            .try_locate_and_invalidate_other_subsets(&KeySet::new([5, 9, 12, 13]))
            .unwrap();
        assert!(!cache.has_key(&cached));
    }

    #[test]
    fn racing_populate_keeps_first_value() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let key = KeySet::new([1, 2]);
        let v = cache
            .fetch_or_populate(&key, |k| {
                // 另一个线程抢先插入了同一个 key
                cache.fetch_or_populate(k, populate_ok(8)).unwrap();
                Ok(blobs_for(k, 1))
            })
            .unwrap();
        assert_eq!(v, blobs_for(&key, 8));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn racing_superset_wins_over_subset() {
        let cache = BoundedCompositeKeyCache::new(1 << 20);
        let small = KeySet::new([1, 2]);
        let big = KeySet::new([1, 2, 3]);
        let v = cache
            .fetch_or_populate(&small, |k| {
                cache.fetch_or_populate(&big, populate_ok(1)).unwrap();
                Ok(blobs_for(k, 1))
            })
            .unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(cache.keys(), vec![big]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn eviction_respects_byte_budget_and_keeps_mru() {
        let one = blobs_for(&KeySet::new([1]), 100).size();
        let cache = BoundedCompositeKeyCache::new(one * 3);

        for id in 1..=3u32 {
            cache
                .fetch_or_populate(&KeySet::single(id), populate_ok(100))
                .unwrap();
        }
        // 访问 1，使 2 成为最久未用
        cache
            .fetch_or_populate(&KeySet::single(1), populate_ok(100))
            .unwrap();
        cache
            .fetch_or_populate(&KeySet::single(4), populate_ok(100))
            .unwrap();

        let s = cache.stats();
        assert!(s.total_bytes <= one * 3);
        assert_eq!(s.evictions, 1);
        assert_eq!(
            cache.keys(),
            vec![KeySet::single(3), KeySet::single(1), KeySet::single(4)]
        );
        cache.check_invariants().unwrap();
    }
}
