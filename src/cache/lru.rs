use std::hash::Hash;

use lru::LruCache;

/// 插入/移除钩子：让上层在同一把锁内维护辅助索引
pub trait LruHooks<K> {
    fn on_insert(&mut self, key: &K);
    fn on_remove(&mut self, key: &K);
}

/// 不需要辅助索引时的空钩子
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<K> LruHooks<K> for NoHooks {
    fn on_insert(&mut self, _key: &K) {}
    fn on_remove(&mut self, _key: &K) {}
}

/// 按字节预算淘汰的 LRU。
///
/// - 底层是不限条数的 `lru::LruCache`，value 旁边记下它的记账大小
/// - 记账大小由构造时给的 `sizer` 计算，淘汰只看字节总量
/// - 本身不加锁：由持有者放进自己的 guarded state 里
pub struct ByteLru<K: Hash + Eq, V> {
    map: LruCache<K, (V, usize)>,
    total_bytes: usize,
    capacity: usize,
    sizer: fn(&V) -> usize,
}

impl<K: Hash + Eq + Clone, V> ByteLru<K, V> {
    pub fn new(capacity: usize, sizer: fn(&V) -> usize) -> Self {
        Self {
            map: LruCache::unbounded(),
            total_bytes: 0,
            capacity,
            sizer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains(key)
    }

    /// 读取但不改变近期使用顺序
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.peek(key).map(|(v, _)| v)
    }

    /// 读取并标记为最近使用
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.map.get(key).map(|(v, _)| &*v)
    }

    /// 插入（已存在则先移除旧值），随后按 LRU 淘汰直到回到预算内，
    /// 或只剩刚插入的这一条。返回被淘汰的 key（从旧到新）。
    pub fn insert<H: LruHooks<K>>(&mut self, key: K, value: V, hooks: &mut H) -> Vec<K> {
        self.remove(&key, hooks);

        let size = (self.sizer)(&value);
        hooks.on_insert(&key);
        self.map.put(key, (value, size));
        self.total_bytes += size;

        let mut evicted = Vec::new();
        while self.total_bytes > self.capacity && self.map.len() > 1 {
            let Some((oldest, (_, size))) = self.map.pop_lru() else {
                break;
            };
            self.total_bytes -= size;
            hooks.on_remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    pub fn remove<H: LruHooks<K>>(&mut self, key: &K, hooks: &mut H) -> Option<V> {
        let (value, size) = self.map.pop(key)?;
        self.total_bytes -= size;
        hooks.on_remove(key);
        Some(value)
    }

    pub fn clear<H: LruHooks<K>>(&mut self, hooks: &mut H) {
        while let Some((key, _)) = self.map.pop_lru() {
            hooks.on_remove(&key);
        }
        self.total_bytes = 0;
    }

    /// 按近期使用顺序（最久未用在前）列出 key
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &K> + '_ {
        self.map.iter().rev().map(|(k, _)| k)
    }
}
