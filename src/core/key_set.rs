use std::fmt;
use std::sync::Arc;

/// 复合缓存 key：一次 visit 请求的文档 id 集合。
///
/// 构造时排序并去重，之后不可变；内部用 `Arc<[u32]>`，clone 只增引用计数
/// （同一个 KeySet 会同时挂在 LRU map 与 SubsetIndex 上）。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeySet {
    keys: Arc<[u32]>,
}

impl KeySet {
    pub fn single(id: u32) -> Self {
        Self {
            keys: Arc::from([id]),
        }
    }

    pub fn new<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let mut keys: Vec<u32> = ids.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self {
            keys: Arc::from(keys),
        }
    }

    pub fn ids(&self) -> &[u32] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 代表 id：集合中最小的 id（SubsetIndex 的反查 key）
    pub fn representative(&self) -> Option<u32> {
        self.keys.first().copied()
    }

    /// `rhs` 是否为本集合的子集（两路归并，O(|self| + |rhs|)）
    pub fn contains(&self, rhs: &KeySet) -> bool {
        let mut mine = self.keys.iter();
        'outer: for want in rhs.keys.iter() {
            for have in mine.by_ref() {
                if have == want {
                    continue 'outer;
                }
                if have > want {
                    return false;
                }
            }
            return false;
        }
        true
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.keys.binary_search(&id).is_ok()
    }
}

impl From<u32> for KeySet {
    fn from(id: u32) -> Self {
        Self::single(id)
    }
}

impl From<&[u32]> for KeySet {
    fn from(ids: &[u32]) -> Self {
        Self::new(ids.iter().copied())
    }
}

impl From<Vec<u32>> for KeySet {
    fn from(ids: Vec<u32>) -> Self {
        Self::new(ids)
    }
}

impl FromIterator<u32> for KeySet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.iter()).finish()
    }
}
