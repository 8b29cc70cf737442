use std::collections::{BTreeSet, HashMap};

use crate::cache::lru::LruHooks;
use crate::core::KeySet;

/// 单 id -> 覆盖它的缓存条目 的反查索引。
///
/// ## 不变量
/// - 每个在缓存中的 KeySet K，其所有 id 都映射到 K 的代表 id（最小 id），
///   且 `representative_to_key_set[rep] == K`
/// - 在缓存中的 KeySet 两两不相交（同一 id 最多被一个条目覆盖）
///
/// 作为 ByteLru 的钩子，只在缓存锁内被修改。
#[derive(Debug, Default)]
pub struct SubsetIndex {
    id_to_representative: HashMap<u32, u32>,
    representative_to_key_set: HashMap<u32, KeySet>,
}

impl SubsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// `keys` 中任意 id 命中的不同代表 id（有序）
    pub fn find_sets_containing(&self, keys: &KeySet) -> BTreeSet<u32> {
        keys.ids()
            .iter()
            .filter_map(|id| self.id_to_representative.get(id).copied())
            .collect()
    }

    pub fn key_set_for_representative(&self, representative: u32) -> Option<&KeySet> {
        self.representative_to_key_set.get(&representative)
    }

    /// 覆盖 `id` 的缓存 KeySet
    pub fn key_set_of(&self, id: u32) -> Option<&KeySet> {
        let rep = self.id_to_representative.get(&id)?;
        self.representative_to_key_set.get(rep)
    }

    /// 当前被覆盖的 id 数
    pub fn covered_ids(&self) -> usize {
        self.id_to_representative.len()
    }

    pub fn entry_count(&self) -> usize {
        self.representative_to_key_set.len()
    }

    /// 校验上述两条约束（测试与 debug 断言使用）
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut covered = 0usize;
        for (rep, key) in &self.representative_to_key_set {
            if key.representative() != Some(*rep) {
                return Err(format!("{key:?} registered under representative {rep}"));
            }
            for id in key.ids() {
                match self.id_to_representative.get(id) {
                    Some(r) if r == rep => covered += 1,
                    Some(r) => {
                        return Err(format!("id {id} of {key:?} maps to foreign representative {r}"))
                    }
                    None => return Err(format!("id {id} of {key:?} is not indexed")),
                }
            }
        }
        if covered != self.id_to_representative.len() {
            return Err(format!(
                "{} ids indexed but live key sets cover {}",
                self.id_to_representative.len(),
                covered
            ));
        }
        Ok(())
    }
}

impl LruHooks<KeySet> for SubsetIndex {
    fn on_insert(&mut self, key: &KeySet) {
        let Some(rep) = key.representative() else {
            return;
        };
        for &id in key.ids() {
            self.id_to_representative.insert(id, rep);
        }
        self.representative_to_key_set.insert(rep, key.clone());
    }

    fn on_remove(&mut self, key: &KeySet) {
        let Some(rep) = key.representative() else {
            return;
        };
        for id in key.ids() {
            self.id_to_representative.remove(id);
        }
        self.representative_to_key_set.remove(&rep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_registers_every_id_under_minimum() {
        let mut idx = SubsetIndex::new();
        let k = KeySet::new([9, 5, 12]);
        idx.on_insert(&k);

        assert_eq!(idx.key_set_of(9), Some(&k));
        assert_eq!(idx.key_set_for_representative(5), Some(&k));
        assert_eq!(idx.key_set_of(7), None);
        assert_eq!(idx.covered_ids(), 3);
        idx.check_invariants().unwrap();
    }

    #[test]
    fn find_sets_containing_collects_distinct_representatives() {
        let mut idx = SubsetIndex::new();
        idx.on_insert(&KeySet::new([1, 2]));
        idx.on_insert(&KeySet::new([10, 11]));

        let found = idx.find_sets_containing(&KeySet::new([2, 3, 10, 11]));
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 10]);
        assert!(idx.find_sets_containing(&KeySet::new([4, 5])).is_empty());
    }

    #[test]
    fn remove_erases_all_traces() {
        let mut idx = SubsetIndex::new();
        let k = KeySet::new([3, 4]);
        idx.on_insert(&k);
        idx.on_remove(&k);

        assert_eq!(idx.covered_ids(), 0);
        assert_eq!(idx.entry_count(), 0);
        idx.check_invariants().unwrap();
    }

    #[test]
    fn overlapping_inserts_break_invariants() {
        let mut idx = SubsetIndex::new();
        idx.on_insert(&KeySet::new([1, 2, 3]));
        idx.on_insert(&KeySet::new([2, 3]));
        assert!(idx.check_invariants().is_err());
    }
}
