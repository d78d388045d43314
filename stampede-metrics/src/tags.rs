use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Series rarely carry more than a couple of tags.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 2]>,
}

impl TagSet {
    /// Builds a tag set, sorting by key. Later duplicates of a key are dropped.
    pub fn new(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 2]> = iter.into_iter().collect();
        tags.sort_by_key(|(k, _)| *k);
        tags.dedup_by_key(|(k, _)| *k);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// Keeps only the given keys (used as a group-by key).
    pub fn project(&self, keys: &[KeyId]) -> TagSet {
        TagSet::new(
            keys.iter()
                .filter_map(|key| self.get(*key).map(|value| (*key, value))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sorts_and_get_finds_values() {
        let check = KeyId::from(7);
        let status = KeyId::from(3);
        let v1 = KeyId::from(10);
        let v2 = KeyId::from(11);

        let set = TagSet::new([(check, v1), (status, v2)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(status), Some(v2));
        assert_eq!(set.get(check), Some(v1));
        assert_eq!(set.get(KeyId::from(1)), None);

        let projected = set.project(&[check]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get(check), Some(v1));
    }
}
