use std::collections::BTreeSet;

/// Remote directories observed to exist over the current connection.
///
/// Membership is only ever a positive observation; a missing path means
/// "unknown", never "absent".
#[derive(Debug, Default)]
pub struct FolderCache {
    folders: BTreeSet<String>,
}

impl FolderCache {
    pub fn knows(&self, path: &str) -> bool {
        self.folders.contains(path)
    }

    pub fn remember(&mut self, path: impl Into<String>) {
        self.folders.insert(path.into());
    }

    pub fn forget_all(&mut self) {
        self.folders.clear();
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembered_paths_are_known_until_forgotten() {
        let mut cache = FolderCache::default();
        assert!(!cache.knows("/data"));

        cache.remember("/data");
        cache.remember("/data/b");
        assert!(cache.knows("/data"));
        assert!(cache.knows("/data/b"));
        assert_eq!(cache.len(), 2);

        cache.forget_all();
        assert!(!cache.knows("/data"));
        assert!(!cache.knows("/data/b"));
        assert!(cache.is_empty());
    }

    #[test]
    fn remembering_twice_is_harmless() {
        let mut cache = FolderCache::default();
        cache.remember("/data");
        cache.remember("/data".to_string());
        assert_eq!(cache.paths().collect::<Vec<_>>(), vec!["/data"]);
    }
}
