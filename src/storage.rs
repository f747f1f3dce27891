use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
};

use bytes::Bytes;

use crate::{Error, Result};

/// Validated, `/`-separated relative key of an object in a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && !key.ends_with('/')
            && key
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if valid {
            Ok(Self(key))
        } else {
            Err(Error::InvalidStoreKey(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keyed blob storage backing a chunked array.
///
/// One object per chunk plus one metadata document; anything that can
/// get, set and erase whole blobs satisfies the sink's needs.
pub trait Store {
    fn get(&self, key: &StoreKey) -> Result<Option<Bytes>>;

    fn set(&self, key: &StoreKey, value: Bytes) -> Result<()>;

    /// Erasing an absent key is not an error.
    fn erase(&self, key: &StoreKey) -> Result<()>;

    fn exists(&self, key: &StoreKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All keys currently present, in no particular order.
    fn list(&self) -> Result<Vec<StoreKey>>;
}

/// One file per key under a root directory.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &StoreKey) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(key.as_str().split('/'));
        path
    }
}

impl Store for FilesystemStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Bytes>> {
        match fs::read(self.key_path(key)) {
            Ok(v) => Ok(Some(Bytes::from_owner(v))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &StoreKey, value: Bytes) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &value)?;
        Ok(())
    }

    fn erase(&self, key: &StoreKey) -> Result<()> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &StoreKey) -> Result<bool> {
        Ok(self.key_path(key).is_file())
    }

    fn list(&self) -> Result<Vec<StoreKey>> {
        fn walk(dir: &Path, root: &Path, out: &mut Vec<StoreKey>) -> Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    walk(&path, root, out)?;
                } else {
                    let rel = path
                        .strip_prefix(root)
                        .expect("listed paths live under the root");
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(StoreKey::new(key)?);
                }
            }
            Ok(())
        }
        let mut out = Vec::new();
        walk(&self.root, &self.root, &mut out)?;
        Ok(out)
    }
}

/// In-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<StoreKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Bytes>> {
        Ok(self.objects.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &StoreKey, value: Bytes) -> Result<()> {
        self.objects.write().unwrap().insert(key.clone(), value);
        Ok(())
    }

    fn erase(&self, key: &StoreKey) -> Result<()> {
        self.objects.write().unwrap().remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoreKey>> {
        Ok(self.objects.read().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(StoreKey::new("c/0/1/2").is_ok());
        assert!(StoreKey::new("array.json").is_ok());
        for bad in ["", "/abs", "trailing/", "a//b", "a/../b", "."] {
            assert!(StoreKey::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    fn exercise(store: &impl Store) {
        let key = StoreKey::new("c/0/0/0").unwrap();
        assert!(store.get(&key).unwrap().is_none());
        assert!(!store.exists(&key).unwrap());

        store.set(&key, Bytes::from_static(b"abc")).unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap().as_ref(), b"abc");
        assert!(store.exists(&key).unwrap());

        store.set(&key, Bytes::from_static(b"xyz")).unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap().as_ref(), b"xyz");

        let other = StoreKey::new("c/1/0/0").unwrap();
        store.set(&other, Bytes::from_static(b"q")).unwrap();
        let mut keys = store.list().unwrap();
        keys.sort();
        assert_eq!(keys, vec![key.clone(), other.clone()]);
        store.erase(&other).unwrap();

        store.erase(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
        // absent key: still fine
        store.erase(&key).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("store")).unwrap();
        exercise(&store);
    }
}
