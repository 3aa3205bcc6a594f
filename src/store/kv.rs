use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::StudioResult;

/// String-keyed blob storage, the local system of record.
///
/// Writes are last-writer-wins; there is no concurrency control across
/// processes sharing the same backing store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StudioResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StudioResult<()>;
    fn remove(&self, key: &str) -> StudioResult<()>;
}

/// JSON helpers available on every store.
pub trait KeyValueExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StudioResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StudioResult<()> {
        self.set(key, &serde_json::to_string(value)?)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueExt for S {}

/// Key namespaced to one user, or the shared key when no user is signed in.
pub fn scoped_key(base: &str, user_email: Option<&str>) -> String {
    match user_email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) => format!("{}:{}", base, email.to_lowercase()),
        None => base.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StudioResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StudioResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StudioResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> StudioResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(path = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StudioResult<Option<String>> {
        let _guard = self.lock.read();
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StudioResult<()> {
        let _guard = self.lock.write();
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        tracing::trace!(key, path = %path.display(), "store entry written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StudioResult<()> {
        let _guard = self.lock.write();
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_keys() {
        assert_eq!(scoped_key("projects", None), "projects");
        assert_eq!(scoped_key("projects", Some("  ")), "projects");
        assert_eq!(scoped_key("projects", Some("Dev@Example.com")), "projects:dev@example.com");
    }

    #[test]
    fn memory_store_json_helpers() {
        let store = MemoryStore::new();
        assert_eq!(store.get_json::<Vec<u32>>("nums").unwrap(), None);
        store.set_json("nums", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(store.get_json::<Vec<u32>>("nums").unwrap(), Some(vec![1, 2, 3]));
        store.remove("nums").unwrap();
        assert_eq!(store.get("nums").unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.set("projects:dev@example.com", "[]").unwrap();
            store.set("tasks", "[1]").unwrap();
        }
        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.get("projects:dev@example.com").unwrap().as_deref(), Some("[]"));
        assert_eq!(store.get("tasks").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("missing").unwrap(), None);

        store.remove("tasks").unwrap();
        store.remove("tasks").unwrap();
        assert_eq!(store.get("tasks").unwrap(), None);
    }

    #[test]
    fn corrupt_blob_is_a_json_error() {
        let store = MemoryStore::new();
        store.set("tasks", "{oops").unwrap();
        assert!(store.get_json::<Vec<u32>>("tasks").is_err());
    }
}
