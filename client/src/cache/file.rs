//! Cache persisted as one file per replica.

use super::{Cache, CacheKey};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Cache stored under a directory, one JSON file per key.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `context+database[+collection].json`, each part escaped on its own so
    /// distinct keys never share a file.
    fn path(&self, key: &CacheKey) -> PathBuf {
        let mut name = format!("{}+{}", key.context, escape(&key.database_id));
        if let Some(collection_id) = &key.collection_id {
            name.push('+');
            name.push_str(&escape(collection_id));
        }
        self.dir.join(format!("{}.json", name))
    }
}

fn escape(part: &str) -> String {
    part.replace('%', "%25")
        .replace('/', "%2F")
        .replace('+', "%2B")
        .replace('\\', "%5C")
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Cache(format!("failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl Cache for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let path = self.path(key);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    async fn set(&self, key: &CacheKey, value: String) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;

        // Write then rename so readers never see a partial file.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("replace", &path, e))
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error("list", &self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| io_error("remove", &path, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Context;

    #[tokio::test]
    async fn persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new(Context::User, "db", Some("todos".into()));

        FileCache::new(dir.path())
            .set(&key, "{\"revision\":1}".into())
            .await
            .unwrap();

        let reopened = FileCache::new(dir.path());
        assert_eq!(
            reopened.get(&key).await.unwrap().as_deref(),
            Some("{\"revision\":1}")
        );
        assert!(dir.path().join("user+db+todos.json").exists());
    }

    #[tokio::test]
    async fn keys_with_separators_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let nested = CacheKey::new(Context::App, "db/todos", None);
        let filtered = CacheKey::new(Context::App, "db", Some("todos".into()));
        let plus = CacheKey::new(Context::App, "db+todos", None);

        cache.set(&nested, "A".into()).await.unwrap();
        cache.set(&filtered, "B".into()).await.unwrap();
        cache.set(&plus, "C".into()).await.unwrap();

        assert_eq!(cache.get(&nested).await.unwrap().as_deref(), Some("A"));
        assert_eq!(cache.get(&filtered).await.unwrap().as_deref(), Some("B"));
        assert_eq!(cache.get(&plus).await.unwrap().as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("not-yet-created"));
        let key = CacheKey::new(Context::App, "db", None);

        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache.remove(&key).await.unwrap();
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let a = CacheKey::new(Context::App, "a", None);
        let b = CacheKey::new(Context::App, "b", None);

        cache.set(&a, "1".into()).await.unwrap();
        cache.set(&b, "2".into()).await.unwrap();
        cache.clear().await.unwrap();

        assert_eq!(cache.get(&a).await.unwrap(), None);
        assert_eq!(cache.get(&b).await.unwrap(), None);
    }
}
