//! In-memory directory tree served by the dev server.
//!
//! The [`FileStore`] maps absolute directory paths to the files they hold.
//! Directories are flat: a file name never contains `/`, and subdirectories
//! exist only as separate entries in the map.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

/// Thread-safe in-memory file tree.
pub struct FileStore {
    dirs: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    writes: AtomicUsize,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// Creates a store holding only the root directory `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_directories(std::iter::empty::<&str>())
    }

    /// Creates a store holding `/` plus the given directories.
    #[must_use]
    pub fn with_directories<I, S>(dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        map.insert("/".to_string(), BTreeMap::new());
        for dir in dirs {
            map.insert(normalize("/", dir.as_ref()), BTreeMap::new());
        }
        Self {
            dirs: RwLock::new(map),
            writes: AtomicUsize::new(0),
        }
    }

    /// Adds an empty directory (no-op if it exists).
    pub async fn create_dir(&self, path: &str) {
        self.dirs
            .write()
            .await
            .entry(normalize("/", path))
            .or_default();
    }

    pub async fn has_dir(&self, path: &str) -> bool {
        self.dirs.read().await.contains_key(path)
    }

    /// Sorted file names in `dir`, or `None` if it does not exist.
    pub async fn list(&self, dir: &str) -> Option<Vec<String>> {
        let dirs = self.dirs.read().await;
        dirs.get(dir).map(|files| files.keys().cloned().collect())
    }

    /// Contents of `dir/name`, or `None` if either is missing.
    pub async fn read(&self, dir: &str, name: &str) -> Option<Vec<u8>> {
        let dirs = self.dirs.read().await;
        dirs.get(dir)?.get(name).cloned()
    }

    /// Replaces `dir/name`. Returns `false` if the directory does not exist.
    pub async fn write(&self, dir: &str, name: &str, contents: Vec<u8>) -> bool {
        let mut dirs = self.dirs.write().await;
        let Some(files) = dirs.get_mut(dir) else {
            return false;
        };
        files.insert(name.to_string(), contents);
        drop(dirs);
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Number of successful writes since the store was created.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Resolves `arg` against the working directory `cwd` into an absolute,
/// normalized path (`.` and `..` removed, no trailing slash).
#[must_use]
pub fn normalize(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{cwd}/{arg}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Splits a resolved file path into (directory, file name).
#[must_use]
pub fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}
