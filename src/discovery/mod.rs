//! File discovery and, behind the `watch` feature, filesystem watching
//! with debounced change notification (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::tree::RouteFile;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("reading routes directory: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "watch")]
    #[error("watching routes directory: {0}")]
    Watch(#[from] notify::Error),
}

const DEFAULT_EXTENSIONS: &[&str] = &["tsx", "jsx", "ts", "js"];

/// Recursively scans `root` for files whose extension is in `extensions`,
/// returning paths relative to `root` with forward slashes regardless of
/// host OS. A missing `root` is not an error — it scans as empty, the
/// same way an application with no routes directory yet should start
/// cleanly rather than fail.
pub fn scan_directory(root: &Path, extensions: &[&str]) -> Result<Vec<RouteFile>, DiscoveryError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    walk(root, root, extensions, &mut out)?;
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(out)
}

pub fn default_extensions() -> &'static [&'static str] {
    DEFAULT_EXTENSIONS
}

fn walk(root: &Path, dir: &Path, extensions: &[&str], out: &mut Vec<RouteFile>) -> Result<(), DiscoveryError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, extensions, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let has_matching_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !has_matching_extension {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(RouteFile {
                relative_path,
                absolute_path: path,
            });
        }
    }
    Ok(())
}

/// The effect a single filesystem event has on the route tree, after
/// collapsing a burst of raw notify events into one decision per path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A file was created, or renamed in a way that changes its route id.
    Reload(String),
    /// An existing route file's contents changed; its id and position in
    /// the tree are unaffected, only its cached module/config.
    Change(String),
    /// A file was deleted.
    Remove(String),
}

/// A cache of loaded route modules keyed by their source file's mtime, so
/// a file whose mtime hasn't moved is never reloaded needlessly.
#[derive(Default)]
pub struct ModuleCache<T> {
    entries: HashMap<PathBuf, (SystemTime, T)>,
}

impl<T> ModuleCache<T> {
    pub fn new() -> Self {
        ModuleCache {
            entries: HashMap::new(),
        }
    }

    /// Returns the cached value for `path` if its recorded mtime still
    /// matches the file's current mtime on disk.
    pub fn get_fresh(&self, path: &Path) -> Option<&T> {
        let (cached_mtime, value) = self.entries.get(path)?;
        let current_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        if current_mtime == *cached_mtime {
            Some(value)
        } else {
            None
        }
    }

    pub fn insert(&mut self, path: PathBuf, mtime: SystemTime, value: T) {
        self.entries.insert(path, (mtime, value));
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(feature = "watch")]
pub mod watcher {
    //! Debounced filesystem watching. A burst of raw `notify` events within
    //! the debounce window collapses to a single [`FileEvent`] per path, via
    //! one pending timer shared across the whole burst rather than one per
    //! event.

    use super::*;
    use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc::{channel, Receiver};
    use std::time::Duration;

    pub const DEBOUNCE: Duration = Duration::from_millis(50);

    /// Watches `root` for changes under `extensions`, delivering debounced
    /// [`FileEvent`]s on the returned channel. The `RecommendedWatcher` must
    /// be kept alive for as long as watching should continue.
    pub fn watch(root: &Path, extensions: Vec<String>) -> Result<(RecommendedWatcher, Receiver<FileEvent>), DiscoveryError> {
        let (raw_tx, raw_rx) = channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = raw_tx.send(event);
                }
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let (tx, rx) = channel::<FileEvent>();
        let root = root.to_path_buf();
        std::thread::spawn(move || debounce_loop(root, extensions, raw_rx, tx));

        Ok((watcher, rx))
    }

    fn debounce_loop(root: PathBuf, extensions: Vec<String>, raw_rx: Receiver<Event>, tx: std::sync::mpsc::Sender<FileEvent>) {
        let mut pending: HashMap<PathBuf, EventKind> = HashMap::new();
        loop {
            match raw_rx.recv_timeout(DEBOUNCE) {
                Ok(event) => {
                    for path in event.paths {
                        if has_matching_extension(&path, &extensions) {
                            pending.insert(path, event.kind.clone());
                        }
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if !pending.is_empty() {
                        for (path, kind) in pending.drain() {
                            if let Some(relative) = relative_id(&root, &path) {
                                let file_event = classify(kind, &path, &relative);
                                if tx.send(file_event).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn has_matching_extension(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn relative_id(root: &Path, path: &Path) -> Option<String> {
        path.strip_prefix(root).ok().map(|relative| {
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
    }

    fn classify(kind: EventKind, path: &Path, relative: &str) -> FileEvent {
        if matches!(kind, EventKind::Remove(_)) || !path.exists() {
            FileEvent::Remove(relative.to_owned())
        } else if matches!(kind, EventKind::Create(_)) {
            FileEvent::Reload(relative.to_owned())
        } else {
            FileEvent::Change(relative.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_directory_scans_as_empty() {
        let result = scan_directory(Path::new("/nonexistent/does/not/exist"), DEFAULT_EXTENSIONS).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn scan_finds_matching_extensions_recursively_and_normalizes_slashes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.tsx"), "").unwrap();
        fs::create_dir(dir.path().join("blog")).unwrap();
        fs::write(dir.path().join("blog/index.tsx"), "").unwrap();
        fs::write(dir.path().join("blog/notes.md"), "").unwrap();

        let files = scan_directory(dir.path(), DEFAULT_EXTENSIONS).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["blog/index.tsx", "index.tsx"]);
    }

    #[test]
    fn module_cache_invalidates_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsx");
        fs::write(&path, "v1").unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let mut cache = ModuleCache::new();
        cache.insert(path.clone(), mtime, "compiled-v1".to_owned());
        assert_eq!(cache.get_fresh(&path), Some(&"compiled-v1".to_owned()));

        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&path, "v2").unwrap();
        assert_eq!(cache.get_fresh(&path), None);
    }
}
