use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::map::CaseInsensitiveMap;
use crate::notifier::ReloadNotifier;
use crate::provider::{BaseProvider, ConfigurationProvider, ConfigurationSource};

/// Debounce window for filesystem write storms: editors typically emit
/// several write events per save.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Parses file bytes into a fresh configuration map. The error string names
/// what could not be parsed.
pub type ParseFn = Arc<dyn Fn(&[u8]) -> Result<CaseInsensitiveMap<String>, String> + Send + Sync>;

/// Generic file-backed source. Format-specific sources (JSON, YAML) supply
/// the parse callback.
pub struct FileSource {
    pub path: PathBuf,
    /// A missing file is only an error when `optional` is false.
    pub optional: bool,
    /// Watch the file and reload when it changes.
    pub reload_on_change: bool,
    pub parse: ParseFn,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, parse: ParseFn) -> Self {
        FileSource {
            path: path.into(),
            optional: false,
            reload_on_change: false,
            parse,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn reload_on_change(mut self, reload: bool) -> Self {
        self.reload_on_change = reload;
        self
    }
}

impl ConfigurationSource for FileSource {
    fn build(&self) -> Arc<dyn ConfigurationProvider> {
        Arc::new(FileProvider::new(self))
    }
}

/// Provider backed by a file on disk.
///
/// With `reload_on_change`, a watcher is armed on the parent directory (so
/// delete and re-create keep reporting) and write events are debounced by
/// 500 ms before the file is re-read. Deleting the file replaces the map
/// with the empty map.
pub struct FileProvider {
    inner: Arc<FileInner>,
}

struct FileInner {
    base: BaseProvider,
    path: PathBuf,
    optional: bool,
    reload_on_change: bool,
    parse: ParseFn,
    loaded: AtomicBool,
    debouncing: AtomicBool,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileProvider {
    fn new(source: &FileSource) -> Self {
        FileProvider {
            inner: Arc::new(FileInner {
                base: BaseProvider::new(),
                path: source.path.clone(),
                optional: source.optional,
                reload_on_change: source.reload_on_change,
                parse: source.parse.clone(),
                loaded: AtomicBool::new(false),
                debouncing: AtomicBool::new(false),
                watcher: Mutex::new(None),
            }),
        }
    }
}

impl FileInner {
    fn load_file(&self) {
        match std::fs::read(&self.path) {
            Ok(bytes) => match (self.parse)(&bytes) {
                Ok(map) => self.base.replace(map),
                Err(err) => {
                    tracing::error!(path = %self.path.display(), %err, "configuration file parse failed");
                    self.base.replace(CaseInsensitiveMap::new());
                }
            },
            Err(err) => {
                if self.optional {
                    tracing::debug!(path = %self.path.display(), %err, "optional configuration file missing");
                } else {
                    tracing::error!(path = %self.path.display(), %err, "configuration file read failed");
                    self.base.replace(CaseInsensitiveMap::new());
                }
            }
        }
    }

    fn start_watch(inner: &Arc<FileInner>) {
        let weak = Arc::downgrade(inner);
        let watched = inner.path.clone();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Some(inner) = weak.upgrade() else { return };
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(%err, "configuration file watcher error");
                    return;
                }
            };
            if !event.paths.iter().any(|p| same_file(p, &watched)) {
                return;
            }
            FileInner::on_file_event(&inner, &event);
        });

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(%err, "failed to create configuration file watcher");
                return;
            }
        };

        let watch_dir = inner
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if let Err(err) = std::fs::create_dir_all(&watch_dir) {
            tracing::warn!(path = %watch_dir.display(), %err, "cannot create watch directory");
            return;
        }
        if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            tracing::warn!(path = %watch_dir.display(), %err, "cannot watch configuration directory");
            return;
        }

        *inner.watcher.lock().expect("watcher lock poisoned") = Some(watcher);
    }

    fn on_file_event(inner: &Arc<FileInner>, event: &notify::Event) {
        if event.kind.is_modify() || event.kind.is_create() {
            // Collapse write storms into one reload per debounce window.
            if inner
                .debouncing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let inner = inner.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(RELOAD_DEBOUNCE);
                    inner.debouncing.store(false, Ordering::SeqCst);
                    inner.load_file();
                });
            }
        } else if event.kind.is_remove() {
            tracing::debug!(path = %inner.path.display(), "configuration file removed");
            inner.base.replace(CaseInsensitiveMap::new());
        }
    }
}

fn same_file(candidate: &Path, target: &Path) -> bool {
    if candidate == target {
        return true;
    }
    // Watcher events carry absolute paths while the source may have been
    // configured with a relative one.
    match (candidate.file_name(), target.file_name()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl ConfigurationProvider for FileProvider {
    fn try_get(&self, key: &str) -> Option<String> {
        self.inner.base.try_get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.inner.base.set(key, value);
    }

    fn load(&self) {
        if self.inner.loaded.swap(true, Ordering::SeqCst) {
            // Re-load request on an already-loaded provider: the watcher
            // already covers change-driven reloads.
            if !self.inner.reload_on_change {
                self.inner.load_file();
            }
            return;
        }

        self.inner.load_file();
        if self.inner.reload_on_change {
            FileInner::start_watch(&self.inner);
        }
    }

    fn child_keys(&self, parent_path: &str) -> Vec<String> {
        self.inner.base.child_keys(parent_path)
    }

    fn reload_notifier(&self) -> &ReloadNotifier {
        self.inner.base.reload_notifier()
    }
}
