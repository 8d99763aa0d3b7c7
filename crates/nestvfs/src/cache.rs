//! URI to context memoization.
//!
//! ```text
//! MapContextCache
//! └── BTreeMap<root uri, CacheEntry>
//!     └── CacheEntry
//!         ├── context     ─┐
//!         └── signature   ─┴── evicted when the backing resource moves on
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nestvfs_fs::Signature;
use parking_lot::RwLock;

use crate::context::VfsContext;

/// Pluggable context cache. Every method must tolerate a cache that stores
/// nothing: callers rebuild on a miss.
pub trait ContextCache: Send + Sync + fmt::Debug {
    /// The cached context whose root URI is the longest prefix of `uri`.
    fn find(&self, uri: &str) -> Option<Arc<dyn VfsContext>>;

    fn put(&self, context: Arc<dyn VfsContext>);

    /// Remove `context` if it is the one cached under its root URI.
    fn remove(&self, context: &Arc<dyn VfsContext>) -> bool;

    fn contexts(&self) -> Vec<Arc<dyn VfsContext>>;

    fn flush(&self);

    /// Like [`find`](Self::find), but evicts and skips a stale context.
    fn find_fresh(&self, uri: &str) -> Option<Arc<dyn VfsContext>> {
        let context = self.find(uri)?;
        if context.has_changed() {
            tracing::debug!(root = context.root_uri(), "evicting stale context");
            self.remove(&context);
            return None;
        }
        Some(context)
    }
}

/// Caches nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopContextCache;

impl ContextCache for NoopContextCache {
    fn find(&self, _uri: &str) -> Option<Arc<dyn VfsContext>> {
        None
    }

    fn put(&self, _context: Arc<dyn VfsContext>) {}

    fn remove(&self, _context: &Arc<dyn VfsContext>) -> bool {
        false
    }

    fn contexts(&self) -> Vec<Arc<dyn VfsContext>> {
        Vec::new()
    }

    fn flush(&self) {}
}

struct CacheEntry {
    context: Arc<dyn VfsContext>,
    signature: Option<Signature>,
}

impl CacheEntry {
    fn is_stale(&self) -> bool {
        self.context.has_changed() || self.context.signature() != self.signature
    }
}

#[derive(Default)]
pub struct MapContextCache {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl MapContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MapContextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapContextCache")
            .field("roots", &self.entries.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ContextCache for MapContextCache {
    fn find(&self, uri: &str) -> Option<Arc<dyn VfsContext>> {
        let entries = self.entries.read();
        let uri = uri.trim_end_matches('/');
        let boundaries = uri.rmatch_indices('/').map(|(pos, _)| pos);
        std::iter::once(uri.len())
            .chain(boundaries)
            .find_map(|end| entries.get(&uri[..end]))
            .map(|entry| Arc::clone(&entry.context))
    }

    fn put(&self, context: Arc<dyn VfsContext>) {
        let root = context.root_uri().trim_end_matches('/').to_string();
        let signature = context.signature();
        tracing::debug!(%root, "caching context");
        self.entries
            .write()
            .insert(root, CacheEntry { context, signature });
    }

    fn remove(&self, context: &Arc<dyn VfsContext>) -> bool {
        let root = context.root_uri().trim_end_matches('/');
        let mut entries = self.entries.write();
        match entries.get(root) {
            Some(entry) if Arc::ptr_eq(&entry.context, context) => {
                entries.remove(root);
                true
            }
            _ => false,
        }
    }

    fn contexts(&self) -> Vec<Arc<dyn VfsContext>> {
        self.entries
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.context))
            .collect()
    }

    fn flush(&self) {
        self.entries.write().clear();
    }

    fn find_fresh(&self, uri: &str) -> Option<Arc<dyn VfsContext>> {
        let context = self.find(uri)?;
        let stale = {
            let entries = self.entries.read();
            entries
                .get(context.root_uri().trim_end_matches('/'))
                .is_none_or(CacheEntry::is_stale)
        };
        if stale {
            tracing::debug!(root = context.root_uri(), "evicting stale context");
            self.remove(&context);
            return None;
        }
        Some(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FileAttr, MemoryContext};
    use crate::Result;
    use nestvfs_fs::VirtualPath;
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn memory(host: &str) -> Arc<dyn VfsContext> {
        Arc::new(MemoryContext::new(host))
    }

    #[derive(Debug)]
    struct Flaky {
        uri: String,
        changed: AtomicBool,
    }

    impl VfsContext for Flaky {
        fn root_uri(&self) -> &str {
            &self.uri
        }

        fn has_changed(&self) -> bool {
            self.changed.load(Ordering::SeqCst)
        }

        fn attr(&self, _path: &VirtualPath) -> Result<Option<FileAttr>> {
            Ok(None)
        }

        fn children(&self, _path: &VirtualPath) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn open_stream(&self, path: &VirtualPath) -> Result<Box<dyn Read + Send>> {
            Err(crate::Error::not_found(path.to_string()))
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let cache = MapContextCache::new();
        let outer: Arc<dyn VfsContext> = Arc::new(Flaky {
            uri: "vfszip:/srv/app.ear".into(),
            changed: AtomicBool::new(false),
        });
        let inner: Arc<dyn VfsContext> = Arc::new(Flaky {
            uri: "vfszip:/srv/app.ear/lib/util.jar".into(),
            changed: AtomicBool::new(false),
        });
        cache.put(Arc::clone(&outer));
        cache.put(Arc::clone(&inner));

        let hit = cache.find("vfszip:/srv/app.ear/lib/util.jar/META-INF/x").unwrap();
        assert!(Arc::ptr_eq(&hit, &inner));
        let hit = cache.find("vfszip:/srv/app.ear/WEB-INF/web.xml").unwrap();
        assert!(Arc::ptr_eq(&hit, &outer));
        assert!(cache.find("vfszip:/srv/app.ear2/x").is_none());
        assert!(cache.find("vfszip:/srv").is_none());
    }

    #[test]
    fn stale_context_is_evicted() {
        let cache = MapContextCache::new();
        let flaky = Arc::new(Flaky {
            uri: "vfszip:/a.jar".into(),
            changed: AtomicBool::new(false),
        });
        cache.put(flaky.clone());
        assert!(cache.find_fresh("vfszip:/a.jar/x").is_some());

        flaky.changed.store(true, Ordering::SeqCst);
        assert!(cache.find_fresh("vfszip:/a.jar/x").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_only_matching_instance() {
        let cache = MapContextCache::new();
        let first = memory("h");
        let second = memory("h");
        cache.put(Arc::clone(&first));
        cache.put(Arc::clone(&second));
        assert!(!cache.remove(&first));
        assert!(cache.remove(&second));
        assert!(cache.is_empty());
    }

    #[test]
    fn noop_cache_always_misses() {
        let cache = NoopContextCache;
        cache.put(memory("h"));
        assert!(cache.find("vfsmemory://h/x").is_none());
        assert!(cache.find_fresh("vfsmemory://h").is_none());
        assert!(cache.contexts().is_empty());
    }
}
