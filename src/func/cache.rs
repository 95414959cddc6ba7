//! Per-route handler cache.
//!
//! # Responsibilities
//! - Memoize the loaded handler and its config per route key
//! - On a miss: resolve the file, load the handler, load the config
//!
//! # Design Decisions
//! - Entries live for the process lifetime; no invalidation
//! - Nothing is stored unless handler and config both loaded
//! - Misses for the same key never race: the request queue drains one
//!   request per key at a time, so no per-key lock is taken here
//! - Filesystem probes (route resolution, config files) run on the
//!   blocking pool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{ConfigLoader, Environment, FuncConfig};
use crate::error::FuncError;
use crate::func::loader::HandlerLoader;
use crate::func::Handler;
use crate::observability::metrics;
use crate::routing::RouteResolver;

/// A loaded function ready to serve requests.
pub struct CachedFunc {
    pub file: PathBuf,
    pub handler: Arc<dyn Handler>,
    pub config: Arc<FuncConfig>,
}

impl std::fmt::Debug for CachedFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFunc")
            .field("file", &self.file)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub struct HandlerCache {
    entries: DashMap<String, Arc<CachedFunc>>,
    resolver: RouteResolver,
    loader: Arc<dyn HandlerLoader>,
    configs: Arc<dyn ConfigLoader>,
    env: Environment,
}

impl HandlerCache {
    pub fn new(
        resolver: RouteResolver,
        loader: Arc<dyn HandlerLoader>,
        configs: Arc<dyn ConfigLoader>,
        env: Environment,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            resolver,
            loader,
            configs,
            env,
        }
    }

    pub fn loader(&self) -> &Arc<dyn HandlerLoader> {
        &self.loader
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Cached function for `key`, loading it on first use.
    pub async fn get_or_load(&self, key: &str) -> Result<Arc<CachedFunc>, FuncError> {
        if let Some(hit) = self.entries.get(key) {
            tracing::debug!(file = %hit.file.display(), "Response with cached handler");
            return Ok(Arc::clone(hit.value()));
        }

        let resolver = self.resolver.clone();
        let owned = key.to_string();
        let route = tokio::task::spawn_blocking(move || resolver.resolve(&owned))
            .await
            .map_err(|e| FuncError::Transport(format!("Route resolution aborted: {e}")))??;
        tracing::debug!(file = %route.file.display(), "Response with handler");

        let handler = match self.loader.load(self.resolver.root(), &route.file).await {
            Ok(handler) => handler,
            Err(e) => {
                metrics::record_handler_load("load_failed");
                return Err(e);
            }
        };

        let configs = Arc::clone(&self.configs);
        let root = self.resolver.root().to_path_buf();
        let file = route.file.clone();
        let env = self.env;
        let config = tokio::task::spawn_blocking(move || configs.load(&root, &file, env))
            .await
            .map_err(|e| FuncError::ConfigMissing(format!("Config loading aborted: {e}")))
            .and_then(|loaded| loaded);

        let config = match config {
            Ok(config) => config,
            Err(e) => {
                metrics::record_handler_load("config_missing");
                return Err(e);
            }
        };

        let cached = Arc::new(CachedFunc {
            file: route.file,
            handler,
            config,
        });
        self.entries.insert(key.to_string(), Arc::clone(&cached));
        metrics::record_handler_load("loaded");

        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfigLoader;
    use crate::func::{Context, Event, Output, StaticLoader};
    use std::fs;

    fn setup(with_config: bool) -> (tempfile::TempDir, HandlerCache) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.func.ts"), "").unwrap();
        if with_config {
            fs::write(dir.path().join("faas.toml"), "[defaults]\nname = \"x\"\n").unwrap();
        }

        let loader = StaticLoader::new();
        loader.register("hello.func.ts", |_e: Event, _c: Context| async {
            Ok::<_, FuncError>(Output::Empty)
        });

        let resolver = RouteResolver::new(
            dir.path(),
            vec!["ts".into()],
            Environment::Development,
        );
        let cache = HandlerCache::new(
            resolver,
            Arc::new(loader),
            Arc::new(FileConfigLoader::new()),
            Environment::Development,
        );
        (dir, cache)
    }

    #[tokio::test]
    async fn loads_once_then_hits() {
        let (dir, cache) = setup(true);

        let first = cache.get_or_load("hello").await.unwrap();
        assert_eq!(first.file, dir.path().join("hello.func.ts"));
        assert!(cache.contains("hello"));

        // the file is gone, but the cached entry still serves
        fs::remove_file(dir.path().join("hello.func.ts")).unwrap();
        let second = cache.get_or_load("hello").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn config_failure_is_not_cached() {
        let (dir, cache) = setup(false);

        let err = cache.get_or_load("hello").await.unwrap_err();
        assert!(matches!(err, FuncError::ConfigMissing(_)));
        assert!(cache.is_empty());

        fs::write(dir.path().join("faas.toml"), "[defaults]\n").unwrap();
        assert!(cache.get_or_load("hello").await.is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_route_is_not_found() {
        let (_dir, cache) = setup(true);
        let err = cache.get_or_load("nope").await.unwrap_err();
        assert!(matches!(err, FuncError::NotFound(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_resolution_surfaces_errors() {
        let (_dir, cache) = setup(true);

        let err = cache.get_or_load("a/../hello").await.unwrap_err();
        assert!(matches!(err, FuncError::IllegalInput(_)));
        assert!(cache.get_or_load("hello").await.is_ok());
        assert_eq!(cache.len(), 1);
    }
}
