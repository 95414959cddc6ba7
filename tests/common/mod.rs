//! Shared utilities for integration tests.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use faas_server::lifecycle::ServerHooks;
use faas_server::{Server, ServerConfig, StaticLoader};
use futures_util::future::BoxFuture;
use faas_server::func::HandlerLoader;
use faas_server::{FuncError, Handler};

/// Config for a test server: loopback, ephemeral port, no signal handling.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.lifecycle.handle_signals = false;
    config.lifecycle.drain_poll_ms = 10;
    config
}

/// Temp root holding a `faas.toml` and an empty file per entry of `files`.
pub fn func_root(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("faas.toml"), "[defaults]\nname = \"test\"\n").unwrap();
    for file in files {
        let path = dir.path().join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }
    dir
}

/// A listening server and its base URL.
pub struct TestServer {
    pub server: Server,
    pub base_url: String,
    _root: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[allow(dead_code)]
pub async fn start(loader: Arc<dyn HandlerLoader>, files: &[&str]) -> TestServer {
    start_with(loader, files, None).await
}

pub async fn start_with(
    loader: Arc<dyn HandlerLoader>,
    files: &[&str],
    hooks: Option<Arc<dyn ServerHooks>>,
) -> TestServer {
    let root = func_root(files);
    let mut builder = Server::builder(root.path())
        .config(test_config())
        .loader(loader);
    if let Some(hooks) = hooks {
        builder = builder.hooks(hooks);
    }
    let server = builder.build();
    let addr = server.listen().await.unwrap();

    TestServer {
        server,
        base_url: format!("http://{addr}"),
        _root: root,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().build().unwrap()
}

/// Loader that counts how often each file is loaded.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CountingLoader {
    pub inner: StaticLoader,
    pub loads: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl CountingLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl HandlerLoader for CountingLoader {
    fn load(&self, root: &Path, file: &Path) -> BoxFuture<'static, Result<Arc<dyn Handler>, FuncError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(root, file)
    }
}
