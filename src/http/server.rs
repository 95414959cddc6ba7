//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop
//! - Serve each connection with hyper, dispatching through an Axum router
//! - Answer preflight requests directly; queue everything else per path
//! - Drain-then-close: wait for in-flight requests, stop accepting,
//!   destroy open sockets, run `on_close`, flush telemetry
//!
//! # Design Decisions
//! - Connections are served by hand (not `axum::serve`) so each socket's
//!   task can be tracked and aborted on close
//! - Lifecycle state lives in a `watch` channel; concurrent `close` callers
//!   wait for `Closed` instead of repeating the sequence
//! - `Server` is a cheap handle; clones share one instance

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

use crate::config::{ConfigLoader, FileConfigLoader, ServerConfig};
use crate::error::FuncError;
use crate::func::{HandlerCache, HandlerLoader, ProcessLoader};
use crate::http::body;
use crate::http::headers;
use crate::http::processor::{PendingRequest, RequestProcessor};
use crate::http::queue::RequestQueue;
use crate::lifecycle::{shutdown_signal, ErrorReporter, LifecycleState, NoHooks, ServerHooks};
use crate::net::{self, ConnectionTracker, RequestTracker};
use crate::routing::{route_key, RouteResolver};

/// Builder for [`Server`].
pub struct ServerBuilder {
    root: PathBuf,
    config: ServerConfig,
    loader: Option<Arc<dyn HandlerLoader>>,
    configs: Option<Arc<dyn ConfigLoader>>,
    hooks: Option<Arc<dyn ServerHooks>>,
    log_guard: Option<WorkerGuard>,
}

impl ServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`ProcessLoader`].
    pub fn loader(mut self, loader: Arc<dyn HandlerLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Defaults to [`FileConfigLoader`].
    pub fn config_loader(mut self, configs: Arc<dyn ConfigLoader>) -> Self {
        self.configs = Some(configs);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ServerHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Telemetry guard dropped, and so flushed, at the end of `close`.
    pub fn log_guard(mut self, guard: WorkerGuard) -> Self {
        self.log_guard = Some(guard);
        self
    }

    pub fn build(self) -> Server {
        let root = std::path::absolute(&self.root).unwrap_or(self.root);
        let config = self.config;
        let env = config.mode.env;

        let id = Uuid::new_v4().simple().to_string();
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(NoHooks));
        let reporter = ErrorReporter::new(id.as_str(), Arc::clone(&hooks));

        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(ProcessLoader::new(&config)));
        let configs = self
            .configs
            .unwrap_or_else(|| Arc::new(FileConfigLoader::new()));

        let resolver = RouteResolver::new(&root, config.routing.extensions.clone(), env);
        let cache = HandlerCache::new(resolver, loader, configs, env);
        let processor = Arc::new(RequestProcessor::new(
            cache,
            reporter.clone(),
            config.limits.clone(),
            config.compression.clone(),
        ));

        let (state, _) = watch::channel(LifecycleState::Created);

        Server {
            inner: Arc::new(ServerInner {
                id,
                root,
                queue: RequestQueue::new(processor),
                requests: RequestTracker::new(),
                sockets: ConnectionTracker::new(),
                reporter,
                hooks,
                state,
                runtime: Mutex::new(Runtime {
                    local_addr: None,
                    stop: None,
                    accept_task: None,
                    log_guard: self.log_guard,
                }),
                config,
            }),
        }
    }
}

struct Runtime {
    local_addr: Option<SocketAddr>,
    stop: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    log_guard: Option<WorkerGuard>,
}

struct ServerInner {
    id: String,
    root: PathBuf,
    config: ServerConfig,
    queue: Arc<RequestQueue<RequestProcessor>>,
    requests: RequestTracker,
    sockets: ConnectionTracker,
    reporter: ErrorReporter,
    hooks: Arc<dyn ServerHooks>,
    state: watch::Sender<LifecycleState>,
    runtime: Mutex<Runtime>,
}

/// FaaS HTTP server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.inner.id)
            .field("root", &self.inner.root)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// State shared with the dispatch handler.
#[derive(Clone)]
struct DispatchState {
    queue: Arc<RequestQueue<RequestProcessor>>,
    requests: RequestTracker,
}

impl Server {
    pub fn builder(root: impl Into<PathBuf>) -> ServerBuilder {
        ServerBuilder {
            root: root.into(),
            config: ServerConfig::default(),
            loader: None,
            configs: None,
            hooks: None,
            log_guard: None,
        }
    }

    /// Server with the default loaders and no hooks.
    pub fn new(root: impl Into<PathBuf>, config: ServerConfig) -> Self {
        Self::builder(root).config(config).build()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn reporter(&self) -> ErrorReporter {
        self.inner.reporter.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime().local_addr
    }

    /// Requests that arrived but are not fully answered yet.
    pub fn active_requests(&self) -> usize {
        self.inner.requests.active_count()
    }

    pub fn open_sockets(&self) -> usize {
        self.inner.sockets.open_count()
    }

    /// Handlers loaded so far.
    pub fn cached_handlers(&self) -> usize {
        self.inner.queue.processor().cache().len()
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Router that answers preflights and queues everything else.
    pub fn router(&self) -> Router {
        Router::new().fallback(dispatch).with_state(DispatchState {
            queue: Arc::clone(&self.inner.queue),
            requests: self.inner.requests.clone(),
        })
    }

    /// Process one request for route `key` directly, bypassing the path queue.
    pub async fn process_request(&self, key: &str, request: Request<Body>) -> Response<Body> {
        let (reply, response) = oneshot::channel();
        let pending = PendingRequest {
            request,
            requested_at: Instant::now(),
            reply,
            token: self.inner.requests.begin(),
        };
        self.inner.queue.processor().handle(key, pending).await;

        response
            .await
            .unwrap_or_else(|_| fallback_response("No response"))
    }

    /// Bind and start accepting connections.
    ///
    /// Fails if the server was started before or binding fails.
    pub async fn listen(&self) -> Result<SocketAddr, FuncError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == LifecycleState::Created {
                *state = LifecycleState::Listening;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(FuncError::Lifecycle {
                hook: "listen",
                message: "Server already running".to_string(),
            });
        }

        let (listener, addr) = match net::bind(&self.inner.config.listener).await {
            Ok(bound) => bound,
            Err(e) => {
                self.inner.state.send_replace(LifecycleState::Created);
                return Err(FuncError::Transport(e.to_string()));
            }
        };

        self.inner.queue.processor().cache().loader().listening(addr);

        tracing::info!(
            parent: self.inner.reporter.span(),
            "[{}] Listen http://localhost:{} with {}",
            self.inner.config.mode.env,
            addr.port(),
            self.inner.root.display()
        );

        let (stop, stopped) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.router(),
            self.inner.sockets.clone(),
            stopped,
            self.inner.reporter.clone(),
        ));
        {
            let mut runtime = self.runtime();
            runtime.local_addr = Some(addr);
            runtime.stop = Some(stop);
            runtime.accept_task = Some(accept_task);
        }

        let reporter = self.inner.reporter.clone();
        let on_start = self.inner.hooks.on_start(reporter.context());
        tokio::spawn(async move { reporter.run_hook("onStart", on_start).await });

        if self.inner.config.lifecycle.handle_signals {
            let server = self.clone();
            tokio::spawn(async move { server.close_on_signal().await });
        }

        Ok(addr)
    }

    async fn close_on_signal(&self) {
        tokio::select! {
            signal = shutdown_signal() => match signal {
                Ok(signal) => {
                    tracing::info!(parent: self.inner.reporter.span(), "Received {signal}");
                    self.close().await;
                }
                Err(e) => self.inner.reporter.report(FuncError::Lifecycle {
                    hook: "signals",
                    message: e.to_string(),
                }),
            },
            _ = self.closed() => {}
        }
    }

    /// Resolves once the server reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == LifecycleState::Closed).await;
    }

    /// Drain in-flight requests, then release everything. Idempotent.
    pub async fn close(&self) {
        let mut drain = false;
        self.inner.state.send_if_modified(|state| match state {
            LifecycleState::Created => {
                *state = LifecycleState::Closed;
                true
            }
            LifecycleState::Listening => {
                *state = LifecycleState::Draining;
                drain = true;
                true
            }
            LifecycleState::Draining | LifecycleState::Closed => false,
        });

        let span = self.inner.reporter.span().clone();
        if !drain {
            tracing::debug!(parent: &span, state = %self.state(), "Close already requested");
            self.closed().await;
            return;
        }

        let started = Instant::now();
        tracing::info!(parent: &span, "Closing");

        let poll = Duration::from_millis(self.inner.config.lifecycle.drain_poll_ms);
        self.inner.requests.wait_idle(poll).await;

        let (stop, accept_task) = {
            let mut runtime = self.runtime();
            (runtime.stop.take(), runtime.accept_task.take())
        };
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                self.inner
                    .reporter
                    .report(FuncError::Transport(format!("Accept loop failed: {e}")));
            }
        }

        let destroyed = self.inner.sockets.destroy_all();
        tracing::debug!(parent: &span, sockets = destroyed, "Sockets destroyed");

        let on_close = self.inner.hooks.on_close(self.inner.reporter.context());
        self.inner.reporter.run_hook("onClose", on_close).await;

        tracing::info!(
            parent: &span,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Closed"
        );

        let guard = self.runtime().log_guard.take();
        drop(guard);

        self.inner.state.send_replace(LifecycleState::Closed);
    }
}

async fn dispatch(State(state): State<DispatchState>, request: Request<Body>) -> Response<Body> {
    let requested_at = Instant::now();
    let token = state.requests.begin();

    if request.method() == Method::OPTIONS {
        let mut response = Response::new(body::tracked(Body::empty(), token));
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.headers_mut() = headers::preflight_headers(request.headers());
        return response;
    }

    let key = route_key(request.uri().path());
    let (reply, response) = oneshot::channel();
    state.queue.enqueue(
        key,
        PendingRequest {
            request,
            requested_at,
            reply,
            token,
        },
    );

    response
        .await
        .unwrap_or_else(|_| fallback_response("No response"))
}

fn fallback_response(message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": { "message": message } }).to_string();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    sockets: ConnectionTracker,
    mut stop: oneshot::Receiver<()>,
    reporter: ErrorReporter,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => serve_connection(stream, peer, router.clone(), &sockets),
                Err(e) => reporter.report(FuncError::Transport(format!(
                    "Failed to accept connection: {e}"
                ))),
            },
        }
    }
    tracing::debug!(parent: reporter.span(), "Listener closed");
}

fn serve_connection(stream: TcpStream, peer: SocketAddr, router: Router, sockets: &ConnectionTracker) {
    let guard = sockets.track();
    let id = guard.id();
    let service = TowerToHyperService::new(router);

    let task = tokio::spawn(async move {
        let _guard = guard;
        let io = TokioIo::new(stream);
        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Connection error");
        }
    });
    sockets.attach(id, task.abort_handle());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{Context, Event, Output, Reply, StaticLoader};
    use tower::ServiceExt;

    fn server(dir: &tempfile::TempDir) -> Server {
        std::fs::write(dir.path().join("faas.toml"), "[defaults]\n").unwrap();
        std::fs::write(dir.path().join("echo.func.ts"), "").unwrap();

        let loader = StaticLoader::new();
        loader.register("echo.func.ts", |event: Event, _c: Context| async move {
            Ok::<_, FuncError>(Output::Reply(Reply::new().body(event.body)))
        });

        let mut config = ServerConfig::default();
        config.lifecycle.handle_signals = false;
        Server::builder(dir.path())
            .config(config)
            .loader(Arc::new(loader))
            .build()
    }

    #[tokio::test]
    async fn router_answers_preflight_without_listening() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/echo")
            .header("origin", "https://app.test")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://app.test"
        );
        assert_eq!(server.cached_handlers(), 0);
    }

    #[tokio::test]
    async fn router_dispatches_through_queue() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir);

        let request = Request::post("/echo/").body(Body::from("hi")).unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi");
        assert_eq!(server.active_requests(), 0);
    }

    #[tokio::test]
    async fn process_request_bypasses_queue() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir);

        let response = server
            .process_request("echo", Request::post("/echo").body(Body::from("direct")).unwrap())
            .await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&body[..], b"direct");
        assert_eq!(server.cached_handlers(), 1);
    }

    #[tokio::test]
    async fn server_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = server(&dir);
        let b = server(&dir);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), LifecycleState::Created);
        assert_eq!(a.local_addr(), None);
    }

    #[test]
    fn server_and_queue_cross_threads() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<Server>();
        assert_send_sync::<Arc<RequestQueue<RequestProcessor>>>();
        assert_send_sync::<std::sync::Mutex<PendingRequest>>();
    }
}
