//! Handler loading.
//!
//! # Responsibilities
//! - Turn a resolved handler file into an invocable [`Handler`]
//! - In-process registry for embedders (`StaticLoader`)
//! - Interpreter-backed execution of handler files (`ProcessLoader`)
//!
//! # Design Decisions
//! - Loading is async and fallible; failures surface as request errors
//! - Process handlers speak JSON: event + context on stdin, `Reply` on stdout
//! - A process is spawned per invocation; the loaded handler is only the
//!   resolved command line, so caching it is cheap and safe

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ServerConfig;
use crate::error::FuncError;
use crate::func::{Context, Event, Handler, HandlerFuture, Output, Reply};

/// Loads the handler stored in a resolved file.
pub trait HandlerLoader: Send + Sync {
    fn load(&self, root: &Path, file: &Path) -> BoxFuture<'static, Result<Arc<dyn Handler>, FuncError>>;

    /// Called once the server socket is bound.
    fn listening(&self, _addr: SocketAddr) {}
}

/// Registry of in-process handlers keyed by file path relative to the root.
///
/// The file must still exist on disk for routing to pick it; the registry
/// only supplies the code behind it.
#[derive(Default, Clone)]
pub struct StaticLoader {
    handlers: Arc<DashMap<PathBuf, Arc<dyn Handler>>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the file at `relative` (e.g. `users/list.func.ts`).
    pub fn register<H>(&self, relative: impl Into<PathBuf>, handler: H) -> &Self
    where
        H: Handler + 'static,
    {
        self.handlers.insert(relative.into(), Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl HandlerLoader for StaticLoader {
    fn load(&self, root: &Path, file: &Path) -> BoxFuture<'static, Result<Arc<dyn Handler>, FuncError>> {
        let relative = file.strip_prefix(root).unwrap_or(file);
        let found = self.handlers.get(relative).map(|h| Arc::clone(h.value()));
        let display = relative.display().to_string();

        Box::pin(async move {
            found.ok_or_else(|| FuncError::handler(format!("No handler registered for {display}")))
        })
    }
}

/// Runs handler files through an interpreter chosen by file extension.
///
/// `FaasLocal` points at the configured port until the server binds, then
/// at the bound one.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    interpreters: HashMap<String, Vec<String>>,
    env: Vec<(String, String)>,
    configured_local: String,
    bound_local: Arc<OnceLock<String>>,
}

impl ProcessLoader {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            interpreters: config.loader.interpreters.clone(),
            env: vec![
                ("FaasEnv".to_string(), config.mode.env.as_str().to_string()),
                ("FaasMode".to_string(), config.mode.deploy.clone()),
            ],
            configured_local: config.local_base_url(),
            bound_local: Arc::new(OnceLock::new()),
        }
    }

    /// Environment handed to every handler process.
    pub fn env(&self) -> Vec<(String, String)> {
        let local = self
            .bound_local
            .get()
            .cloned()
            .unwrap_or_else(|| self.configured_local.clone());
        let mut env = self.env.clone();
        env.push(("FaasLocal".to_string(), local));
        env
    }
}

impl HandlerLoader for ProcessLoader {
    fn load(&self, _root: &Path, file: &Path) -> BoxFuture<'static, Result<Arc<dyn Handler>, FuncError>> {
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        let command = self.interpreters.get(&ext).cloned();
        let file = file.to_path_buf();
        let env = self.env();

        Box::pin(async move {
            let Some((program, args)) = command.as_deref().and_then(|c| c.split_first()) else {
                return Err(FuncError::handler(format!(
                    "No interpreter configured for .{ext} files"
                )));
            };

            tracing::debug!(file = %file.display(), program = %program, "Loaded process handler");
            let handler: Arc<dyn Handler> = Arc::new(ProcessHandler {
                program: program.clone(),
                args: args.to_vec(),
                file,
                env,
            });
            Ok(handler)
        })
    }

    fn listening(&self, addr: SocketAddr) {
        let _ = self.bound_local.set(format!("http://localhost:{}", addr.port()));
    }
}

/// One interpreter invocation per call.
#[derive(Debug, Clone)]
struct ProcessHandler {
    program: String,
    args: Vec<String>,
    file: PathBuf,
    env: Vec<(String, String)>,
}

impl Handler for ProcessHandler {
    fn call(&self, event: Event, context: Context) -> HandlerFuture {
        let this = self.clone();
        Box::pin(async move { this.run(event, context).await })
    }
}

impl ProcessHandler {
    async fn run(&self, event: Event, context: Context) -> Result<Output, FuncError> {
        let config = serde_json::to_value(context.config.values())
            .map_err(|e| FuncError::handler(format!("Unserializable config: {e}")))?;
        let payload = serde_json::json!({
            "event": event,
            "context": {
                "request_id": context.request_id,
                "config": config,
            },
        });
        let input = serde_json::to_vec(&payload)
            .map_err(|e| FuncError::handler(format!("Unserializable event: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.file)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FuncError::handler(format!("Failed to start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    tracing::debug!(error = %e, "Handler closed stdin early");
                }
            });
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FuncError::handler(format!("Handler process failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.file.display(), output.status)
            } else {
                stderr
            };
            return Err(FuncError::handler(message));
        }

        parse_output(&output.stdout)
    }
}

/// Interpret what a process handler printed.
pub fn parse_output(stdout: &[u8]) -> Result<Output, FuncError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Output::Empty);
    }

    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| FuncError::handler(format!("Invalid handler output: {e}")))?;

    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        let status = error
            .get("statusCode")
            .and_then(|s| s.as_u64())
            .and_then(|s| u16::try_from(s).ok());
        return Err(FuncError::Handler { message, status });
    }

    let reply: Reply = serde_json::from_value(value)
        .map_err(|e| FuncError::handler(format!("Invalid handler output: {e}")))?;
    Ok(Output::Reply(reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reply() {
        let out = parse_output(br#"{"statusCode":201,"body":"ok"}"#).unwrap();
        let Output::Reply(reply) = out else {
            panic!("expected reply");
        };
        assert_eq!(reply.status_code, Some(201));
        assert_eq!(reply.body.as_deref(), Some("ok"));
    }

    #[test]
    fn parses_error_shape() {
        let err = parse_output(br#"{"error":{"message":"nope","statusCode":403}}"#).unwrap_err();
        assert_eq!(err.message(), "nope");
        assert_eq!(err.status().as_u16(), 403);
    }

    #[test]
    fn empty_output_is_empty() {
        assert!(matches!(parse_output(b" \n").unwrap(), Output::Empty));
    }

    #[test]
    fn garbage_output_is_handler_error() {
        let err = parse_output(b"hello").unwrap_err();
        assert!(err.message().starts_with("Invalid handler output"));
    }

    #[tokio::test]
    async fn static_loader_lookup() {
        let loader = StaticLoader::new();
        loader.register("a.func.ts", |_e: Event, _c: Context| async {
            Ok::<_, FuncError>(Output::Empty)
        });

        let root = Path::new("/srv");
        assert!(loader.load(root, &root.join("a.func.ts")).await.is_ok());
        let err = loader.load(root, &root.join("b.func.ts")).await.err().unwrap();
        assert!(err.message().contains("b.func.ts"));
    }

    #[tokio::test]
    async fn process_loader_requires_interpreter() {
        let loader = ProcessLoader::new(&ServerConfig::default());
        let err = loader
            .load(Path::new("/srv"), Path::new("/srv/a.func.rb"))
            .await
            .err()
            .unwrap();
        assert!(err.message().contains(".rb"));
    }

    #[test]
    fn faas_local_follows_bound_port() {
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        let loader = ProcessLoader::new(&config);

        let local = |loader: &ProcessLoader| {
            loader
                .env()
                .into_iter()
                .find(|(k, _)| k == "FaasLocal")
                .map(|(_, v)| v)
        };
        assert_eq!(local(&loader).as_deref(), Some("http://localhost:0"));

        loader.listening("127.0.0.1:41234".parse().unwrap());
        assert_eq!(local(&loader).as_deref(), Some("http://localhost:41234"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("echo.func.sh");
        std::fs::write(
            &file,
            "cat > /dev/null\nprintf '{\"statusCode\":200,\"body\":\"%s\"}' \"$FaasMode\"\n",
        )
        .unwrap();

        let mut config = ServerConfig::default();
        config.loader.interpreters.insert("sh".into(), vec!["sh".into()]);
        let loader = ProcessLoader::new(&config);
        let handler = loader.load(dir.path(), &file).await.unwrap();

        let event = Event {
            headers: Default::default(),
            http_method: "POST".into(),
            path: "/echo".into(),
            query_string: Default::default(),
            body: String::new(),
            raw: Default::default(),
        };
        let context = Context {
            request_id: "req".into(),
            config: Arc::new(Default::default()),
        };
        let Output::Reply(reply) = handler.call(event, context).await.unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.body.as_deref(), Some("mono"));
    }
}
