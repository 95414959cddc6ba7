//! Server lifecycle: listen, drain-then-close, hooks, registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use faas_server::lifecycle::{HookContext, HookFuture, LifecycleState, ServerHooks, ServerRegistry};
use faas_server::{Context, Event, FuncError, Output, Reply, Server, StaticLoader};

mod common;

#[derive(Default)]
struct CountingHooks {
    started: AtomicUsize,
    errors: AtomicUsize,
    closed: AtomicUsize,
}

impl ServerHooks for CountingHooks {
    fn on_start(&self, _ctx: HookContext) -> HookFuture {
        self.started.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn on_error(&self, _error: FuncError, _ctx: HookContext) -> HookFuture {
        self.errors.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn on_close(&self, _ctx: HookContext) -> HookFuture {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err("close hook failed".into()) })
    }
}

fn slow_loader(delay: Duration) -> StaticLoader {
    let loader = StaticLoader::new();
    loader.register("slow.func.ts", move |_e: Event, _c: Context| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, FuncError>(Output::Reply(Reply::new().body("done")))
    });
    loader
}

#[tokio::test]
async fn listen_twice_fails() {
    let test = common::start(Arc::new(StaticLoader::new()), &[]).await;
    assert_eq!(test.server.state(), LifecycleState::Listening);
    assert!(test.server.local_addr().is_some());

    let err = test.server.listen().await.unwrap_err();
    assert_eq!(err.message(), "Server already running");

    test.server.close().await;
}

#[tokio::test]
async fn close_drains_in_flight_requests() {
    let test = common::start(
        Arc::new(slow_loader(Duration::from_millis(300))),
        &["slow.func.ts"],
    )
    .await;

    let in_flight = {
        let url = test.url("/slow");
        tokio::spawn(async move { common::client().post(url).send().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(test.server.active_requests(), 1);

    test.server.close().await;

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(test.server.state(), LifecycleState::Closed);
    assert_eq!(test.server.active_requests(), 0);
    assert_eq!(test.server.open_sockets(), 0);

    let refused = common::client().post(test.url("/slow")).send().await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn concurrent_close_runs_once() {
    let hooks = Arc::new(CountingHooks::default());
    let test = common::start_with(
        Arc::new(slow_loader(Duration::from_millis(150))),
        &["slow.func.ts"],
        Some(hooks.clone()),
    )
    .await;

    let in_flight = {
        let url = test.url("/slow");
        tokio::spawn(async move { common::client().post(url).send().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = test.server.clone();
    let second = test.server.clone();
    tokio::join!(first.close(), second.close());
    assert_eq!(test.server.state(), LifecycleState::Closed);

    test.server.close().await;
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.started.load(Ordering::SeqCst), 1);
    // failing onClose is reported, not propagated
    assert!(hooks.errors.load(Ordering::SeqCst) >= 1);

    assert_eq!(in_flight.await.unwrap().unwrap().status(), 200);
}

#[tokio::test]
async fn idle_keep_alive_sockets_are_destroyed() {
    let loader = StaticLoader::new();
    loader.register("ping.func.ts", |_e: Event, _c: Context| async {
        Ok::<_, FuncError>(Output::Reply(Reply::new().body("pong")))
    });
    let test = common::start(Arc::new(loader), &["ping.func.ts"]).await;
    let client = common::client();

    let response = client.post(test.url("/ping")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "pong");
    assert_eq!(test.server.open_sockets(), 1);

    tokio::time::timeout(Duration::from_secs(2), test.server.close())
        .await
        .unwrap();
    assert_eq!(test.server.open_sockets(), 0);
}

#[tokio::test]
async fn close_before_listen_goes_straight_to_closed() {
    let hooks = Arc::new(CountingHooks::default());
    let root = common::func_root(&[]);
    let server = Server::builder(root.path())
        .config(common::test_config())
        .hooks(hooks.clone())
        .build();

    server.close().await;

    assert_eq!(server.state(), LifecycleState::Closed);
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 0);
    assert!(server.listen().await.is_err());
}

#[tokio::test]
async fn handler_errors_reach_on_error() {
    let hooks = Arc::new(CountingHooks::default());
    let loader = StaticLoader::new();
    loader.register("fail.func.ts", |_e: Event, _c: Context| async {
        Err::<Output, _>(FuncError::with_status(422, "bad input"))
    });
    let test = common::start_with(Arc::new(loader), &["fail.func.ts"], Some(hooks.clone())).await;

    let response = common::client().post(test.url("/fail")).send().await.unwrap();
    assert_eq!(response.status(), 422);
    assert_eq!(hooks.errors.load(Ordering::SeqCst), 1);

    test.server.close().await;
}

#[tokio::test]
async fn registry_closes_every_server() {
    let registry = ServerRegistry::new();
    let a = common::start(Arc::new(StaticLoader::new()), &[]).await;
    let b = common::start(Arc::new(StaticLoader::new()), &[]).await;
    registry.register(a.server.clone());
    registry.register(b.server.clone());

    registry.close_all().await;

    assert!(registry.is_empty());
    assert_eq!(a.server.state(), LifecycleState::Closed);
    assert_eq!(b.server.state(), LifecycleState::Closed);
}
