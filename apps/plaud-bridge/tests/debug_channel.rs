use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{
    ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    State,
};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

use plaud_bridge::channel::{ChannelOptions, ChannelState, ExecutionResult, RemoteChannel};
use plaud_bridge::session::{SessionApi, SessionProxy};
use plaud_bridge::target::{DebugEndpoint, ProcessHandle, ProcessLocator, Signaler};
use plaud_bridge::BridgeError;

/// What the mock inspector does with the next evaluation it receives.
#[derive(Clone, Debug)]
enum Reply {
    /// Close the socket without answering.
    Hangup,
    /// Keep the socket open and never answer.
    Silent,
    /// Answer with an id that belongs to no request.
    WrongId,
    /// Emit an event first, then the string result.
    EventThen(String),
    Text(String),
    Throw { description: String, status: i64 },
}

#[derive(Clone, Default)]
struct Inspector {
    inner: Arc<InspectorState>,
}

#[derive(Default)]
struct InspectorState {
    addr: Mutex<Option<SocketAddr>>,
    listening: AtomicBool,
    listing_hits: AtomicUsize,
    connections: AtomicUsize,
    replies: Mutex<VecDeque<Reply>>,
    expressions: Mutex<Vec<String>>,
    /// Debugger URL to list instead of this inspector's own socket.
    advertised: Mutex<Option<String>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Inspector {
    fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.inner.replies.lock().extend(replies);
    }

    fn listing_hits(&self) -> usize {
        self.inner.listing_hits.load(Ordering::SeqCst)
    }

    fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    fn addr(&self) -> SocketAddr {
        let bound = *self.inner.addr.lock();
        bound.expect("bound address")
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr())
    }

    fn advertise(&self, url: Option<String>) {
        *self.inner.advertised.lock() = url;
    }

    /// Stops the server and waits until its port refuses connections.
    async fn stop(&self) {
        if let Some(tx) = self.inner.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let addr = self.addr();
        let deadline = Instant::now() + Duration::from_secs(5);
        while TcpStream::connect(addr).await.is_ok() {
            assert!(Instant::now() < deadline, "inspector kept accepting");
            sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn listing(State(inspector): State<Inspector>) -> impl IntoResponse {
    inspector.inner.listing_hits.fetch_add(1, Ordering::SeqCst);
    if !inspector.inner.listening.load(Ordering::SeqCst) {
        return Json(json!([]));
    }
    let url = inspector
        .inner
        .advertised
        .lock()
        .clone()
        .unwrap_or_else(|| inspector.ws_url());
    Json(json!([{
        "id": "0f4c7a",
        "type": "node",
        "title": "Plaud",
        "webSocketDebuggerUrl": url
    }]))
}

async fn upgrade(State(inspector): State<Inspector>, ws: WebSocketUpgrade) -> impl IntoResponse {
    inspector.inner.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| answer(socket, inspector))
}

async fn answer(mut socket: WebSocket, inspector: Inspector) {
    let Some(Ok(WsMessage::Text(text))) = socket.recv().await else {
        return;
    };
    let request: Value = serde_json::from_str(&text).expect("request json");
    assert_eq!(request["method"], json!("Runtime.evaluate"));
    assert_eq!(request["params"]["awaitPromise"], json!(true));
    assert_eq!(request["params"]["returnByValue"], json!(true));
    let id = request["id"].as_u64().expect("request id");
    inspector.inner.expressions.lock().push(
        request["params"]["expression"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    );

    let reply = inspector
        .inner
        .replies
        .lock()
        .pop_front()
        .unwrap_or(Reply::Text("null".into()));
    let frames = match reply {
        Reply::Hangup => return,
        Reply::Silent => Vec::new(),
        Reply::WrongId => vec![string_result(id + 1000, "{}")],
        Reply::EventThen(body) => vec![
            json!({"method": "Runtime.consoleAPICalled", "params": {"type": "log"}}),
            string_result(id, &body),
        ],
        Reply::Text(body) => vec![string_result(id, &body)],
        Reply::Throw {
            description,
            status,
        } => vec![json!({
            "id": id,
            "result": {
                "result": {"type": "object", "subtype": "error", "description": description},
                "exceptionDetails": {
                    "text": "Uncaught (in promise)",
                    "exception": {
                        "type": "object",
                        "subtype": "error",
                        "description": description,
                        "value": {"status": status}
                    }
                }
            }
        })],
    };
    for frame in frames {
        if socket.send(WsMessage::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    // hold the socket until the client closes it
    while let Some(Ok(_)) = socket.recv().await {}
}

fn string_result(id: u64, body: &str) -> Value {
    json!({"id": id, "result": {"result": {"type": "string", "value": body}}})
}

async fn start_inspector(listening: bool) -> Inspector {
    let inspector = Inspector::default();
    inspector.inner.listening.store(listening, Ordering::SeqCst);

    let router = Router::new()
        .route("/json", get(listing))
        .route("/ws", get(upgrade))
        .with_state(inspector.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    *inspector.inner.addr.lock() = Some(addr);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *inspector.inner.shutdown.lock() = Some(shutdown_tx);
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    inspector
}

struct FixedProcess(Option<u32>);

impl ProcessLocator for FixedProcess {
    fn locate(&self) -> Option<ProcessHandle> {
        self.0.map(|pid| ProcessHandle { pid, exe: None })
    }
}

/// Opens the inspector when signalled, like the real runtime does on SIGUSR1.
struct OpenOnSignal {
    inspector: Inspector,
    signals: AtomicUsize,
}

impl Signaler for OpenOnSignal {
    fn signal(&self, _pid: u32) -> std::io::Result<()> {
        self.signals.fetch_add(1, Ordering::SeqCst);
        self.inspector.inner.listening.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn options(inspector: &Inspector) -> ChannelOptions {
    options_with_deadline(inspector, Duration::from_secs(3))
}

fn options_with_deadline(inspector: &Inspector, call_timeout: Duration) -> ChannelOptions {
    let addr = inspector.addr();
    ChannelOptions {
        endpoint: DebugEndpoint::new(addr.ip().to_string(), addr.port()),
        call_timeout,
        socket_timeout: Duration::from_secs(1),
        activation_wait: Duration::from_secs(2),
    }
}

fn channel(inspector: &Inspector) -> RemoteChannel {
    let signaler = Arc::new(OpenOnSignal {
        inspector: inspector.clone(),
        signals: AtomicUsize::new(0),
    });
    RemoteChannel::new(options(inspector), Arc::new(FixedProcess(None)), signaler)
}

#[test_timeout::tokio_timeout_test(20)]
async fn evaluation_reuses_discovered_target() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::Text(r#"{"ok":1}"#.into()), Reply::Text("7".into())]);
    let channel = channel(&inspector);

    let first = channel.evaluate("1 + 1").await.expect("first call");
    assert_eq!(first, ExecutionResult::Value(json!({"ok": 1})));
    assert!(matches!(channel.state(), ChannelState::ConnectedIdle { .. }));

    let second = channel.evaluate("6 + 1").await.expect("second call");
    assert_eq!(second, ExecutionResult::Value(json!(7)));
    assert_eq!(inspector.listing_hits(), 1);
    assert_eq!(inspector.connections(), 2);
}

#[test_timeout::tokio_timeout_test(20)]
async fn events_before_the_reply_are_skipped() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::EventThen("plain text".into())]);
    let channel = channel(&inspector);

    let result = channel.evaluate("'plain text'").await.expect("call");
    assert_eq!(result, ExecutionResult::Value(json!("plain text")));
}

#[test_timeout::tokio_timeout_test(20)]
async fn one_failure_is_retried_after_rediscovery() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::Hangup, Reply::Text("[1,2]".into())]);
    let channel = channel(&inspector);

    let result = channel.evaluate("[1, 2]").await.expect("retried call");
    assert_eq!(result, ExecutionResult::Value(json!([1, 2])));
    assert_eq!(inspector.listing_hits(), 2);
    assert_eq!(inspector.connections(), 2);
}

#[test_timeout::tokio_timeout_test(20)]
async fn two_failures_surface_without_a_third_attempt() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::Hangup, Reply::Hangup, Reply::Text("1".into())]);
    let channel = channel(&inspector);

    let err = channel.evaluate("1").await.expect_err("both attempts fail");
    assert!(matches!(err, BridgeError::Transport(_)), "got {err}");
    assert_eq!(inspector.listing_hits(), 2);
    assert_eq!(inspector.connections(), 2);
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[test_timeout::tokio_timeout_test(20)]
async fn mismatched_reply_ids_are_protocol_errors() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::WrongId, Reply::WrongId]);
    let channel = channel(&inspector);

    let err = channel.evaluate("1").await.expect_err("ids never match");
    assert!(matches!(err, BridgeError::Protocol(_)), "got {err}");
    assert_eq!(inspector.connections(), 2);
}

#[test_timeout::tokio_timeout_test(20)]
async fn thrown_errors_are_not_retried() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::Throw {
        description: "Error: unauthorized".into(),
        status: 401,
    }]);
    let channel = channel(&inspector);

    let result = channel.evaluate("boom()").await.expect("delivered");
    assert_eq!(
        result,
        ExecutionResult::RemoteError {
            description: "Error: unauthorized".into(),
            status: Some(401),
        }
    );
    assert_eq!(inspector.connections(), 1);
}

#[test_timeout::tokio_timeout_test(20)]
async fn closed_channel_is_activated_by_signal() {
    let inspector = start_inspector(false).await;
    inspector.script([Reply::Text("\"ready\"".into())]);
    let signaler = Arc::new(OpenOnSignal {
        inspector: inspector.clone(),
        signals: AtomicUsize::new(0),
    });
    let channel = RemoteChannel::new(
        options(&inspector),
        Arc::new(FixedProcess(Some(4242))),
        signaler.clone(),
    );

    let result = channel.evaluate("'ready'").await.expect("activated call");
    assert_eq!(result, ExecutionResult::Value(json!("ready")));
    assert_eq!(signaler.signals.load(Ordering::SeqCst), 1);
}

#[test_timeout::tokio_timeout_test(20)]
async fn listing_without_targets_and_no_process_is_unavailable() {
    let inspector = start_inspector(false).await;
    let channel = channel(&inspector);

    assert!(!channel.probe().await);
    let err = channel.evaluate("1").await.expect_err("nothing to talk to");
    assert!(matches!(err, BridgeError::Unavailable(_)), "got {err}");
    assert_eq!(channel.state(), ChannelState::Unreachable);
    assert_eq!(inspector.connections(), 0);
}

#[test_timeout::tokio_timeout_test(20)]
async fn session_proxy_runs_the_app_fetch_function() {
    let inspector = start_inspector(true).await;
    inspector.script([
        Reply::Text(r#"{"status":0,"data_file_total":3}"#.into()),
        Reply::Text(r#"{"error":"not logged in"}"#.into()),
    ]);
    let proxy = SessionProxy::new(channel(&inspector), "plaud.request");

    assert!(proxy.is_available().await);
    let payload = proxy.call("file/simple/web", None).await.expect("payload");
    assert_eq!(payload["data_file_total"], json!(3));

    let err = proxy
        .call("file/simple/web", None)
        .await
        .expect_err("signed out");
    match err {
        BridgeError::Api { status, message } => {
            assert_eq!(status, 0);
            assert_eq!(message, "not logged in");
        }
        other => panic!("unexpected error: {other}"),
    }

    let expressions = inspector.inner.expressions.lock();
    assert!(expressions[0].contains(r#"["plaud","request"]"#));
    assert!(expressions[0].contains(r#""file/simple/web""#));
}

#[test_timeout::tokio_timeout_test(20)]
async fn silent_target_misses_the_deadline_on_both_attempts() {
    let inspector = start_inspector(true).await;
    inspector.script([Reply::Silent, Reply::Silent]);
    let channel = RemoteChannel::new(
        options_with_deadline(&inspector, Duration::from_millis(400)),
        Arc::new(FixedProcess(None)),
        Arc::new(OpenOnSignal {
            inspector: inspector.clone(),
            signals: AtomicUsize::new(0),
        }),
    );

    let started = Instant::now();
    let err = channel.evaluate("1").await.expect_err("never answered");
    assert!(matches!(err, BridgeError::Transport(_)), "got {err}");
    assert!(err.to_string().contains("no reply"), "got {err}");
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(inspector.connections(), 2);
    assert_eq!(inspector.listing_hits(), 2);
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[test_timeout::tokio_timeout_test(20)]
async fn stale_cached_address_is_rediscovered() {
    let listing = start_inspector(true).await;
    let previous = start_inspector(true).await;
    listing.advertise(Some(previous.ws_url()));
    previous.script([Reply::Text("1".into())]);
    listing.script([Reply::Text("2".into())]);
    let channel = channel(&listing);

    let first = channel.evaluate("1").await.expect("first call");
    assert_eq!(first, ExecutionResult::Value(json!(1)));
    assert_eq!(
        channel.state(),
        ChannelState::ConnectedIdle {
            debugger_url: previous.ws_url(),
        }
    );

    // the app restarted: the cached socket is gone and the listing points elsewhere
    previous.stop().await;
    listing.advertise(None);

    let second = channel.evaluate("2").await.expect("rediscovered call");
    assert_eq!(second, ExecutionResult::Value(json!(2)));
    assert_eq!(listing.listing_hits(), 2);
    assert_eq!(previous.connections(), 1);
    assert_eq!(listing.connections(), 1);
    assert_eq!(
        channel.state(),
        ChannelState::ConnectedIdle {
            debugger_url: listing.ws_url(),
        }
    );
}

#[test_timeout::tokio_timeout_test(20)]
async fn refused_debugger_address_fails_after_one_retry() {
    let listing = start_inspector(true).await;
    let gone = start_inspector(true).await;
    gone.stop().await;
    listing.advertise(Some(gone.ws_url()));
    let channel = channel(&listing);

    let err = channel.evaluate("1").await.expect_err("nothing accepts");
    assert!(matches!(err, BridgeError::Transport(_)), "got {err}");
    assert_eq!(listing.listing_hits(), 2);
    assert_eq!(listing.connections(), 0);
    assert_eq!(gone.connections(), 0);
    assert_eq!(channel.state(), ChannelState::Disconnected);
}
