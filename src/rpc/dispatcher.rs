// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Request/response correlation and notification routing.
//!
//! One reader task per connection decodes frames and either completes a
//! pending call or hands a notification to its registered handler. Callers
//! on any task send requests through the shared [`Transport`], whose write
//! lock keeps frames whole.
//!
//! Async callbacks and notification handlers run inline on the reader task.
//! They must return quickly: while one runs, no other reply is delivered. A
//! panic inside one is logged and contained to that invocation.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::error::{ProtocolError, RpcError};
use super::framing;
use super::message::{Message, NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use super::transport::{Transport, TransportReader};

/// Our ids start just above this value.
pub const ID_BASE: i64 = 155;

/// How often expired async calls are swept.
const ASYNC_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a call: the `result` value, or why there is none.
pub type Reply = Result<Value, RpcError>;

/// Continuation for [`Dispatcher::call_async`].
pub type Callback = Box<dyn FnOnce(Reply) + Send + 'static>;

/// Receives the `params` of one notification method.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

enum PendingCall {
    Sync(oneshot::Sender<Reply>),
    Async {
        method: String,
        timeout: Duration,
        deadline: Instant,
        callback: Callback,
    },
}

/// Runs a handler or callback, logging a panic instead of unwinding the task.
fn run_contained(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("{} panicked; the connection keeps running", what);
    }
}

/// State touched by both caller tasks and the reader task.
struct Shared {
    transport: Arc<Transport>,
    pending: Mutex<HashMap<i64, PendingCall>>,
    handlers: RwLock<HashMap<String, NotificationHandler>>,
    running: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<i64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending call unless the connection already stopped.
    fn register(&self, id: i64, call: PendingCall) -> Result<(), RpcError> {
        let mut pending = self.pending();
        if !self.running.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }
        pending.insert(id, call);
        Ok(())
    }

    fn remove(&self, id: i64) -> Option<PendingCall> {
        self.pending().remove(&id)
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<(), RpcError> {
        let body = serde_json::to_vec(message)?;
        trace!(
            "Sending to {}: {}",
            self.transport.label(),
            String::from_utf8_lossy(&body)
        );
        let frame = framing::encode(&body);
        self.transport.write(&frame).await?;
        self.transport.flush().await
    }

    fn deliver(&self, id: &RequestId, outcome: Result<Value, ProtocolError>) {
        let call = match id {
            RequestId::Number(n) => self.remove(*n),
            RequestId::String(_) => None,
        };

        match call {
            Some(PendingCall::Sync(tx)) => {
                // The caller may have timed out between lookup and send.
                let _ = tx.send(outcome.map_err(RpcError::Protocol));
            }
            Some(PendingCall::Async {
                method, callback, ..
            }) => {
                let reply = outcome.map_err(RpcError::Protocol);
                run_contained(&format!("Callback for '{method}'"), || callback(reply));
            }
            None => warn!("Dropping reply for unknown request id {}", id),
        }
    }

    fn notify_handler(&self, method: &str, params: Value) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned();
        match handler {
            Some(handler) => {
                run_contained(&format!("Handler for '{method}'"), || handler(params));
            }
            None => debug!("No handler for notification '{}', dropping", method),
        }
    }

    /// Moves the connection to `stopped` and releases every waiter.
    fn shutdown(&self, reason: &str) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending();
            if !self.running.swap(false, Ordering::SeqCst) {
                return;
            }
            pending.drain().map(|(_, call)| call).collect()
        };

        let mut dropped_async = 0usize;
        for call in drained {
            match call {
                PendingCall::Sync(tx) => {
                    let _ = tx.send(Err(RpcError::Transport(reason.to_string())));
                }
                PendingCall::Async { .. } => dropped_async += 1,
            }
        }

        if dropped_async > 0 {
            warn!(
                "{}: {} async callback(s) will never be invoked",
                self.transport.label(),
                dropped_async
            );
        }
        info!("{} connection stopped: {}", self.transport.label(), reason);
        self.closed_tx.send_replace(true);
    }

    /// Fails async calls whose deadline has passed.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<PendingCall> = {
            let mut pending = self.pending();
            let ids: Vec<i64> = pending
                .iter()
                .filter_map(|(id, call)| match call {
                    PendingCall::Async { deadline, .. } if *deadline <= now => Some(*id),
                    _ => None,
                })
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        for call in expired {
            if let PendingCall::Async {
                method,
                timeout,
                callback,
                ..
            } = call
            {
                debug!("Async request '{}' expired after {:?}", method, timeout);
                let what = format!("Callback for '{method}'");
                run_contained(&what, || callback(Err(RpcError::Timeout { method, timeout })));
            }
        }
    }
}

/// Drops a sync call's pending entry when its caller goes away.
///
/// Covers callers cancelled mid-wait (an outer timeout, `select!`, or an
/// aborted task). Once the reply was delivered the removal is a no-op.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove(self.id);
    }
}

/// Moves the connection to `stopped` however the reader task ends.
struct StopOnExit(Arc<Shared>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.shutdown("reader task ended");
    }
}

/// Owns the reader task of one connection and correlates calls on it.
pub struct Dispatcher {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    async_timeout: Duration,
    reader_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
}

impl Dispatcher {
    /// Takes the transport's read side and starts the reader task.
    ///
    /// `async_timeout` bounds how long an async callback may wait for its
    /// reply before it is invoked with a timeout error.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the read side was already taken.
    pub fn start(transport: Arc<Transport>, async_timeout: Duration) -> Result<Self, RpcError> {
        let reader = transport
            .take_reader()
            .ok_or_else(|| RpcError::Transport("transport reader already taken".into()))?;

        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            transport,
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(true),
            closed_tx,
        });

        let reader_handle = tokio::spawn(reader_task(shared.clone(), reader));
        let sweeper_handle = tokio::spawn(sweeper_task(shared.clone()));

        Ok(Self {
            shared,
            next_id: AtomicI64::new(ID_BASE),
            async_timeout,
            reader_handle,
            sweeper_handle,
        })
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Routes notifications named `method` to `handler`, replacing any
    /// earlier handler for that method.
    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// - `Protocol` if the server replied with an error object.
    /// - `Timeout` if no reply arrived within `timeout`; the pending entry
    ///   is removed and a late reply is dropped.
    /// - `Transport`/`ConnectionClosed` if the connection is or goes down.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Reply {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.register(id, PendingCall::Sync(tx))?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let request = RequestMessage::new(RequestId::Number(id), method, params);
        self.shared.send(&request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                debug!("No reply to '{}' (id {}) within {:?}", method, id, timeout);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends a request and returns its id without waiting.
    ///
    /// `callback` runs on the reader task when the reply arrives, or with a
    /// timeout error once the async deadline passes. It is never invoked if
    /// the connection dies first; watch [`Self::closed`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is stopped or the write fails. The
    /// callback is dropped uninvoked in that case.
    pub async fn call_async<F>(
        &self,
        method: &str,
        params: Value,
        callback: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        let id = self.next_id();
        self.shared.register(
            id,
            PendingCall::Async {
                method: method.to_string(),
                timeout: self.async_timeout,
                deadline: Instant::now() + self.async_timeout,
                callback: Box::new(callback),
            },
        )?;

        let request = RequestMessage::new(RequestId::Number(id), method, params);
        if let Err(e) = self.shared.send(&request).await {
            self.shared.remove(id);
            return Err(e);
        }
        Ok(RequestId::Number(id))
    }

    /// Sends a notification. No id, no reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is stopped or the write fails.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if !self.is_running() {
            return Err(RpcError::ConnectionClosed);
        }
        self.shared
            .send(&NotificationMessage::new(method, params))
            .await
    }

    /// True while the reader task is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// True while the reader runs and the server process has not exited.
    pub fn is_alive(&self) -> bool {
        self.is_running() && self.shared.transport.is_alive()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }

    /// True if `id` is still waiting for a reply.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        match id {
            RequestId::Number(n) => self.shared.pending().contains_key(n),
            RequestId::String(_) => false,
        }
    }

    /// Resolves once the connection has stopped.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.shared.transport
    }

    /// Stops the server process and releases all waiters.
    pub async fn stop(&self) {
        self.shared.transport.stop().await;
        self.shared.shutdown("connection stopped by client");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.sweeper_handle.abort();
    }
}

async fn reader_task(shared: Arc<Shared>, mut reader: TransportReader) {
    let _stop = StopOnExit(shared.clone());
    let reason = loop {
        let body = match framing::decode(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break "server closed its output".to_string(),
            Err(e) => {
                error!("Reading from {} failed: {}", shared.transport.label(), e);
                break e.to_string();
            }
        };
        trace!(
            "Received from {}: {}",
            shared.transport.label(),
            String::from_utf8_lossy(&body)
        );

        let message = match Message::parse(&body) {
            Ok(Some(message)) => message,
            Ok(None) => {
                warn!(
                    "Dropping unrecognized message: {}",
                    String::from_utf8_lossy(&body)
                );
                continue;
            }
            Err(e) => {
                error!("Malformed JSON from {}: {}", shared.transport.label(), e);
                break format!("malformed JSON body: {e}");
            }
        };

        match message {
            Message::Response { id, outcome } => shared.deliver(&id, outcome),
            Message::Notification { method, params } => shared.notify_handler(&method, params),
            Message::Request { id, method, .. } => {
                debug!("Server request '{}' (id {}) is not supported", method, id);
                let reply = ResponseMessage::error(
                    id,
                    ProtocolError::new(
                        ProtocolError::METHOD_NOT_FOUND,
                        format!("Method '{method}' not supported by client"),
                    ),
                );
                // Off the reader task so a full stdin pipe cannot stall reads.
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = shared.send(&reply).await {
                        warn!("Failed to answer server request: {}", e);
                    }
                });
            }
        }
    };

    shared.shutdown(&reason);
}

async fn sweeper_task(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(ASYNC_SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while shared.running.load(Ordering::SeqCst) {
        interval.tick().await;
        shared.sweep_expired();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap for brevity and panic inside handlers on purpose"
)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// The far end of an in-memory connection, playing the server.
    struct FakeServer {
        reader: TransportReader,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let body = framing::decode(&mut self.reader).await.unwrap().unwrap();
            serde_json::from_slice(&body).unwrap()
        }

        async fn send(&mut self, value: &Value) {
            let frame = framing::encode(value.to_string().as_bytes());
            self.writer.write_all(&frame).await.unwrap();
        }
    }

    fn connect(async_timeout: Duration) -> (Dispatcher, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let transport = Arc::new(Transport::from_streams(
            "fake",
            Box::new(client_in),
            Box::new(client_out),
        ));
        let dispatcher = Dispatcher::start(transport, async_timeout).unwrap();
        let server = FakeServer {
            reader: TransportReader::new(Box::new(server_in)),
            writer: server_out,
        };
        (dispatcher, server)
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let call = dispatcher.call("initialize", json!({"processId": 1}), Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            assert_eq!(req["method"], "initialize");
            assert_eq!(req["id"], ID_BASE + 1);
            server
                .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":{"capabilities":{}}}))
                .await;
        };

        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!({"capabilities":{}}));
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_is_protocol_error() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let call = dispatcher.call("bogus", Value::Null, Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            assert!(req.get("params").is_none());
            server
                .send(&json!({
                    "jsonrpc":"2.0","id":req["id"],
                    "error":{"code":-32601,"message":"method not found"}
                }))
                .await;
        };

        let (result, ()) = tokio::join!(call, serve);
        let err = result.unwrap_err();
        assert_eq!(err.as_protocol().map(|e| e.code), Some(-32601));
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_error_reply_with_null_result_fails_fast() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let call = dispatcher.call("textDocument/definition", json!({}), Duration::from_secs(30));
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({
                    "jsonrpc":"2.0","id":req["id"],"result":null,
                    "error":{"code":-32601,"message":"method not found"}
                }))
                .await;
        };

        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap_err().as_protocol().map(|e| e.code), Some(-32601));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_reply_without_result_or_error_fails_fast() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let call = dispatcher.call("textDocument/hover", json!({}), Duration::from_secs(30));
        let serve = async {
            let req = server.recv().await;
            server.send(&json!({"jsonrpc":"2.0","id":req["id"]})).await;
        };

        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(
            result.unwrap_err().as_protocol().map(|e| e.code),
            Some(ProtocolError::INTERNAL_ERROR)
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_their_own_replies() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        const N: usize = 16;

        let calls = futures::future::join_all(
            (0..N).map(|n| dispatcher.call("echo", json!({"n": n}), Duration::from_secs(5))),
        );
        let serve = async {
            let mut ids = Vec::new();
            for _ in 0..N {
                let req = server.recv().await;
                ids.push((req["id"].clone(), req["params"]["n"].clone()));
            }
            // Reply in an interleaved order: odds reversed, then evens.
            let (odd, even): (Vec<_>, Vec<_>) =
                ids.into_iter().enumerate().partition(|(i, _)| i % 2 == 1);
            for (_, (id, n)) in odd.into_iter().rev().chain(even) {
                server
                    .send(&json!({"jsonrpc":"2.0","id":id,"result":{"echo":n}}))
                    .await;
            }
        };

        let (results, ()) = tokio::join!(calls, serve);
        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!({"echo": n}));
        }
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let result = dispatcher
            .call("textDocument/hover", json!({}), Duration::from_millis(50))
            .await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(dispatcher.pending_len(), 0);

        // A late reply is dropped and the connection keeps working.
        let late = server.recv().await;
        server
            .send(&json!({"jsonrpc":"2.0","id":late["id"],"result":null}))
            .await;

        let call = dispatcher.call("shutdown", Value::Null, Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":null}))
                .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_cancelled_caller_leaves_no_pending_entry() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        let outer = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.call("textDocument/hover", json!({}), Duration::from_secs(60)),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(dispatcher.pending_len(), 0);

        // The orphaned reply is dropped and later calls are unaffected.
        let orphan = server.recv().await;
        server
            .send(&json!({"jsonrpc":"2.0","id":orphan["id"],"result":null}))
            .await;
        let call = dispatcher.call("shutdown", Value::Null, Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":"ok"}))
                .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_end_of_stream_releases_blocked_callers() {
        let (dispatcher, server) = connect(Duration::from_secs(5));

        let call = dispatcher.call("initialize", json!({}), Duration::from_secs(30));
        let hang_up = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(server);
        };

        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(call, hang_up);
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));

        dispatcher.closed().await;
        assert!(!dispatcher.is_running());
        assert!(matches!(
            dispatcher.call("x", Value::Null, Duration::from_secs(1)).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            dispatcher.notify("x", Value::Null).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_stops_connection() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        server.writer.write_all(b"Bogus-Header\r\n\r\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), dispatcher.closed())
            .await
            .unwrap();
        assert!(!dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_async_callback_runs_on_reply() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();

        let id = dispatcher
            .call_async("textDocument/definition", json!({}), move |reply| {
                let _ = tx.send(reply);
            })
            .await
            .unwrap();
        assert!(dispatcher.is_pending(&id));

        let req = server.recv().await;
        assert_eq!(serde_json::from_value::<RequestId>(req["id"].clone()).unwrap(), id);
        server
            .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":[1,2]}))
            .await;

        assert_eq!(rx.await.unwrap().unwrap(), json!([1, 2]));
        assert!(!dispatcher.is_pending(&id));
    }

    #[tokio::test]
    async fn test_async_callback_expires() {
        let (dispatcher, _server) = connect(Duration::from_millis(50));
        let (tx, rx) = oneshot::channel();

        dispatcher
            .call_async("textDocument/references", json!({}), move |reply| {
                let _ = tx.send(reply);
            })
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.unwrap_err().is_timeout());
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_notifications_routed_and_unknown_dropped() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        dispatcher.on_notification("window/logMessage", move |params| {
            let _ = tx.send(params);
        });

        server
            .send(&json!({
                "jsonrpc":"2.0","method":"textDocument/publishDiagnostics",
                "params":{"uri":"file:///a.py","diagnostics":[]}
            }))
            .await;
        server
            .send(&json!({"jsonrpc":"2.0","method":"window/logMessage","params":{"message":"hi"}}))
            .await;

        let params = rx.recv().await.unwrap();
        assert_eq!(params["message"], "hi");
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_reader() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        dispatcher.on_notification("boom", |_| panic!("handler blew up"));

        server
            .send(&json!({"jsonrpc":"2.0","method":"boom","params":{}}))
            .await;

        let call = dispatcher.call("x", Value::Null, Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":1}))
                .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!(1));
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_kill_reader() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));

        dispatcher
            .call_async("textDocument/definition", json!({}), |_| {
                panic!("callback blew up")
            })
            .await
            .unwrap();
        let req = server.recv().await;
        server
            .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":[]}))
            .await;

        let call = dispatcher.call("x", Value::Null, Duration::from_secs(5));
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({"jsonrpc":"2.0","id":req["id"],"result":2}))
                .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!(2));
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_server_request_answered_with_method_not_found() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        server
            .send(&json!({
                "jsonrpc":"2.0","id":"cfg",
                "method":"workspace/configuration","params":{}
            }))
            .await;

        let reply = server.recv().await;
        assert_eq!(reply["id"], "cfg");
        assert_eq!(reply["error"]["code"], ProtocolError::METHOD_NOT_FOUND);
        assert!(dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_notify_has_no_id() {
        let (dispatcher, mut server) = connect(Duration::from_secs(5));
        dispatcher
            .notify("initialized", json!({}))
            .await
            .unwrap();
        let msg = server.recv().await;
        assert_eq!(msg["method"], "initialized");
        assert!(msg.get("id").is_none());
        assert_eq!(dispatcher.pending_len(), 0);
    }
}
