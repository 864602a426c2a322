//! Server core: lifecycle, accept loop, and envelope dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccrpc_registry::{RegisteredInterface, Value};
use ccrpc_transport::{Address, BoxConnection, BoxListener};
use ccrpc_wire::{
    decode_call, encode_reply, Handshake, Status, WireError, METHOD_HANDSHAKE, METHOD_PING,
    METHOD_SHUTDOWN,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::RpcError;

/// Grace window used when a stop is triggered remotely.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle states. Transitions are monotonic:
/// `Constructed → Bound → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Bound,
    Running,
    Stopping,
    Stopped,
}

/// A user condition reported by a CRM method.
///
/// Plain failures map to `ERROR_INVALID` with the user's message passed
/// through; a CRM opts into backpressure reporting with [`CrmError::busy`].
#[derive(Debug, Clone)]
pub struct CrmError {
    pub status: Status,
    pub message: String,
}

impl CrmError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CrmError {
            status: Status::ErrorInvalid,
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        CrmError {
            status: Status::Busy,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CrmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for CrmError {}

/// A Core Resource Model: the stateful object a server dispatches into.
///
/// Workers invoke `call` concurrently; an implementation must either be safe
/// under concurrent invocation or serialize internally. `terminate` runs
/// exactly once as part of server stop, after which the CRM is never
/// dispatched to again.
#[async_trait]
pub trait Crm: Send + Sync + 'static {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CrmError>;

    async fn terminate(&self) {}
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Server construction parameters. The interface is always explicit.
pub struct ServerConfig {
    pub name: String,
    pub crm: Arc<dyn Crm>,
    pub interface: Arc<RegisteredInterface>,
    pub bind_address: Address,
    on_shutdown: Option<ShutdownHook>,
    call_deadline: Option<Duration>,
    max_payload: usize,
}

impl ServerConfig {
    pub fn new(
        name: impl Into<String>,
        crm: Arc<dyn Crm>,
        interface: Arc<RegisteredInterface>,
        bind_address: Address,
    ) -> Self {
        ServerConfig {
            name: name.into(),
            crm,
            interface,
            bind_address,
            on_shutdown: None,
            call_deadline: None,
            max_payload: ccrpc_wire::max_payload(),
        }
    }

    /// Callback invoked at most once as the last step of `stop()`.
    pub fn on_shutdown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Per-call deadline enforced around the CRM method body.
    pub fn call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = Some(deadline);
        self
    }

    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }
}

struct Shared {
    name: String,
    crm: Arc<dyn Crm>,
    interface: Arc<RegisteredInterface>,
    address: Address,
    call_deadline: Option<Duration>,
    max_payload: usize,
    state_tx: watch::Sender<ServerState>,
    stop_tx: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    on_shutdown: parking_lot::Mutex<Option<ShutdownHook>>,
}

/// A server owning one CRM instance behind one declared interface.
pub struct Server {
    shared: Arc<Shared>,
    start_guard: tokio::sync::Mutex<()>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Constructed);
        let (stop_tx, _) = watch::channel(false);
        Server {
            shared: Arc::new(Shared {
                name: config.name,
                crm: config.crm,
                interface: config.interface,
                address: config.bind_address,
                call_deadline: config.call_deadline,
                max_payload: config.max_payload,
                state_tx,
                stop_tx,
                accept_task: parking_lot::Mutex::new(None),
                workers: parking_lot::Mutex::new(Vec::new()),
                on_shutdown: parking_lot::Mutex::new(config.on_shutdown),
            }),
            start_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state_tx.borrow()
    }

    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    /// Bind the transport and run the accept loop.
    pub async fn start(&self) -> Result<(), RpcError> {
        let _guard = self.start_guard.lock().await;
        if self.state() != ServerState::Constructed {
            return Err(RpcError::invalid("server has already been started")
                .with_address(&self.shared.address));
        }

        let listener = ccrpc_transport::bind(&self.shared.address)
            .await
            .map_err(|e| RpcError::from(e).with_address(&self.shared.address))?;
        self.shared
            .state_tx
            .send_modify(|s| *s = ServerState::Bound);

        tracing::info!(
            server = %self.shared.name,
            address = %self.shared.address,
            interface = %self.shared.interface.id(),
            "server running"
        );
        let handle = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
        *self.shared.accept_task.lock() = Some(handle);
        self.shared
            .state_tx
            .send_modify(|s| *s = ServerState::Running);
        Ok(())
    }

    /// Stop the server: refuse new connections, let in-flight calls finish
    /// within `grace`, terminate the CRM, then run the shutdown hook.
    pub async fn stop(&self, grace: Duration) {
        shutdown_sequence(Arc::clone(&self.shared), grace).await;
    }

    /// Block until the server is stopped, or until `timeout` elapses.
    ///
    /// Returns whether the server reached `Stopped`. A zero timeout never
    /// blocks. Returning `false` does not stop the server.
    pub async fn wait_for_termination(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.shared.state_tx.subscribe();
        if *rx.borrow() == ServerState::Stopped {
            return true;
        }
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                if *rx.borrow() == ServerState::Stopped {
                    return true;
                }
            }
        };
        match timeout {
            None => wait.await,
            Some(t) if t.is_zero() => false,
            Some(t) => tokio::time::timeout(t, wait).await.unwrap_or(false),
        }
    }
}

async fn wait_stop(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(shared: Arc<Shared>, mut listener: BoxListener) {
    let mut stop_rx = shared.stop_tx.subscribe();
    loop {
        tokio::select! {
            _ = wait_stop(&mut stop_rx) => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    let worker = tokio::spawn(run_worker(Arc::clone(&shared), conn));
                    let mut workers = shared.workers.lock();
                    workers.retain(|h| !h.is_finished());
                    workers.push(worker);
                }
                Err(e) => {
                    if !*stop_rx.borrow() {
                        tracing::warn!(server = %shared.name, error = %e, "accept failed");
                    }
                    break;
                }
            },
        }
    }
    let _ = listener.close().await;
}

/// Send a reply envelope; false means the connection is gone.
async fn send_reply(
    shared: &Shared,
    conn: &mut BoxConnection,
    status: Status,
    payload: &[u8],
) -> bool {
    let frame = match encode_reply(status, payload, shared.max_payload) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(server = %shared.name, error = %e, "reply exceeds payload cap");
            match encode_reply(Status::ErrorInvalid, e.to_string().as_bytes(), shared.max_payload)
            {
                Ok(frame) => frame,
                Err(_) => return false,
            }
        }
    };
    if let Err(e) = conn.send(&frame).await {
        tracing::debug!(server = %shared.name, error = %e, "send failed, closing connection");
        return false;
    }
    true
}

async fn run_worker(shared: Arc<Shared>, mut conn: BoxConnection) {
    let mut stop_rx = shared.stop_tx.subscribe();
    let mut handshaken = false;

    loop {
        if *stop_rx.borrow() {
            break;
        }
        let frame = tokio::select! {
            _ = wait_stop(&mut stop_rx) => break,
            frame = conn.recv() => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %shared.name, error = %e, "connection error");
                break;
            }
        };

        let call = match decode_call(&frame, shared.max_payload) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(server = %shared.name, error = %e, "rejecting bad envelope");
                let fatal = matches!(e, WireError::PayloadTooLarge { .. });
                if !send_reply(&shared, &mut conn, Status::ErrorInvalid, e.to_string().as_bytes())
                    .await
                    || fatal
                {
                    break;
                }
                continue;
            }
        };

        match call.method_id {
            METHOD_PING => {
                if !send_reply(&shared, &mut conn, Status::Success, &[]).await {
                    break;
                }
            }
            METHOD_HANDSHAKE => {
                match Handshake::decode(call.args) {
                    Ok(hs) if shared.interface.descriptor().accepts(&hs) => {
                        handshaken = true;
                        if !send_reply(&shared, &mut conn, Status::Success, &[]).await {
                            break;
                        }
                    }
                    Ok(hs) => {
                        let message = format!(
                            "interface mismatch: client offered {}/{}@{}.{}, server has {}",
                            hs.namespace,
                            hs.name,
                            hs.major,
                            hs.minor,
                            shared.interface.id(),
                        );
                        tracing::warn!(server = %shared.name, %message, "closing connection");
                        send_reply(&shared, &mut conn, Status::ErrorInvalid, message.as_bytes())
                            .await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(server = %shared.name, error = %e, "bad handshake");
                        send_reply(
                            &shared,
                            &mut conn,
                            Status::ErrorInvalid,
                            e.to_string().as_bytes(),
                        )
                        .await;
                        break;
                    }
                }
            }
            METHOD_SHUTDOWN => {
                tracing::info!(server = %shared.name, "shutdown requested by client");
                send_reply(&shared, &mut conn, Status::Success, &[]).await;
                tokio::spawn(shutdown_sequence(Arc::clone(&shared), DEFAULT_STOP_GRACE));
                break;
            }
            _ if !handshaken => {
                send_reply(
                    &shared,
                    &mut conn,
                    Status::ErrorInvalid,
                    b"interface handshake required",
                )
                .await;
                break;
            }
            method_id => {
                let (status, payload) = dispatch(&shared, method_id, call.flags, call.args).await;
                if !status.is_success() && status != Status::Busy {
                    tracing::warn!(
                        server = %shared.name,
                        method_id,
                        status = %status,
                        message = %String::from_utf8_lossy(&payload),
                        "call failed"
                    );
                }
                if !send_reply(&shared, &mut conn, status, &payload).await {
                    break;
                }
            }
        }
    }
    let _ = conn.close().await;
}

/// Decode, invoke, and encode one call. Never panics the worker; every
/// failure becomes a status + message pair.
async fn dispatch(shared: &Shared, method_id: u32, flags: u8, args: &[u8]) -> (Status, Vec<u8>) {
    let plan = match shared.interface.plan(method_id) {
        Some(plan) => plan,
        None => {
            return (
                Status::ErrorInvalid,
                format!("unknown method id {method_id}").into_bytes(),
            )
        }
    };

    let args = match plan.decode_args(flags, args) {
        Ok(args) => args,
        Err(e) => return (Status::ErrorInvalid, e.to_string().into_bytes()),
    };

    let invocation = shared.crm.call(plan.method_name(), args);
    let result = match shared.call_deadline {
        Some(deadline) => match tokio::time::timeout(deadline, invocation).await {
            Ok(result) => result,
            Err(_) => {
                return (
                    Status::ErrorTimeout,
                    b"call deadline exceeded".to_vec(),
                )
            }
        },
        None => invocation.await,
    };

    match result {
        Ok(value) => match plan.encode_ret(&value) {
            Ok(payload) => (Status::Success, payload),
            Err(e) => (Status::ErrorInvalid, e.to_string().into_bytes()),
        },
        Err(crm_err) => (crm_err.status, crm_err.message.into_bytes()),
    }
}

/// The stop sequence. The first caller to claim `Running → Stopping` runs
/// it; everyone else waits for `Stopped`.
async fn shutdown_sequence(shared: Arc<Shared>, grace: Duration) {
    let claimed = shared.state_tx.send_if_modified(|s| {
        if matches!(*s, ServerState::Bound | ServerState::Running) {
            *s = ServerState::Stopping;
            true
        } else {
            false
        }
    });
    if !claimed {
        let mut rx = shared.state_tx.subscribe();
        loop {
            let state = *rx.borrow();
            if state == ServerState::Stopped || state == ServerState::Constructed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    tracing::info!(server = %shared.name, "stopping");
    let _ = shared.stop_tx.send(true);

    // The accept loop closes the listener on its way out, so the address
    // refuses new connections from here on.
    let accept = shared.accept_task.lock().take();
    if let Some(handle) = accept {
        let _ = handle.await;
    }

    // Let in-flight calls finish within the grace window, then cut the rest.
    let deadline = Instant::now() + grace;
    let workers = std::mem::take(&mut *shared.workers.lock());
    for mut worker in workers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, &mut worker).await.is_err() {
            worker.abort();
        }
    }

    shared.crm.terminate().await;

    let hook = shared.on_shutdown.lock().take();
    if let Some(hook) = hook {
        hook();
    }

    shared
        .state_tx
        .send_modify(|s| *s = ServerState::Stopped);
    tracing::info!(server = %shared.name, "stopped");
}
