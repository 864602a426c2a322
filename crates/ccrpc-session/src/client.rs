//! Client proxy: pooled connections, handshake, and call marshaling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ccrpc_registry::{RegisteredInterface, Value};
use ccrpc_transport::{Address, BoxConnection};
use ccrpc_wire::{
    decode_reply, encode_call, METHOD_HANDSHAKE, METHOD_PING, METHOD_SHUTDOWN,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::RpcError;

/// Default bound on pooled connections per proxy.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default wait for a pool slot before failing `ERROR_TIMEOUT`.
pub const DEFAULT_POOL_WAIT: Duration = Duration::from_secs(5);

/// Environment variable overriding the pool bound.
pub const POOL_SIZE_ENV: &str = "CCRPC_POOL_SIZE";

/// Environment variable overriding the default per-call deadline, in
/// milliseconds.
pub const DEFAULT_TIMEOUT_ENV: &str = "CCRPC_DEFAULT_TIMEOUT_MS";

fn env_pool_size() -> Option<usize> {
    static POOL_SIZE: OnceLock<Option<usize>> = OnceLock::new();
    *POOL_SIZE.get_or_init(|| {
        std::env::var(POOL_SIZE_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
    })
}

fn env_call_timeout() -> Option<Duration> {
    static TIMEOUT: OnceLock<Option<Duration>> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        std::env::var(DEFAULT_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    })
}

/// Proxy tuning. Programmatic values take precedence over the environment,
/// the environment over built-in defaults.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub pool_size: usize,
    pub pool_wait: Duration,
    /// Per-call deadline; `None` disables it.
    pub call_timeout: Option<Duration>,
    pub max_payload: usize,
}

impl ProxyConfig {
    /// Defaults for an address: pool of 8 (or `CCRPC_POOL_SIZE`), 5 s pool
    /// wait, and the transport-dependent call deadline (30 s for
    /// tcp/http/ipc, 5 s for memory/thread, or `CCRPC_DEFAULT_TIMEOUT_MS`).
    pub fn for_address(address: &Address) -> Self {
        ProxyConfig {
            pool_size: env_pool_size().unwrap_or(DEFAULT_POOL_SIZE),
            pool_wait: DEFAULT_POOL_WAIT,
            call_timeout: Some(env_call_timeout().unwrap_or(address.default_call_timeout())),
            max_payload: ccrpc_wire::max_payload(),
        }
    }
}

struct ProxyInner {
    address: Address,
    interface: Arc<RegisteredInterface>,
    config: ProxyConfig,
    sema: Arc<Semaphore>,
    idle: parking_lot::Mutex<Vec<BoxConnection>>,
    closed: AtomicBool,
}

/// A client handle for one interface at one address.
///
/// Cloning is cheap and clones share the connection pool. The proxy is
/// reentrant: concurrent calls draw separate pooled connections. Connections
/// are dialed lazily and handshaken before first use; broken ones are
/// dropped and redialed on the next acquire.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

struct Slot {
    conn: BoxConnection,
    permit: OwnedSemaphorePermit,
}

impl Proxy {
    /// Create a proxy with default configuration for the address.
    pub fn connect(
        address: &str,
        interface: Arc<RegisteredInterface>,
    ) -> Result<Self, RpcError> {
        let address = Address::parse(address)?;
        let config = ProxyConfig::for_address(&address);
        Ok(Proxy::with_config(address, interface, config))
    }

    pub fn with_config(
        address: Address,
        interface: Arc<RegisteredInterface>,
        config: ProxyConfig,
    ) -> Self {
        let pool_size = config.pool_size.max(1);
        Proxy {
            inner: Arc::new(ProxyInner {
                address,
                interface,
                sema: Arc::new(Semaphore::new(pool_size)),
                config: ProxyConfig {
                    pool_size,
                    ..config
                },
                idle: parking_lot::Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn interface(&self) -> &Arc<RegisteredInterface> {
        &self.inner.interface
    }

    /// Invoke a method with positional arguments.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_inner(method, args)
            .await
            .map_err(|e| e.with_method(method).with_address(&self.inner.address))
    }

    /// Invoke a method with named arguments, flattened to their positional
    /// slots in declaration order. Unsupplied arguments travel as null.
    pub async fn call_named(
        &self,
        method: &str,
        named: Vec<(&str, Value)>,
    ) -> Result<Value, RpcError> {
        let ctx =
            |e: RpcError| e.with_method(method).with_address(&self.inner.address);
        let method_id = self
            .inner
            .interface
            .descriptor()
            .method_id(method)
            .ok_or_else(|| {
                ctx(RpcError::invalid(format!(
                    "unknown method {method:?} on {}",
                    self.inner.interface.id()
                )))
            })?;
        let sig = match self.inner.interface.descriptor().method(method_id) {
            Some(sig) => sig,
            None => return Err(ctx(RpcError::invalid("method signature missing"))),
        };

        let mut args = vec![Value::Null; sig.args.len()];
        for (name, value) in named {
            let slot = sig
                .args
                .iter()
                .position(|a| a.name == name)
                .ok_or_else(|| {
                    ctx(RpcError::invalid(format!(
                        "unknown argument {name:?} for method {method:?}"
                    )))
                })?;
            args[slot] = value;
        }
        self.call(method, args).await
    }

    async fn call_inner(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RpcError::unavailable("proxy is closed"));
        }
        let (method_id, plan) =
            self.inner.interface.plan_by_name(method).ok_or_else(|| {
                RpcError::invalid(format!(
                    "unknown method {method:?} on {}",
                    self.inner.interface.id()
                ))
            })?;
        let (flags, blob) = plan.encode_args(&args)?;
        let frame = encode_call(method_id, flags, &blob, self.inner.config.max_payload)?;

        let mut slot = self.acquire().await?;

        let exchange = async {
            slot.conn.send(&frame).await?;
            slot.conn.recv().await
        };
        let received = match self.inner.config.call_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, exchange).await {
                Ok(received) => received,
                // The connection has an abandoned reply in flight; drop it.
                Err(_) => return Err(RpcError::timeout("call deadline exceeded")),
            },
            None => exchange.await,
        };

        let reply_frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(RpcError::unavailable("connection closed by server"));
            }
            Err(e) => {
                tracing::debug!(address = %self.inner.address, error = %e, "transport error");
                return Err(e.into());
            }
        };

        let reply = decode_reply(&reply_frame, self.inner.config.max_payload)?;
        if !reply.status.is_success() {
            let message = String::from_utf8_lossy(reply.payload).into_owned();
            self.recycle(slot);
            return Err(RpcError::new(reply.status, message));
        }

        let value = plan.decode_ret(reply.payload)?;
        self.recycle(slot);
        Ok(value)
    }

    /// Take a pool slot, reusing an idle connection or dialing a new one.
    async fn acquire(&self) -> Result<Slot, RpcError> {
        let acquired = tokio::time::timeout(
            self.inner.config.pool_wait,
            Arc::clone(&self.inner.sema).acquire_owned(),
        )
        .await;
        let permit = match acquired {
            Err(_) => {
                return Err(RpcError::timeout(format!(
                    "connection pool exhausted after {:?}",
                    self.inner.config.pool_wait
                )))
            }
            Ok(Err(_)) => return Err(RpcError::unavailable("proxy is closed")),
            Ok(Ok(permit)) => permit,
        };

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.dial().await?,
        };
        Ok(Slot { conn, permit })
    }

    /// Dial and perform the interface handshake.
    async fn dial(&self) -> Result<BoxConnection, RpcError> {
        let mut conn = ccrpc_transport::connect(&self.inner.address).await?;
        let blob = self.inner.interface.descriptor().handshake().encode();
        let frame = encode_call(METHOD_HANDSHAKE, 0, &blob, self.inner.config.max_payload)?;
        conn.send(&frame).await?;
        match conn.recv().await? {
            None => Err(RpcError::unavailable("connection closed during handshake")),
            Some(reply_frame) => {
                let reply = decode_reply(&reply_frame, self.inner.config.max_payload)?;
                if reply.status.is_success() {
                    Ok(conn)
                } else {
                    Err(RpcError::new(
                        reply.status,
                        String::from_utf8_lossy(reply.payload).into_owned(),
                    ))
                }
            }
        }
    }

    /// Return a healthy connection to the pool.
    fn recycle(&self, slot: Slot) {
        let Slot { conn, permit } = slot;
        if self.inner.closed.load(Ordering::Acquire) {
            drop(conn);
        } else {
            self.inner.idle.lock().push(conn);
        }
        drop(permit);
    }

    /// Dispose of the proxy: wait for in-flight calls to complete or error,
    /// then close pooled connections. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // In-flight calls hold permits; taking the whole pool waits for them.
        let all = Arc::clone(&self.inner.sema)
            .acquire_many_owned(self.inner.config.pool_size as u32)
            .await;
        let idle = std::mem::take(&mut *self.inner.idle.lock());
        for mut conn in idle {
            let _ = conn.close().await;
        }
        // Close before releasing the permits so a racing acquire observes
        // the closed pool instead of grabbing a freed slot.
        self.inner.sema.close();
        drop(all);
    }
}

/// Probe liveness of a server without an interface handshake.
///
/// Never errors: any failure inside the probe window reads as "not alive".
pub async fn ping(address: &str, probe_timeout: Duration) -> bool {
    let probe = async {
        let address = Address::parse(address).ok()?;
        let mut conn = ccrpc_transport::connect(&address).await.ok()?;
        let frame = encode_call(METHOD_PING, 0, &[], ccrpc_wire::max_payload()).ok()?;
        conn.send(&frame).await.ok()?;
        let reply_frame = conn.recv().await.ok()??;
        let reply = decode_reply(&reply_frame, ccrpc_wire::max_payload()).ok()?;
        reply.status.is_success().then_some(())
    };
    matches!(tokio::time::timeout(probe_timeout, probe).await, Ok(Some(())))
}

/// Ask the server at `address` to stop gracefully.
///
/// Returns whether the server acknowledged within `ack_timeout`.
pub async fn shutdown(address: &str, ack_timeout: Duration) -> Result<bool, RpcError> {
    let parsed = Address::parse(address)?;
    let mut conn = ccrpc_transport::connect(&parsed)
        .await
        .map_err(|e| RpcError::from(e).with_address(&parsed))?;
    let frame = encode_call(METHOD_SHUTDOWN, 0, &[], ccrpc_wire::max_payload())?;
    conn.send(&frame)
        .await
        .map_err(|e| RpcError::from(e).with_address(&parsed))?;

    match tokio::time::timeout(ack_timeout, conn.recv()).await {
        Err(_) => Ok(false),
        Ok(Err(e)) => Err(RpcError::from(e).with_address(&parsed)),
        Ok(Ok(None)) => Err(RpcError::unavailable("connection closed before shutdown ack")
            .with_address(&parsed)),
        Ok(Ok(Some(reply_frame))) => {
            let reply = decode_reply(&reply_frame, ccrpc_wire::max_payload())?;
            Ok(reply.status.is_success())
        }
    }
}
