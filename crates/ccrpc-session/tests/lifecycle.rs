//! Server lifecycle, shutdown, and failure-policy tests over the thread
//! transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccrpc_registry::{
    InterfaceDescriptor, RegisteredInterface, Registry, TypeTag, Value, Version,
};
use ccrpc_session::{
    ping, shutdown, Crm, CrmError, Proxy, ProxyConfig, Server, ServerConfig, ServerState,
};
use ccrpc_transport::Address;
use ccrpc_wire::Status;

struct EchoCrm {
    delay: Option<Duration>,
    terminated: Arc<AtomicUsize>,
}

impl EchoCrm {
    fn new() -> Self {
        EchoCrm {
            delay: None,
            terminated: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        EchoCrm {
            delay: Some(delay),
            ..EchoCrm::new()
        }
    }
}

#[async_trait]
impl Crm for EchoCrm {
    async fn call(&self, method: &str, mut args: Vec<Value>) -> Result<Value, CrmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match method {
            "echo" => Ok(args.pop().unwrap_or(Value::Null)),
            "boom" => Err(CrmError::invalid("echo exploded")),
            other => Err(CrmError::invalid(format!("no method {other}"))),
        }
    }

    async fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

fn echo_interface(registry: &Registry, version: Version) -> Arc<RegisteredInterface> {
    registry
        .register_interface(
            InterfaceDescriptor::builder("cc.test", version, "Echo")
                .method("echo", [("text", TypeTag::Str)], Some(TypeTag::Str))
                .method("boom", [], None)
                .build(),
        )
        .unwrap()
}

fn echo_server(
    addr: &str,
    crm: EchoCrm,
    interface: Arc<RegisteredInterface>,
) -> Server {
    Server::new(ServerConfig::new(
        "echo-server",
        Arc::new(crm),
        interface,
        Address::parse(addr).unwrap(),
    ))
}

#[tokio::test]
async fn lifecycle_states_progress_monotonically() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-states";

    let server = echo_server(addr, EchoCrm::new(), Arc::clone(&interface));
    assert_eq!(server.state(), ServerState::Constructed);

    server.start().await.unwrap();
    assert_eq!(server.state(), ServerState::Running);
    assert!(!server.wait_for_termination(Some(Duration::ZERO)).await);

    let proxy = Proxy::connect(addr, interface).unwrap();
    let reply = proxy
        .call("echo", vec![Value::Str("hello".into())])
        .await
        .unwrap();
    assert_eq!(reply, Value::Str("hello".into()));
    proxy.close().await;

    server.stop(Duration::from_secs(1)).await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.wait_for_termination(Some(Duration::ZERO)).await);
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let server = echo_server("thread://lc-twice", EchoCrm::new(), interface);

    server.start().await.unwrap();
    let err = server.start().await.unwrap_err();
    assert_eq!(err.status, Status::ErrorInvalid);
    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn on_shutdown_and_terminate_run_exactly_once() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let crm = EchoCrm::new();
    let terminated = Arc::clone(&crm.terminated);

    let hook_calls = Arc::new(AtomicUsize::new(0));
    let hook_calls_in_hook = Arc::clone(&hook_calls);
    let server = Server::new(
        ServerConfig::new(
            "echo-server",
            Arc::new(crm),
            interface,
            Address::parse("thread://lc-hook").unwrap(),
        )
        .on_shutdown(move || {
            hook_calls_in_hook.fetch_add(1, Ordering::SeqCst);
        }),
    );
    server.start().await.unwrap();

    // Two racing stops; one runs the sequence, the other waits for it.
    tokio::join!(
        server.stop(Duration::from_secs(1)),
        server.stop(Duration::from_secs(1))
    );
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interface_mismatch_fails_the_first_call() {
    let registry = Registry::new();
    let served = echo_interface(&registry, Version::new(0, 1, 0));
    let wanted = echo_interface(&registry, Version::new(0, 2, 0));
    let addr = "thread://lc-mismatch";

    let server = echo_server(addr, EchoCrm::new(), served);
    server.start().await.unwrap();

    let proxy = Proxy::connect(addr, wanted).unwrap();
    let err = proxy
        .call("echo", vec![Value::Str("hi".into())])
        .await
        .unwrap_err();
    assert_eq!(err.status, Status::ErrorInvalid);
    assert!(err.message.contains("interface mismatch"), "{}", err.message);

    proxy.close().await;
    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn calls_after_stop_are_unavailable() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-after-stop";

    let server = echo_server(addr, EchoCrm::new(), Arc::clone(&interface));
    server.start().await.unwrap();
    server.stop(Duration::from_secs(1)).await;

    let proxy = Proxy::connect(addr, interface).unwrap();
    let err = proxy
        .call("echo", vec![Value::Str("hi".into())])
        .await
        .unwrap_err();
    assert_eq!(err.status, Status::ErrorUnavailable);
    proxy.close().await;
}

#[tokio::test]
async fn pool_exhaustion_times_out() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-pool";

    let server = echo_server(
        addr,
        EchoCrm::with_delay(Duration::from_millis(500)),
        Arc::clone(&interface),
    );
    server.start().await.unwrap();

    let address = Address::parse(addr).unwrap();
    let config = ProxyConfig {
        pool_size: 1,
        pool_wait: Duration::from_millis(100),
        ..ProxyConfig::for_address(&address)
    };
    let proxy = Proxy::with_config(address, interface, config);

    let slow = proxy.call("echo", vec![Value::Str("a".into())]);
    let starved = proxy.call("echo", vec![Value::Str("b".into())]);
    let (slow, starved) = tokio::join!(slow, starved);

    assert_eq!(slow.unwrap(), Value::Str("a".into()));
    let err = starved.unwrap_err();
    assert_eq!(err.status, Status::ErrorTimeout);
    assert!(err.message.contains("pool"), "{}", err.message);

    proxy.close().await;
    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn server_call_deadline_maps_to_timeout_status() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-deadline";

    let server = Server::new(
        ServerConfig::new(
            "echo-server",
            Arc::new(EchoCrm::with_delay(Duration::from_millis(200))),
            Arc::clone(&interface),
            Address::parse(addr).unwrap(),
        )
        .call_deadline(Duration::from_millis(50)),
    );
    server.start().await.unwrap();

    let proxy = Proxy::connect(addr, interface).unwrap();
    let err = proxy
        .call("echo", vec![Value::Str("slow".into())])
        .await
        .unwrap_err();
    assert_eq!(err.status, Status::ErrorTimeout);

    proxy.close().await;
    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn user_conditions_pass_through_with_context() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-boom";

    let server = echo_server(addr, EchoCrm::new(), Arc::clone(&interface));
    server.start().await.unwrap();

    let proxy = Proxy::connect(addr, interface).unwrap();
    let err = proxy.call("boom", vec![]).await.unwrap_err();
    assert_eq!(err.status, Status::ErrorInvalid);
    assert!(err.message.contains("echo exploded"));
    assert_eq!(err.method.as_deref(), Some("boom"));
    assert_eq!(err.address.as_deref(), Some(addr));

    proxy.close().await;
    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn ping_and_remote_shutdown() {
    let registry = Registry::new();
    let interface = echo_interface(&registry, Version::new(0, 1, 0));
    let addr = "thread://lc-remote";

    let server = echo_server(addr, EchoCrm::new(), interface);
    server.start().await.unwrap();

    assert!(ping(addr, Duration::from_millis(500)).await);

    let acked = shutdown(addr, Duration::from_secs(1)).await.unwrap();
    assert!(acked);
    assert!(server.wait_for_termination(Some(Duration::from_secs(2))).await);
    assert!(!ping(addr, Duration::from_millis(200)).await);
}
