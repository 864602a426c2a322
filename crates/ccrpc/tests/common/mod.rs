#![allow(dead_code)]

//! Shared fixtures: a UTF-8 transferable, an echo CRM, and the Echo
//! interface registered against the process-wide registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccrpc::{
    Address, CodecError, Crm, CrmError, InterfaceDescriptor, RegisteredInterface, Server,
    ServerConfig, Transferable, TypeTag, Value, Version,
};

/// A string transferable with a plain UTF-8 codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Str(pub String);

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Str(s.to_owned())
    }
}

impl Transferable for Str {
    const TYPE_NAME: &'static str = "cc.test.Str";

    fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.0.as_bytes().to_vec())
    }

    fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec())
            .map(Str)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Echo CRM. With a tag set, replies are prefixed `tag:` so tests can tell
/// servers apart.
#[derive(Debug, Default)]
pub struct EchoCrm {
    pub tag: Option<String>,
}

impl EchoCrm {
    pub fn tagged(tag: &str) -> Self {
        EchoCrm {
            tag: Some(tag.to_owned()),
        }
    }

    fn stamp(&self, text: String) -> Value {
        match &self.tag {
            Some(tag) => Value::custom(Str(format!("{tag}:{text}"))),
            None => Value::custom(Str(text)),
        }
    }
}

#[async_trait]
impl Crm for EchoCrm {
    async fn call(&self, method: &str, mut args: Vec<Value>) -> Result<Value, CrmError> {
        match method {
            "echo" => {
                let text = take_str(args.pop())?;
                Ok(self.stamp(text))
            }
            "sleep_echo" => {
                let millis = args
                    .pop()
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| CrmError::invalid("millis must be an int"))?;
                let text = take_str(args.pop())?;
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
                Ok(self.stamp(text))
            }
            "store" => {
                let data = args.pop();
                let len = data
                    .as_ref()
                    .and_then(|v| v.as_bytes())
                    .map(<[u8]>::len)
                    .ok_or_else(|| CrmError::invalid("data must be bytes"))?;
                Ok(Value::Int(len as i64))
            }
            other => Err(CrmError::invalid(format!("no method {other}"))),
        }
    }
}

fn take_str(value: Option<Value>) -> Result<String, CrmError> {
    value
        .as_ref()
        .and_then(Value::downcast_ref::<Str>)
        .map(|s| s.0.clone())
        .ok_or_else(|| CrmError::invalid("text must be a Str"))
}

/// Register `Str` and the Echo interface in the process-wide registry.
pub fn echo_interface() -> Arc<RegisteredInterface> {
    let registry = ccrpc::global();
    registry.register_transferable::<Str>();
    registry
        .register_interface(
            InterfaceDescriptor::builder("cc.test", Version::new(0, 1, 0), "Echo")
                .method(
                    "echo",
                    [("text", TypeTag::custom::<Str>())],
                    Some(TypeTag::custom::<Str>()),
                )
                .method(
                    "sleep_echo",
                    [
                        ("text", TypeTag::custom::<Str>()),
                        ("millis", TypeTag::Int),
                    ],
                    Some(TypeTag::custom::<Str>()),
                )
                .method("store", [("data", TypeTag::Bytes)], Some(TypeTag::Int))
                .build(),
        )
        .unwrap()
}

/// Start an echo server at `addr` with default configuration.
pub async fn start_echo_server(addr: &str, crm: EchoCrm) -> Server {
    let server = Server::new(ServerConfig::new(
        "echo",
        Arc::new(crm),
        echo_interface(),
        Address::parse(addr).unwrap(),
    ));
    server.start().await.unwrap();
    server
}

/// Install the test log subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A unique ipc socket path for this process.
pub fn unique_ipc_addr(tag: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    format!("ipc:///tmp/ccrpc-{tag}-{}-{nanos}.sock", std::process::id())
}
