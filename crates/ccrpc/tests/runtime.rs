//! Component runtime and bridge hooks.

mod common;

use std::time::Duration;

use ccrpc::{
    connect_crm, publish_tools, Component, ComponentModule, Proxy, Status, TypeTag, Value,
};
use common::{echo_interface, start_echo_server, EchoCrm, Str};

fn greet_component() -> Component {
    Component::new(
        "greet",
        echo_interface(),
        [("text", TypeTag::custom::<Str>())],
        |proxy: Proxy, args: Vec<Value>| async move { proxy.call("echo", args).await },
    )
}

#[tokio::test]
async fn ambient_scope_injects_the_proxy() {
    let addr = "thread://rt-ambient";
    let server = start_echo_server(addr, EchoCrm::default()).await;
    let component = greet_component();

    let reply = connect_crm(addr, echo_interface(), |_proxy| async move {
        component
            .invoke(vec![Value::custom(Str::from("hi"))])
            .await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.downcast_ref::<Str>(), Some(&Str::from("hi")));

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn invoke_without_binding_or_address_fails() {
    let component = greet_component();
    let err = component
        .invoke(vec![Value::custom(Str::from("nowhere"))])
        .await
        .unwrap_err();
    assert_eq!(err.status, Status::ErrorInvalid);
    assert!(err.message.contains("no ambient binding"), "{}", err.message);
}

#[tokio::test]
async fn call_time_address_opens_a_scoped_proxy() {
    let addr = "thread://rt-addr";
    let server = start_echo_server(addr, EchoCrm::default()).await;
    let component = greet_component();

    let reply = component
        .invoke_at(addr, vec![Value::custom(Str::from("direct"))])
        .await
        .unwrap();
    assert_eq!(reply.downcast_ref::<Str>(), Some(&Str::from("direct")));

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn parallel_scopes_do_not_observe_each_other() {
    let addr_a = "thread://rt-par-a";
    let addr_b = "thread://rt-par-b";
    let server_a = start_echo_server(addr_a, EchoCrm::tagged("A")).await;
    let server_b = start_echo_server(addr_b, EchoCrm::tagged("B")).await;

    let task = |addr: &'static str| {
        tokio::spawn(async move {
            connect_crm(addr, echo_interface(), |_proxy| async move {
                let component = greet_component();
                // Give the sibling task time to install its own binding.
                tokio::time::sleep(Duration::from_millis(20)).await;
                component
                    .invoke(vec![Value::custom(Str::from("x"))])
                    .await
            })
            .await
            .unwrap()
            .unwrap()
        })
    };
    let (a, b) = tokio::join!(task(addr_a), task(addr_b));

    assert_eq!(
        a.unwrap().downcast_ref::<Str>(),
        Some(&Str::from("A:x"))
    );
    assert_eq!(
        b.unwrap().downcast_ref::<Str>(),
        Some(&Str::from("B:x"))
    );

    server_a.stop(Duration::from_secs(1)).await;
    server_b.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn scoped_proxy_closes_on_scope_exit() {
    let addr = "thread://rt-close";
    let server = start_echo_server(addr, EchoCrm::default()).await;

    let leaked = connect_crm(addr, echo_interface(), |proxy| async move { proxy })
        .await
        .unwrap();
    // The scope is gone; its proxy was closed on exit.
    let err = leaked
        .call("echo", vec![Value::custom(Str::from("late"))])
        .await
        .unwrap_err();
    assert_eq!(err.status, Status::ErrorUnavailable);

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn bridge_publishes_components_as_tools() {
    let addr = "thread://rt-bridge";
    let server = start_echo_server(addr, EchoCrm::default()).await;

    let module = ComponentModule::new("cc.demo").with(greet_component());
    let tools = publish_tools(&module);
    assert_eq!(tools.len(), 1);

    let tool = &tools[0];
    assert_eq!(tool.name(), "greet");
    assert_eq!(tool.address_param(), "crm_address");
    assert_eq!(tool.params().len(), 1);
    assert_eq!(tool.params()[0].name, "text");
    assert_eq!(tool.params()[0].tag, TypeTag::custom::<Str>());

    let reply = tool
        .invoke(addr, vec![Value::custom(Str::from("via-bridge"))])
        .await
        .unwrap();
    assert_eq!(reply.downcast_ref::<Str>(), Some(&Str::from("via-bridge")));

    server.stop(Duration::from_secs(1)).await;
}
