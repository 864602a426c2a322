//! The component runtime: ambient, task-scoped CRM bindings.
//!
//! [`connect_crm`] installs a proxy in a task-local context for the duration
//! of an async scope. A [`Component`] declares the interface it depends on;
//! at invocation the runtime injects the ambient proxy when the interface
//! identity matches, and otherwise opens one scoped to the call from the
//! supplied address. Task-local (not thread-local) storage is essential:
//! parallel components on the same worker thread must never observe each
//! other's bindings.
//!
//! The runtime spawns nothing; its only suspension points are the proxy's
//! own send/recv. Tearing the scope down closes every proxy it opened, so an
//! abandoned in-flight call surfaces to its caller as `ERROR_UNAVAILABLE`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ccrpc_registry::{ArgSpec, RegisteredInterface, TypeTag, Value};
use ccrpc_session::{Proxy, RpcError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Proxies opened inside one ambient scope for addresses/interfaces other
/// than the primary binding, reused across calls and closed on scope exit.
type ProxyCache = Arc<parking_lot::Mutex<HashMap<(String, String), Proxy>>>;

#[derive(Clone)]
struct AmbientContext {
    interface: Arc<RegisteredInterface>,
    proxy: Proxy,
    cache: ProxyCache,
}

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// Open a proxy to `address` and make it the ambient binding for the
/// duration of `scope`. The proxy (and any cached secondary proxies opened
/// by components inside the scope) is closed on exit, whether the scope
/// returned a value or an error.
pub async fn connect_crm<F, Fut, T>(
    address: &str,
    interface: Arc<RegisteredInterface>,
    scope: F,
) -> Result<T, RpcError>
where
    F: FnOnce(Proxy) -> Fut,
    Fut: Future<Output = T>,
{
    let proxy = Proxy::connect(address, Arc::clone(&interface))?;
    tracing::debug!(address, interface = %proxy.interface().id(), "entering ambient scope");
    let cache: ProxyCache = Arc::default();
    let ctx = AmbientContext {
        interface,
        proxy: proxy.clone(),
        cache: Arc::clone(&cache),
    };

    let result = AMBIENT.scope(ctx, scope(proxy.clone())).await;

    let cached: Vec<Proxy> = cache.lock().drain().map(|(_, proxy)| proxy).collect();
    for proxy in cached {
        proxy.close().await;
    }
    proxy.close().await;
    tracing::debug!(address, "left ambient scope");
    Ok(result)
}

/// The ambient proxy for `interface`, if the current task is inside a
/// [`connect_crm`] scope whose binding has the same descriptor identity.
pub fn ambient_proxy(interface: &RegisteredInterface) -> Option<Proxy> {
    AMBIENT
        .try_with(|ctx| {
            (ctx.interface.id() == interface.id()).then(|| ctx.proxy.clone())
        })
        .ok()
        .flatten()
}

/// Reuse or open a proxy for `(address, interface)` through the ambient
/// scope's cache. Outside any scope, returns `None`.
fn cached_proxy(
    address: &str,
    interface: &Arc<RegisteredInterface>,
) -> Option<Result<Proxy, RpcError>> {
    AMBIENT
        .try_with(|ctx| {
            let key = (address.to_owned(), interface.id().to_string());
            let mut cache = ctx.cache.lock();
            if let Some(proxy) = cache.get(&key) {
                return Ok(proxy.clone());
            }
            let proxy = Proxy::connect(address, Arc::clone(interface))?;
            cache.insert(key, proxy.clone());
            Ok(proxy)
        })
        .ok()
}

/// A caller-side function depending on one interface.
///
/// The wrapped function receives the injected proxy plus its declared
/// (non-interface) arguments. Interface matching is by descriptor identity;
/// there is no structural subtyping.
#[derive(Clone)]
pub struct Component {
    name: String,
    interface: Arc<RegisteredInterface>,
    params: Vec<ArgSpec>,
    run: Arc<dyn Fn(Proxy, Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>,
}

impl Component {
    pub fn new<'a, F, Fut>(
        name: impl Into<String>,
        interface: Arc<RegisteredInterface>,
        params: impl IntoIterator<Item = (&'a str, TypeTag)>,
        f: F,
    ) -> Self
    where
        F: Fn(Proxy, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        Component {
            name: name.into(),
            interface,
            params: params
                .into_iter()
                .map(|(name, tag)| ArgSpec {
                    name: name.to_owned(),
                    tag,
                })
                .collect(),
            run: Arc::new(move |proxy, args| Box::pin(f(proxy, args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &Arc<RegisteredInterface> {
        &self.interface
    }

    /// The component's non-interface parameters, in declaration order.
    pub fn params(&self) -> &[ArgSpec] {
        &self.params
    }

    /// Invoke with the ambient binding. Fails `ERROR_INVALID` when the
    /// current task has no matching binding.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        match ambient_proxy(&self.interface) {
            Some(proxy) => (self.run)(proxy, args).await,
            None => Err(RpcError::invalid(format!(
                "no ambient binding for {}; enter a connect_crm scope or supply crm_address",
                self.interface.id()
            ))),
        }
    }

    /// Invoke with an address supplied at call time.
    ///
    /// Resolution order: a matching ambient binding wins; inside a scope the
    /// per-task proxy cache is consulted next (the proxy then lives until
    /// scope exit); outside any scope a proxy is opened for this call alone
    /// and closed on return.
    pub async fn invoke_at(
        &self,
        crm_address: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        if let Some(proxy) = ambient_proxy(&self.interface) {
            return (self.run)(proxy, args).await;
        }
        if let Some(cached) = cached_proxy(crm_address, &self.interface) {
            return (self.run)(cached?, args).await;
        }

        let proxy = Proxy::connect(crm_address, Arc::clone(&self.interface))?;
        let result = (self.run)(proxy.clone(), args).await;
        proxy.close().await;
        result
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("interface", &self.interface.id())
            .finish_non_exhaustive()
    }
}
