//! Registration hooks for external tool bridges.
//!
//! A bridge host (an MCP server, say) republishes component functions as
//! tool endpoints. The contract here is deliberately small: iterate a
//! module's components and publish one handle per component, carrying the
//! tool name, the argument schema derived from the non-interface
//! parameters, and the reserved address parameter. The host calls the
//! handle with arguments plus an address; schema rendering and transport to
//! the host are its business, not ours.

use std::sync::Arc;

use ccrpc_registry::{TypeTag, Value};
use ccrpc_session::RpcError;

use crate::runtime::Component;

/// Reserved name of the address parameter a bridge host must supply.
pub const ADDRESS_PARAM: &str = "crm_address";

/// A named collection of components, the unit a bridge republishes.
#[derive(Debug, Default)]
pub struct ComponentModule {
    name: String,
    components: Vec<Arc<Component>>,
}

impl ComponentModule {
    pub fn new(name: impl Into<String>) -> Self {
        ComponentModule {
            name: name.into(),
            components: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with(mut self, component: Component) -> Self {
        self.components.push(Arc::new(component));
        self
    }

    pub fn components(&self) -> &[Arc<Component>] {
        &self.components
    }
}

/// One parameter of a published tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    pub name: String,
    pub tag: TypeTag,
}

/// A published tool endpoint wrapping one component.
#[derive(Clone)]
pub struct ToolHandle {
    name: String,
    params: Vec<ToolParam>,
    component: Arc<Component>,
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument schema: the component's parameters, interface excluded.
    pub fn params(&self) -> &[ToolParam] {
        &self.params
    }

    /// Name of the extra parameter carrying the CRM address.
    pub fn address_param(&self) -> &'static str {
        ADDRESS_PARAM
    }

    /// Invoke the underlying component with its arguments plus an address.
    pub async fn invoke(
        &self,
        crm_address: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        self.component.invoke_at(crm_address, args).await
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Publish one tool handle per component in the module.
pub fn publish_tools(module: &ComponentModule) -> Vec<ToolHandle> {
    module
        .components()
        .iter()
        .map(|component| ToolHandle {
            name: component.name().to_owned(),
            params: component
                .params()
                .iter()
                .map(|arg| ToolParam {
                    name: arg.name.clone(),
                    tag: arg.tag.clone(),
                })
                .collect(),
            component: Arc::clone(component),
        })
        .collect()
}
