//! Node context for multi-node logging
//!
//! Simulations run many nodes in one process. A [`NodeContextGuard`] marks
//! which node the current thread is working for, and
//! [`NodeContextLayer`](crate::layers::NodeContextLayer) stamps it onto every
//! span opened in that scope.

use std::cell::RefCell;

use pymesh_core::{Mac, NodeRole, format_mac};
use uuid::Uuid;

/// Node identity attached to spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Formatted hardware address
    pub mac: String,
    /// Role when the context was entered
    pub role: Option<NodeRole>,
    /// Distinguishes runs of the same node
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread and restores the previous
/// one on drop, so guards nest.
///
/// ```ignore
/// let _guard = NodeContextGuard::new(0x10).with_role(NodeRole::Leader);
/// tracing::info!("Probing routers");
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(mac: Mac) -> Self {
        Self::with_instance_id(mac, Uuid::new_v4())
    }

    /// Keep one instance id across restarts of the same node
    pub fn with_instance_id(mac: Mac, instance_id: Uuid) -> Self {
        let data = NodeContextData {
            mac: format_mac(mac),
            role: None,
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Record the node's role in the active context
    pub fn with_role(self, role: NodeRole) -> Self {
        NODE_CONTEXT.with(|ctx| {
            if let Some(data) = ctx.borrow_mut().as_mut() {
                data.role = Some(role);
            }
        });
        self
    }

    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_mac() -> Option<String> {
        Self::current().map(|ctx| ctx.mac)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// ```ignore
/// with_node_context!(0x10, {
///     tracing::info!("Processing packet");
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($mac:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($mac);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_sets_and_clears() {
        assert!(NodeContextGuard::current().is_none());
        {
            let _guard = NodeContextGuard::new(0x10).with_role(NodeRole::Leader);
            let ctx = NodeContextGuard::current().unwrap();
            assert_eq!(ctx.mac, format_mac(0x10));
            assert_eq!(ctx.role, Some(NodeRole::Leader));
        }
        assert!(NodeContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        let _outer = NodeContextGuard::new(0x10);
        {
            let _inner = NodeContextGuard::new(0x20);
            assert_eq!(NodeContextGuard::current_mac(), Some(format_mac(0x20)));
        }
        assert_eq!(NodeContextGuard::current_mac(), Some(format_mac(0x10)));
    }

    #[test]
    fn test_fixed_instance_id() {
        let id = Uuid::new_v4();
        let _guard = NodeContextGuard::with_instance_id(0x30, id);
        assert_eq!(NodeContextGuard::current().unwrap().instance_id, id);
    }

    #[test]
    fn test_macro_scope() {
        let mac = with_node_context!(0x40, { NodeContextGuard::current_mac() });
        assert_eq!(mac, Some(format_mac(0x40)));
        assert!(NodeContextGuard::current().is_none());
    }
}
