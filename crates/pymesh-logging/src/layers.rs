//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::context::{NodeContextData, NodeContextGuard};

/// Attaches the active [`NodeContextGuard`] data to every new span
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Span extension written by [`NodeContextLayer`]
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if let Some(data) = NodeContextGuard::current() {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry::Registry;

    use super::*;

    /// Copies the node extension of each closed span
    struct Capture(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for Capture
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
            let span = ctx.span(&id).unwrap();
            let mac = span
                .extensions()
                .get::<NodeContextExtension>()
                .map(|ext| ext.data.mac.clone());
            self.0.lock().unwrap().push(mac);
        }
    }

    #[test]
    fn test_spans_carry_node_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(NodeContextLayer::new())
            .with(Capture(Arc::clone(&seen)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info_span!("outside").in_scope(|| {});
            let _guard = NodeContextGuard::new(0x10);
            tracing::info_span!("inside").in_scope(|| {});
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], Some(pymesh_core::format_mac(0x10)));
    }
}
