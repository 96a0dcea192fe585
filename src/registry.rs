//! Event-type keyed handler registry.
//!
//! Read-mostly: dispatch takes a defensive copy of the handler sequence for
//! an event type before running any of them, so a registration that lands
//! mid-dispatch never changes what the in-flight message invokes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Cancellation context passed to every [`Handler`] invocation. Handlers are
/// contractually required to observe it in any loop or long-running await.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// A user-supplied callable invoked per message for a given event type.
///
/// Implementations must be side-effectful only as documented by the caller
/// and must observe `ctx` cancellation promptly.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Blanket impl so a plain async closure-returning-future can be registered
/// without defining a dedicated type.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(HandlerContext, HashMap<String, String>, Vec<u8>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send,
{
    async fn handle(
        &self,
        ctx: &HandlerContext,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self)(ctx.clone(), headers.clone(), body.to_vec()).await
    }
}

/// Mapping from event-type string to the ordered sequence of handlers
/// registered for it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the sequence for `event_type`. Does not
    /// deduplicate; registering the same handler twice runs it twice.
    pub fn register(&self, event_type: impl Into<String>, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.write().expect("handler registry poisoned");
        handlers.entry(event_type.into()).or_default().push(handler);
    }

    /// Returns a defensive copy of the handlers currently registered for
    /// `event_type`. Dispatch iterates this snapshot outside any lock, so it
    /// must not observe registrations that land mid-dispatch.
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(
            &self,
            _ctx: &HandlerContext,
            _headers: &HashMap<String, String>,
            _body: &[u8],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_handlers_for_unknown_event_type_is_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.handlers_for("nope").is_empty());
    }

    #[test]
    fn test_register_is_append_only_in_order() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("order.created", Arc::new(CountingHandler(counter.clone())));
        registry.register("order.created", Arc::new(CountingHandler(counter.clone())));

        let handlers = registry.handlers_for("order.created");
        assert_eq!(handlers.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_uses_registration_order() {
        let registry = HandlerRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            let tag = tag.to_string();
            registry.register(
                "evt",
                Arc::new(move |_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| {
                    let order = order.clone();
                    let tag = tag.clone();
                    async move {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    }
                }),
            );
        }

        let ctx = HandlerContext::new(CancellationToken::new());
        for handler in registry.handlers_for("evt") {
            handler.handle(&ctx, &HashMap::new(), &[]).await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_snapshot_isolation_from_concurrent_register() {
        let registry = Arc::new(HandlerRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("E", Arc::new(CountingHandler(counter.clone())));

        // Snapshot taken before the concurrent registration.
        let snapshot = registry.handlers_for("E");
        assert_eq!(snapshot.len(), 1);

        let barrier = Arc::new(Barrier::new(2));
        let registry_clone = registry.clone();
        let counter_clone = counter.clone();
        let barrier_clone = barrier.clone();
        let register_task = std::thread::spawn(move || {
            barrier_clone.wait();
            registry_clone.register("E", Arc::new(CountingHandler(counter_clone)));
        });
        barrier.wait();
        register_task.join().unwrap();

        // The already-taken snapshot is unaffected by the new registration.
        assert_eq!(snapshot.len(), 1);
        // But the next snapshot observes both handlers, in registration order.
        assert_eq!(registry.handlers_for("E").len(), 2);
    }
}
