//! Fan-out of inbound frames to per-event-type handlers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use archive_shared::{DecodeError, ServerEvent};

type HandlerFn = dyn Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync;

/// A registered event callback.
///
/// Identity is the allocation: clones of one `Handler` are the same handler,
/// two `Handler::new` calls with identical closures are not.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new(f: impl Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn same(&self, other: &Handler) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    fn call(&self, event: &ServerEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// Event type → handler set. Owned by the consumer side of a session and
/// shared with the channel; it is unaffected by reconnects.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Returns false if it was already registered.
    pub fn on(&self, kind: impl Into<String>, handler: &Handler) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let set = handlers.entry(kind.into()).or_default();
        if set.iter().any(|h| h.same(handler)) {
            return false;
        }
        set.push(handler.clone());
        true
    }

    /// Remove `handler` from `kind`. Returns false if it was not registered.
    pub fn off(&self, kind: &str, handler: &Handler) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(set) = handlers.get_mut(kind) else {
            return false;
        };
        let before = set.len();
        set.retain(|h| !h.same(handler));
        let removed = set.len() != before;
        if set.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: &str) -> Vec<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }
}

/// Result of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub invoked: usize,
    pub failed: usize,
}

/// Decodes inbound frames and invokes the registered handlers in order.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: HandlerRegistry,
}

impl EventDispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn decode(&self, text: &str) -> Result<ServerEvent, DecodeError> {
        ServerEvent::from_text(text)
    }

    /// Decode and deliver one frame. A malformed frame is logged and dropped.
    pub fn dispatch(&self, text: &str) -> Result<Delivery, DecodeError> {
        match self.decode(text) {
            Ok(event) => Ok(self.deliver(&event)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                Err(e)
            }
        }
    }

    /// Invoke every handler registered for the event's type. Each call is
    /// isolated: an error or panic is logged and the remaining handlers still run.
    pub fn deliver(&self, event: &ServerEvent) -> Delivery {
        let kind = event.kind();
        let handlers = self.registry.snapshot(kind);
        let mut delivery = Delivery::default();

        if handlers.is_empty() {
            tracing::trace!(kind, "no handlers registered");
            return delivery;
        }

        for handler in &handlers {
            delivery.invoked += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| handler.call(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    delivery.failed += 1;
                    tracing::warn!(kind, error = %e, "event handler failed");
                }
                Err(panic) => {
                    delivery.failed += 1;
                    tracing::error!(kind, panic = panic_message(&*panic), "event handler panicked");
                }
            }
        }

        delivery
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
