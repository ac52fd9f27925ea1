//! # CurrentTraceContext
//!
//! Tracks which context is current for the calling execution unit. The
//! default keeps a per-thread slot; task-local or explicit-passing
//! implementations can substitute, as the tracer only consumes the
//! capability.

use std::cell::RefCell;
use std::fmt;

use crate::context::TraceContext;
use crate::internal_logging::trace_warn;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<TraceContext>> = const { RefCell::new(None) };
}

/// Per-execution-unit stack of current contexts with scoped push/pop.
///
/// Contract: `get` returns the innermost open scope's context (or `None`);
/// `new_scope` installs an entry and returns a guard that, on close,
/// restores exactly the predecessor. Nested scopes unwind in reverse order.
/// Different threads see independent state.
pub trait CurrentTraceContext: Send + Sync + fmt::Debug {
    /// The context current in this execution unit, if any.
    fn get(&self) -> Option<TraceContext>;

    /// Install `context` (or a cleared slot, for `None`) until the returned
    /// scope closes.
    fn new_scope(&self, context: Option<TraceContext>) -> Scope;
}

/// Guard restoring the previously-current context.
///
/// Closing happens on drop, on every exit path. An explicit [`close`] is
/// available for symmetry; closing twice is a no-op.
///
/// [`close`]: Scope::close
pub struct Scope {
    on_close: Option<Box<dyn FnOnce()>>,
}

impl Scope {
    /// Create a scope running `on_close` exactly once.
    pub fn new(on_close: impl FnOnce() + 'static) -> Self {
        Scope {
            on_close: Some(Box::new(on_close)),
        }
    }

    /// A scope that does nothing on close.
    pub fn noop() -> Self {
        Scope { on_close: None }
    }

    /// Restore the previous context now instead of at drop.
    pub fn close(mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("closed", &self.on_close.is_none())
            .finish()
    }
}

/// Default [`CurrentTraceContext`] backed by a thread-local slot.
#[derive(Clone, Debug, Default)]
pub struct ThreadLocalCurrentTraceContext {
    _private: (),
}

impl ThreadLocalCurrentTraceContext {
    /// Create a thread-local current context.
    pub fn new() -> Self {
        ThreadLocalCurrentTraceContext::default()
    }
}

impl CurrentTraceContext for ThreadLocalCurrentTraceContext {
    fn get(&self) -> Option<TraceContext> {
        CURRENT_CONTEXT.with(|current| current.borrow().clone())
    }

    fn new_scope(&self, context: Option<TraceContext>) -> Scope {
        let installed = context.clone();
        let previous = CURRENT_CONTEXT.with(|current| current.replace(context));
        Scope::new(move || {
            CURRENT_CONTEXT.with(|current| {
                let mut slot = current.borrow_mut();
                // Out-of-order close: someone else's entry is on top. Restore
                // our predecessor anyway so the slot doesn't leak.
                if *slot != installed {
                    trace_warn!(
                        name: "Scope.CloseOutOfOrder",
                        expected = installed.as_ref().map(ToString::to_string).unwrap_or_default(),
                        found = slot.as_ref().map(ToString::to_string).unwrap_or_default()
                    );
                }
                *slot = previous;
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(span_id: u64) -> TraceContext {
        TraceContext::builder()
            .trace_id(1)
            .span_id(span_id)
            .build()
            .unwrap()
    }

    #[test]
    fn default_is_empty() {
        let current = ThreadLocalCurrentTraceContext::new();
        assert_eq!(current.get(), None);
    }

    #[test]
    fn scope_installs_and_restores() {
        let current = ThreadLocalCurrentTraceContext::new();

        let scope = current.new_scope(Some(context(2)));
        assert_eq!(current.get(), Some(context(2)));
        scope.close();

        assert_eq!(current.get(), None);
    }

    #[test]
    fn nested_scopes_unwind_lifo() {
        let current = ThreadLocalCurrentTraceContext::new();

        let outer = current.new_scope(Some(context(2)));
        {
            let inner = current.new_scope(Some(context(3)));
            assert_eq!(current.get(), Some(context(3)));
            drop(inner);
        }
        assert_eq!(current.get(), Some(context(2)));
        drop(outer);

        assert_eq!(current.get(), None);
    }

    #[test]
    fn clear_scope_masks_outer() {
        let current = ThreadLocalCurrentTraceContext::new();

        let outer = current.new_scope(Some(context(2)));
        {
            let cleared = current.new_scope(None);
            assert_eq!(current.get(), None);
            drop(cleared);
        }
        assert_eq!(current.get(), Some(context(2)));
        drop(outer);
    }

    #[test]
    fn scope_restores_on_panic_unwind() {
        let current = ThreadLocalCurrentTraceContext::new();

        let result = std::panic::catch_unwind(|| {
            let _scope =
                ThreadLocalCurrentTraceContext::new().new_scope(Some(context(2)));
            panic!("boom");
        });
        assert!(result.is_err());

        assert_eq!(current.get(), None);
    }

    #[test]
    fn out_of_order_close_still_restores_predecessor() {
        let current = ThreadLocalCurrentTraceContext::new();

        let outer = current.new_scope(Some(context(2)));
        let inner = current.new_scope(Some(context(3)));

        // wrong order: each close still restores its own predecessor
        outer.close();
        assert_eq!(current.get(), None);
        inner.close();
        assert_eq!(current.get(), Some(context(2)));
    }

    #[test]
    fn threads_have_independent_state() {
        let current = ThreadLocalCurrentTraceContext::new();
        let _scope = current.new_scope(Some(context(2)));

        std::thread::spawn(|| {
            assert_eq!(ThreadLocalCurrentTraceContext::new().get(), None);
        })
        .join()
        .unwrap();

        assert_eq!(current.get(), Some(context(2)));
    }
}
