//! Interpreter abstraction and implementations
//!
//! The core never parses or runs the scripting language itself. A backend
//! turns an [`ExecutionContext`] into a live [`Instance`], compiles the
//! snippet into a unit, and executes that unit. Instances are created and
//! used on the worker thread, so they do not need to be `Send`.

#[cfg(feature = "v8")]
pub mod v8;

use crate::context::ExecutionContext;
use crate::error::{Result, ScriptError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "v8")]
pub use self::v8::V8Interpreter;

/// Pluggable language backend
pub trait Interpreter: Send + Sync + 'static {
    type Instance: Instance;

    /// Get runtime name
    fn name(&self) -> &'static str;

    /// Materialize `context` into a fresh engine instance. Must register an
    /// abort hook on `abort` that stops running code.
    fn instantiate(&self, context: &ExecutionContext, abort: &AbortSignal)
        -> Result<Self::Instance>;
}

/// One engine instance bound to one execution context
pub trait Instance {
    type Unit;

    fn compile(&mut self, source: &str) -> std::result::Result<Self::Unit, ScriptError>;

    fn execute(&mut self, unit: Self::Unit) -> std::result::Result<(), ScriptError>;
}

type AbortHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    hooks: Mutex<Vec<AbortHook>>,
}

/// Cross-thread request to stop an execution.
///
/// Hooks registered after the signal fired run immediately.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        let hooks = {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            if self.inner.aborted.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn on_abort(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_aborted() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
