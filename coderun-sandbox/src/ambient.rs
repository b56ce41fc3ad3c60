//! Ambient state virtualization
//!
//! Environment variables and the argument vector are "ambient": a snippet
//! reads them as if they were process state. Each execution snapshots the
//! store, applies the request's values, and restores the snapshot when the
//! [`AppliedState`] guard is released, on every exit path.
//!
//! Two stores exist. [`IsolatedStore`] is created per execution and never
//! shared. [`ProcessStore`] is the real process environment and a
//! process-wide argument vector; its lock is held from apply to restore, so
//! executions against it are serialized.

use crate::error::{Result, SandboxError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

/// Program name placed in front of the request's arguments
pub const SCRIPT_NAME: &str = "script.js";

/// Environment variables plus argument vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientState {
    pub env: BTreeMap<String, String>,
    pub argv: Vec<String>,
}

/// Captured copy of a store taken before it is mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientStateSnapshot(AmbientState);

impl AmbientStateSnapshot {
    pub fn state(&self) -> &AmbientState {
        &self.0
    }
}

/// Backing storage for ambient state
pub trait AmbientStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Exclusive access for one apply..restore span.
    fn exclusive(&self) -> MutexGuard<'_, ()>;

    fn read(&self) -> AmbientState;

    /// Replace the whole state, removing keys absent from `state`.
    fn write(&self, state: &AmbientState) -> Result<()>;
}

/// Reject names and values the process environment cannot represent.
pub fn validate_env_entry(key: &str, value: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SandboxError::invalid(
            "Environment variable names must not be empty",
        ));
    }
    if key.contains('=') || key.contains('\0') {
        return Err(SandboxError::invalid(format!(
            "Invalid environment variable name: {:?}",
            key
        )));
    }
    if value.contains('\0') {
        return Err(SandboxError::invalid(format!(
            "Environment variable {} contains a NUL byte",
            key
        )));
    }
    Ok(())
}

/// Snapshot / apply / restore over one store
pub struct StateVirtualizer<'a> {
    store: &'a dyn AmbientStore,
}

impl<'a> StateVirtualizer<'a> {
    pub fn new(store: &'a dyn AmbientStore) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> AmbientStateSnapshot {
        AmbientStateSnapshot(self.store.read())
    }

    /// Take the store's lock, snapshot it, and make `env` / `args` live.
    ///
    /// The live environment is the snapshot's keys overwritten by `env`; the
    /// live argument vector is [`SCRIPT_NAME`] followed by `args`.
    pub fn apply(
        &self,
        env: &BTreeMap<String, String>,
        args: &[String],
    ) -> Result<AppliedState<'a>> {
        for (key, value) in env {
            validate_env_entry(key, value)?;
        }

        let lock = self.store.exclusive();
        let snapshot = self.snapshot();

        let mut live = snapshot.state().clone();
        live.env
            .extend(env.iter().map(|(key, value)| (key.clone(), value.clone())));
        live.argv = std::iter::once(SCRIPT_NAME.to_string())
            .chain(args.iter().cloned())
            .collect();

        self.store.write(&live)?;
        tracing::debug!(
            store = self.store.name(),
            env_keys = live.env.len(),
            argc = live.argv.len(),
            "Applied ambient state"
        );

        Ok(AppliedState {
            store: self.store,
            snapshot: Some(snapshot),
            live,
            _lock: lock,
        })
    }

    /// Write `snapshot` back into the store.
    pub fn restore(&self, snapshot: &AmbientStateSnapshot) -> Result<()> {
        self.store.write(snapshot.state())
    }
}

/// A live application of request state. Restores the snapshot exactly once,
/// either through [`AppliedState::restore`] or when dropped.
pub struct AppliedState<'a> {
    store: &'a dyn AmbientStore,
    snapshot: Option<AmbientStateSnapshot>,
    live: AmbientState,
    _lock: MutexGuard<'a, ()>,
}

impl AppliedState<'_> {
    /// State the snippet should observe.
    pub fn live(&self) -> &AmbientState {
        &self.live
    }

    pub fn restore(mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => {
                StateVirtualizer::new(self.store).restore(&snapshot)?;
                tracing::debug!(store = self.store.name(), "Restored ambient state");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for AppliedState<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(err) = StateVirtualizer::new(self.store).restore(&snapshot) {
                tracing::error!(
                    store = self.store.name(),
                    error = %err,
                    "Failed to restore ambient state"
                );
            }
        }
    }
}

/// Per-execution store, never shared between requests
#[derive(Debug, Default)]
pub struct IsolatedStore {
    lock: Mutex<()>,
    state: Mutex<AmbientState>,
}

impl IsolatedStore {
    /// Store whose environment starts out as `base_env`.
    pub fn new(base_env: BTreeMap<String, String>) -> Self {
        Self {
            lock: Mutex::new(()),
            state: Mutex::new(AmbientState {
                env: base_env,
                argv: Vec::new(),
            }),
        }
    }
}

impl AmbientStore for IsolatedStore {
    fn name(&self) -> &'static str {
        "isolated"
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> AmbientState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, state: &AmbientState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

/// The real process environment and a process-wide argument vector.
///
/// Variables whose name or value is not valid UTF-8 are invisible to the
/// store and therefore never modified.
#[derive(Debug)]
pub struct ProcessStore {
    lock: Mutex<()>,
    argv: RwLock<Vec<String>>,
}

impl ProcessStore {
    /// The single process-wide store.
    pub fn global() -> Arc<ProcessStore> {
        static GLOBAL: OnceLock<Arc<ProcessStore>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                Arc::new(ProcessStore {
                    lock: Mutex::new(()),
                    argv: RwLock::new(
                        std::env::args_os()
                            .map(|arg| arg.to_string_lossy().into_owned())
                            .collect(),
                    ),
                })
            })
            .clone()
    }

    /// Argument vector as currently applied.
    pub fn argv(&self) -> Vec<String> {
        self.argv
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn env() -> BTreeMap<String, String> {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }
}

impl AmbientStore for ProcessStore {
    fn name(&self) -> &'static str {
        "process"
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> AmbientState {
        AmbientState {
            env: Self::env(),
            argv: self.argv(),
        }
    }

    fn write(&self, state: &AmbientState) -> Result<()> {
        for (key, value) in &state.env {
            validate_env_entry(key, value).map_err(|err| {
                SandboxError::internal(format!("refusing to write process environment: {}", err))
            })?;
        }

        for key in Self::env().keys() {
            if !state.env.contains_key(key) {
                std::env::remove_var(key);
            }
        }
        for (key, value) in &state.env {
            if std::env::var(key).ok().as_deref() != Some(value.as_str()) {
                std::env::set_var(key, value);
            }
        }

        *self.argv.write().unwrap_or_else(PoisonError::into_inner) = state.argv.clone();
        Ok(())
    }
}
