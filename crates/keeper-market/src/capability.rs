//! External capabilities invoked when a job executes.
//!
//! The marketplace does not implement the delayed action itself. Owners point
//! jobs at a [`Target`] registered in a [`CapabilityRegistry`]; the execution
//! gateway resolves it and calls [`Capability::invoke`] with the job's
//! selector and payload.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::id::{Selector, Target};

/// A capability reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityFault {
    /// Failure description.
    pub message: String,
}

impl CapabilityFault {
    /// Create a fault.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An external action a job can trigger.
pub trait Capability: Send + Sync {
    /// Perform the action.
    fn invoke(&self, selector: &Selector, payload: &[u8]) -> Result<(), CapabilityFault>;

    /// Whether the capability can currently be invoked at all.
    fn is_executable(&self) -> bool {
        true
    }
}

/// Registered capabilities keyed by target.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<Target, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the capability behind `target`.
    pub fn register(&self, target: Target, capability: Arc<dyn Capability>) {
        debug!(%target, "Registering capability");
        self.entries.write().insert(target, capability);
    }

    /// Remove the capability behind `target`.
    pub fn unregister(&self, target: &Target) -> bool {
        self.entries.write().remove(target).is_some()
    }

    /// Look up the capability behind `target`.
    #[must_use]
    pub fn resolve(&self, target: &Target) -> Option<Arc<dyn Capability>> {
        self.entries.read().get(target).cloned()
    }

    /// Whether `target` names a registered, executable capability.
    #[must_use]
    pub fn is_capability(&self, target: &Target) -> bool {
        !target.as_str().is_empty() && self.resolve(target).is_some_and(|c| c.is_executable())
    }

    /// Number of registered targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<String> = self.entries.read().keys().map(ToString::to_string).collect();
        targets.sort();
        f.debug_struct("CapabilityRegistry").field("targets", &targets).finish()
    }
}

/// Invoke `capability`, converting a panic into a fault.
pub(crate) fn invoke_guarded(
    capability: &dyn Capability,
    selector: &Selector,
    payload: &[u8],
) -> Result<(), CapabilityFault> {
    match catch_unwind(AssertUnwindSafe(|| capability.invoke(selector, payload))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "capability panicked".to_string());
            warn!(%selector, %message, "Capability panicked");
            Err(CapabilityFault::new(format!("panicked: {message}")))
        }
    }
}

/// A recorded capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Selector passed.
    pub selector: Selector,
    /// Payload passed.
    pub payload: Vec<u8>,
}

/// In-memory capability whose outcome is set by the caller.
///
/// Records successful invocations. Useful as a stand-in target in tests and
/// local setups.
#[derive(Debug, Default)]
pub struct ScriptedCapability {
    failure: Mutex<Option<String>>,
    calls: Mutex<Vec<Invocation>>,
    disabled: Mutex<bool>,
}

impl ScriptedCapability {
    /// A capability that succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// A capability that fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        let cap = Self::default();
        cap.fail_with(message);
        cap
    }

    /// Make subsequent invocations fail.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Make subsequent invocations succeed.
    pub fn fix(&self) {
        *self.failure.lock() = None;
    }

    /// Mark the capability as not executable.
    pub fn disable(&self) {
        *self.disabled.lock() = true;
    }

    /// Successful invocations so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }
}

impl Capability for ScriptedCapability {
    fn invoke(&self, selector: &Selector, payload: &[u8]) -> Result<(), CapabilityFault> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(CapabilityFault::new(message));
        }
        self.calls.lock().push(Invocation {
            selector: *selector,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn is_executable(&self) -> bool {
        !*self.disabled.lock()
    }
}
