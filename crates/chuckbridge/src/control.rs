//! Globals and events: the operations that stay safe during realtime rendering.
//!
//! A [`ControlHandle`] is the capability handed out for use alongside a
//! running audio thread. Everything it does is a queued control message that
//! the engine consumes at a block boundary, so it can be cloned freely and
//! used from any thread. Callbacks registered through it are invoked by
//! [`ControlHandle::dispatch_pending`], which the render loop calls after
//! every block it renders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Receiver;

use crate::callbacks::{CallbackId, CallbackTable, Claimed, PendingCallback};
use crate::engine::{EngineMessenger, GlobalKind, GlobalValue, Resolution};
use crate::error::{BridgeError, Result};

struct Shared<M> {
    messenger: M,
    table: Mutex<CallbackTable>,
    resolutions: Receiver<Resolution>,
    ready: AtomicBool,
}

/// Thread-safe handle for global variables and events.
pub struct ControlHandle<M: EngineMessenger> {
    inner: Arc<Shared<M>>,
}

impl<M: EngineMessenger> Clone for ControlHandle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: EngineMessenger> ControlHandle<M> {
    pub(crate) fn new(messenger: M, resolutions: Receiver<Resolution>) -> Self {
        Self {
            inner: Arc::new(Shared {
                messenger,
                table: Mutex::new(CallbackTable::new()),
                resolutions,
                ready: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    /// Whether the engine behind this handle has been initialized.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn table(&self) -> MutexGuard<'_, CallbackTable> {
        self.inner.table.lock().expect("Callback table lock poisoned")
    }

    fn check(&self, name: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(BridgeError::EngineNotReady);
        }
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    /// Set a global scalar. Fire-and-forget; applied at the next block.
    pub fn set_global(&self, name: &str, value: impl Into<GlobalValue>) -> Result<()> {
        self.check(name)?;
        self.inner.messenger.set_global(name, value.into());
        Ok(())
    }

    pub fn set_int(&self, name: &str, value: i64) -> Result<()> {
        self.set_global(name, value)
    }

    pub fn set_float(&self, name: &str, value: f64) -> Result<()> {
        self.set_global(name, value)
    }

    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.set_global(name, value)
    }

    /// Request a global's value.
    ///
    /// This only registers the request; `callback` runs during a later render
    /// pass, once the engine has resolved it. Reads of undeclared globals
    /// never resolve; cancel them with [`cancel`](Self::cancel).
    pub fn get_global_async<F>(
        &self,
        name: &str,
        kind: GlobalKind,
        callback: F,
    ) -> Result<CallbackId>
    where
        F: FnOnce(GlobalValue) + Send + 'static,
    {
        self.check(name)?;
        let id = self.table().insert_global(name, Box::new(callback));
        log::trace!("Registered read of {} global '{}' as {}", kind, name, id);
        self.inner.messenger.get_global(name, kind, id);
        Ok(id)
    }

    pub fn get_int_async<F>(&self, name: &str, callback: F) -> Result<CallbackId>
    where
        F: FnOnce(i64) + Send + 'static,
    {
        let owned = name.to_string();
        self.get_global_async(name, GlobalKind::Int, move |value| match value.as_int() {
            Some(n) => callback(n),
            None => log::warn!("Global '{}' resolved as {}, expected int", owned, value.kind()),
        })
    }

    pub fn get_float_async<F>(&self, name: &str, callback: F) -> Result<CallbackId>
    where
        F: FnOnce(f64) + Send + 'static,
    {
        let owned = name.to_string();
        self.get_global_async(name, GlobalKind::Float, move |value| match value.as_float() {
            Some(x) => callback(x),
            None => log::warn!("Global '{}' resolved as {}, expected float", owned, value.kind()),
        })
    }

    pub fn get_string_async<F>(&self, name: &str, callback: F) -> Result<CallbackId>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let owned = name.to_string();
        self.get_global_async(name, GlobalKind::Str, move |value| match value {
            GlobalValue::Str(s) => callback(s),
            other => log::warn!("Global '{}' resolved as {}, expected string", owned, other.kind()),
        })
    }

    /// Drop a pending global read. Returns `false` if it already resolved.
    ///
    /// A late resolution from the engine is then discarded.
    pub fn cancel(&self, id: CallbackId) -> bool {
        self.table().remove(id)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Wake at most one shred waiting on `name`.
    ///
    /// Events the engine has never seen declared are tolerated and dropped
    /// inside the engine rather than reported.
    pub fn signal(&self, name: &str) -> Result<()> {
        self.check(name)?;
        self.inner.messenger.signal_event(name);
        Ok(())
    }

    /// Wake every shred waiting on `name`.
    pub fn broadcast(&self, name: &str) -> Result<()> {
        self.check(name)?;
        self.inner.messenger.broadcast_event(name);
        Ok(())
    }

    /// Call `callback` whenever `name` fires during a later render pass.
    ///
    /// With `persistent = false` the registration removes itself after the
    /// first invocation. The returned id is accepted by [`unlisten`](Self::unlisten).
    pub fn listen<F>(&self, name: &str, callback: F, persistent: bool) -> Result<CallbackId>
    where
        F: FnMut() + Send + 'static,
    {
        self.check(name)?;
        let id = self.table().insert_listener(name, Box::new(callback), persistent);
        log::debug!(
            "Listening for event '{}' as {} ({})",
            name,
            id,
            if persistent { "persistent" } else { "single-shot" }
        );
        self.inner.messenger.listen_for_event(name, id, persistent);
        Ok(id)
    }

    /// Cancel a listener. Unknown or already removed ids are a no-op.
    pub fn unlisten(&self, name: &str, id: CallbackId) -> Result<()> {
        self.check(name)?;
        if self.table().remove(id) {
            log::debug!("Stopped listening for event '{}' ({})", name, id);
        }
        self.inner.messenger.stop_listening_for_event(name, id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Number of callbacks still registered.
    pub fn pending_callbacks(&self) -> usize {
        self.table().len()
    }

    /// Snapshot of one registration, if it is still active.
    pub fn pending(&self, id: CallbackId) -> Option<PendingCallback> {
        self.table().pending(id)
    }

    /// Invoke the callbacks the engine has resolved so far.
    ///
    /// Returns how many callbacks ran. Resolutions for cancelled callbacks are
    /// discarded.
    pub fn dispatch_pending(&self) -> usize {
        let mut fired = 0;
        for resolution in self.inner.resolutions.try_iter() {
            let id = resolution.id();
            let claimed = self.table().claim(resolution);
            match claimed {
                Some(Claimed::Global { callback, value }) => {
                    callback(value);
                    fired += 1;
                }
                Some(Claimed::Event {
                    id,
                    mut callback,
                    persistent,
                }) => {
                    callback();
                    if persistent {
                        self.table().restore(id, callback);
                    }
                    fired += 1;
                }
                None => log::trace!("Discarding resolution for unknown callback {}", id),
            }
        }
        if fired > 0 {
            log::trace!("Dispatched {} callbacks", fired);
        }
        fired
    }
}

impl<M: EngineMessenger> std::fmt::Debug for ControlHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("ready", &self.is_ready())
            .field("pending", &self.pending_callbacks())
            .finish_non_exhaustive()
    }
}
