//! Blocking-by-polling reads and writes of global scalars.
//!
//! A global can only be read from inside the engine's own message pass, so
//! a synchronous read registers a one-shot callback and then renders frames
//! until it fires or the frame budget runs out.

use crossbeam_channel::bounded;

use crate::bridge::Bridge;
use crate::callbacks::CallbackId;
use crate::engine::{Engine, GlobalKind, GlobalValue};
use crate::error::{BridgeError, Result};

/// Frame budget used by the typed getters when the caller has no opinion.
pub const DEFAULT_RUN_FRAMES: usize = 256;

impl<E: Engine> Bridge<E> {
    /// Set a global scalar. Applied at the next block boundary.
    pub fn set_global(&self, name: &str, value: impl Into<GlobalValue>) -> Result<()> {
        self.control.set_global(name, value)
    }

    pub fn set_int(&self, name: &str, value: i64) -> Result<()> {
        self.control.set_int(name, value)
    }

    pub fn set_float(&self, name: &str, value: f64) -> Result<()> {
        self.control.set_float(name, value)
    }

    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.control.set_string(name, value)
    }

    /// Read a global, rendering up to `run_frames` frames to let it resolve.
    ///
    /// The rendered frames advance virtual time like any other
    /// [`advance`](Self::advance). If the read has not resolved by then it is
    /// cancelled and `CallbackTimeout` is returned; retry with a larger budget.
    pub fn get_global(
        &mut self,
        name: &str,
        kind: GlobalKind,
        run_frames: usize,
    ) -> Result<GlobalValue> {
        self.ready()?;
        let (tx, rx) = bounded(1);
        let id = self.control.get_global_async(name, kind, move |value| {
            let _ = tx.try_send(value);
        })?;

        if let Err(err) = self.advance(run_frames) {
            self.control.cancel(id);
            return Err(err);
        }

        match rx.try_recv() {
            Ok(value) if value.kind() == kind => Ok(value),
            Ok(value) => Err(BridgeError::TypeMismatch {
                name: name.to_string(),
                expected: kind,
                found: value.kind(),
            }),
            Err(_) => {
                self.control.cancel(id);
                log::debug!("Read of '{}' unresolved after {} frames", name, run_frames);
                Err(BridgeError::CallbackTimeout {
                    name: name.to_string(),
                    frames: run_frames,
                })
            }
        }
    }

    pub fn get_int(&mut self, name: &str, run_frames: usize) -> Result<i64> {
        match self.get_global(name, GlobalKind::Int, run_frames)? {
            GlobalValue::Int(n) => Ok(n),
            other => Err(mismatch(name, GlobalKind::Int, &other)),
        }
    }

    pub fn get_float(&mut self, name: &str, run_frames: usize) -> Result<f64> {
        match self.get_global(name, GlobalKind::Float, run_frames)? {
            GlobalValue::Float(x) => Ok(x),
            other => Err(mismatch(name, GlobalKind::Float, &other)),
        }
    }

    pub fn get_string(&mut self, name: &str, run_frames: usize) -> Result<String> {
        match self.get_global(name, GlobalKind::Str, run_frames)? {
            GlobalValue::Str(s) => Ok(s),
            other => Err(mismatch(name, GlobalKind::Str, &other)),
        }
    }

    /// Register a read without rendering anything.
    ///
    /// `callback` runs during whichever later render pass resolves it.
    pub fn get_global_async<F>(
        &self,
        name: &str,
        kind: GlobalKind,
        callback: F,
    ) -> Result<CallbackId>
    where
        F: FnOnce(GlobalValue) + Send + 'static,
    {
        self.control.get_global_async(name, kind, callback)
    }
}

fn mismatch(name: &str, expected: GlobalKind, found: &GlobalValue) -> BridgeError {
    BridgeError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}
