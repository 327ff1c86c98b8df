//! The narrow interface to the synthesis engine.
//!
//! The engine (compiler, scheduler, unit-generator graph) is an external
//! collaborator. The bridge only talks to it through two traits:
//!
//! - [`Engine`] - exclusive, control-thread operations: parameters, init,
//!   compilation, shred tables and block rendering
//! - [`EngineMessenger`] - queued control messages (globals and events) that
//!   the engine consumes at block boundaries, and that are therefore safe to
//!   send while another thread is rendering
//!
//! The engine never holds a caller closure. Pending reads and event listeners
//! are identified by an opaque [`CallbackId`]; when the engine resolves one it
//! emits a [`Resolution`] on the channel attached with
//! [`Engine::attach_resolutions`], and the bridge invokes the closure it owns.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crossbeam_channel::Sender;

use crate::callbacks::CallbackId;
use crate::config::{Param, ParamValue};

/// Identifier of a shred, assigned by the engine.
///
/// `ShredId::NONE` (0) is the failure sentinel returned by `replace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShredId(pub u64);

impl ShredId {
    /// The "no shred" sentinel.
    pub const NONE: ShredId = ShredId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ShredId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ShredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a shred as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ShredHandle {
    pub id: ShredId,
    /// Source path for file shreds, `"inline"` for code strings.
    pub name: String,
    /// Arguments passed at spawn time.
    pub args: Vec<String>,
    /// Virtual time (in samples) at which the shred was spawned.
    pub spawn_time: u64,
    /// Scheduled on the timeline (not blocked on an event).
    pub is_running: bool,
    /// Finished its program; about to be reaped.
    pub is_done: bool,
}

/// Outcome of a compile request.
///
/// Compile failures are reported, never raised: callers branch on `success`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileResult {
    pub success: bool,
    /// Spawned shreds, in spawn order.
    pub ids: Vec<ShredId>,
}

impl CompileResult {
    pub fn spawned(ids: Vec<ShredId>) -> Self {
        Self { success: true, ids }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    /// The first spawned shred, if any.
    pub fn first(&self) -> Option<ShredId> {
        self.ids.first().copied()
    }
}

/// Scalar kinds a global can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalKind {
    Int,
    Float,
    Str,
}

impl fmt::Display for GlobalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlobalKind::Int => "int",
            GlobalKind::Float => "float",
            GlobalKind::Str => "string",
        })
    }
}

/// Value of a global scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl GlobalValue {
    pub fn kind(&self) -> GlobalKind {
        match self {
            GlobalValue::Int(_) => GlobalKind::Int,
            GlobalValue::Float(_) => GlobalKind::Float,
            GlobalValue::Str(_) => GlobalKind::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            GlobalValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            GlobalValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GlobalValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for GlobalValue {
    fn from(value: i64) -> Self {
        GlobalValue::Int(value)
    }
}

impl From<f64> for GlobalValue {
    fn from(value: f64) -> Self {
        GlobalValue::Float(value)
    }
}

impl From<&str> for GlobalValue {
    fn from(value: &str) -> Self {
        GlobalValue::Str(value.to_string())
    }
}

impl From<String> for GlobalValue {
    fn from(value: String) -> Self {
        GlobalValue::Str(value)
    }
}

/// A callback the engine resolved during block processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A pending global read completed.
    Global { id: CallbackId, value: GlobalValue },
    /// A listened-for event fired.
    Event { id: CallbackId },
}

impl Resolution {
    pub fn id(&self) -> CallbackId {
        match self {
            Resolution::Global { id, .. } | Resolution::Event { id } => *id,
        }
    }
}

/// Sink for engine console output (`chout` / `cherr`).
pub type ConsoleCallback = Box<dyn FnMut(&str) + Send>;

/// Queued control messages, consumed by the engine at block boundaries.
///
/// Implementations must be cheap to clone and safe to use from any thread,
/// including while a realtime thread is rendering.
pub trait EngineMessenger: Clone + Send + Sync + 'static {
    fn set_global(&self, name: &str, value: GlobalValue);

    /// Request the value of a global; resolved as [`Resolution::Global`].
    ///
    /// Requests for undeclared globals (or the wrong kind) are dropped by the
    /// engine and never resolve.
    fn get_global(&self, name: &str, kind: GlobalKind, id: CallbackId);

    /// Wake at most one shred waiting on the event.
    fn signal_event(&self, name: &str);

    /// Wake every shred waiting on the event.
    fn broadcast_event(&self, name: &str);

    /// Report every firing of the event as [`Resolution::Event`]. A
    /// non-persistent listener is dropped by the engine after its first firing.
    fn listen_for_event(&self, name: &str, id: CallbackId, persistent: bool);

    fn stop_listening_for_event(&self, name: &str, id: CallbackId);
}

/// Exclusive engine operations.
///
/// Everything here mutates tables a realtime rendering thread also reads, so
/// these are only ever called from the thread that owns the engine.
pub trait Engine: Send + 'static {
    type Messenger: EngineMessenger;

    /// Stage a parameter. Returns `false` when the engine rejects or ignores
    /// the write.
    fn set_param(&mut self, param: Param, value: ParamValue) -> bool;

    fn get_param(&self, param: Param) -> Option<ParamValue>;

    /// Initialize with the staged parameters. Returns `false` on failure.
    fn init(&mut self) -> bool;

    fn is_initialized(&self) -> bool;

    /// Compile source code and spawn `count` shreds from it.
    fn compile_code(
        &mut self,
        code: &str,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> CompileResult;

    /// Compile a source file and spawn `count` shreds from it.
    fn compile_file(
        &mut self,
        path: &Path,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> CompileResult;

    /// Render `frames` sample frames.
    ///
    /// Buffers are interleaved; `input` holds `frames * input_channels`
    /// samples and `output` holds `frames * output_channels`.
    fn run(&mut self, input: &[f32], output: &mut [f32], frames: usize);

    /// Current virtual time in samples.
    fn now(&self) -> u64;

    fn remove_shred(&mut self, id: ShredId);

    /// Swap the code of a running shred. Returns the new id, or
    /// [`ShredId::NONE`] on failure.
    fn replace_shred(&mut self, id: ShredId, code: &str, args: &str) -> ShredId;

    fn clear_vm(&mut self);

    /// Reset the id generator for future spawns.
    fn reset_shred_id(&mut self);

    fn all_shred_ids(&self) -> BTreeSet<ShredId>;

    fn shred_info(&self, id: ShredId) -> Option<ShredHandle>;

    /// A handle for queued control messages.
    fn messenger(&self) -> Self::Messenger;

    /// Channel on which resolved callbacks are reported.
    fn attach_resolutions(&mut self, tx: Sender<Resolution>);

    fn set_stdout_callback(&mut self, callback: ConsoleCallback);

    fn set_stderr_callback(&mut self, callback: ConsoleCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shred_id_sentinel() {
        assert!(ShredId::NONE.is_none());
        assert!(!ShredId::new(3).is_none());
        assert_eq!(ShredId::from(7).as_u64(), 7);
        assert_eq!(ShredId::default(), ShredId::NONE);
    }

    #[test]
    fn test_global_value_accessors() {
        assert_eq!(GlobalValue::from(42i64).as_int(), Some(42));
        assert_eq!(GlobalValue::from(42i64).as_float(), None);
        assert!((GlobalValue::from(3.5).as_float().unwrap() - 3.5).abs() < 1e-9);
        assert_eq!(GlobalValue::from("hi").as_str(), Some("hi"));
        assert_eq!(GlobalValue::from("hi").kind(), GlobalKind::Str);
    }

    #[test]
    fn test_compile_result_helpers() {
        let ok = CompileResult::spawned(vec![ShredId(4), ShredId(5)]);
        assert!(ok.success);
        assert_eq!(ok.first(), Some(ShredId(4)));
        let failed = CompileResult::failed();
        assert!(!failed.success);
        assert!(failed.ids.is_empty());
    }
}
