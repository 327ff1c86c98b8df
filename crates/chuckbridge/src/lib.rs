//! chuckbridge - control bridge for a ChucK-style synthesis engine.
//!
//! This crate sits between a control thread and a sample-accurate synthesis
//! engine that runs concurrent tasks ("shreds"):
//!
//! - **Config** - [`EngineConfig`] stages parameters before `init()`
//! - **Engine** - the [`Engine`] / [`EngineMessenger`] traits the engine is consumed through
//! - **Shreds** - compile, replace, remove, clear and inspect shreds on a [`Bridge`]
//! - **Render** - block rendering with caller, reusable or fresh buffers ([`RunOptions`])
//! - **Globals** - scalar reads and writes, synchronous-by-polling or async
//! - **Events** - signal, broadcast and control-thread listeners
//! - **Realtime** - a driver thread that owns the bridge while it renders
//!
//! # Architecture
//!
//! The engine never calls back into caller code directly. Reads and event
//! listeners are registered in a callback table under a [`CallbackId`]; the
//! engine reports resolutions by id over a channel, and the bridge runs the
//! matching closures after each rendered block.
//!
//! Operations are split by capability. [`Bridge`] holds everything that
//! touches the engine's shred tables and must stay on one thread.
//! [`ControlHandle`] holds the queued-message subset (globals and events) and
//! can be cloned onto any thread, including while a [`RealtimeSession`] is
//! rendering.
//!
//! # Example
//!
//! ```
//! use chuckbridge::{Bridge, EngineConfig, RunOptions, SimEngine};
//!
//! let config = EngineConfig::new().with_sample_rate(48_000);
//! let mut bridge = Bridge::with_config(SimEngine::new(), &config)?;
//! bridge.init()?;
//!
//! let code = "global int count; SinOsc s => dac; 3 => count; 1::second => now;";
//! let result = bridge.compile(code, "", 1, false)?;
//! assert!(result.success);
//!
//! let samples = bridge.run(512, RunOptions::new().reuse())?.len();
//! assert_eq!(samples, 1024);
//! assert_eq!(bridge.get_int("count", 256)?, 3);
//! # Ok::<(), chuckbridge::BridgeError>(())
//! ```
//!
//! # Feature Flags
//!
//! - `sim` (default) - [`SimEngine`], a deterministic in-process engine that
//!   understands a handful of statements: `global <int|float|string|Event> x`,
//!   `SinOsc s => dac`, `Noise n => dac`, `adc => dac`, `440 => s.freq`,
//!   `0.5 => s.gain`, `42 => x`, `now/samp => x`, `10::ms => now`,
//!   `e => now`, `e.signal()`, `e.broadcast()` and `<<< x >>>`

pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod realtime;
pub mod render;

mod events;
mod globals;
mod shreds;

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, CONSOLE_TARGET};
pub use callbacks::{CallbackId, CallbackKind, PendingCallback};
pub use config::{EngineConfig, Param, ParamType, ParamValue, MAX_DEPRECATE_LEVEL};
pub use control::ControlHandle;
pub use engine::{
    CompileResult, ConsoleCallback, Engine, EngineMessenger, GlobalKind, GlobalValue, Resolution,
    ShredHandle, ShredId,
};
pub use error::{BridgeError, Result};
pub use globals::DEFAULT_RUN_FRAMES;
pub use realtime::{AudioSink, NullSink, RealtimeSession, StartRealtimeError};
pub use render::{ChannelLayout, RenderLoop, RenderOutput, RunOptions};

#[cfg(feature = "sim")]
pub use sim::{SimEngine, SimMessenger, SIM_VERSION};
