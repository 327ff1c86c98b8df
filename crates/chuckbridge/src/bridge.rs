//! The control-thread facade over an engine.
//!
//! A [`Bridge`] owns the engine, the render loop and the callback table. It
//! is the only way to reach the exclusive operations (compilation, shred
//! management, rendering); the thread-safe subset lives on the
//! [`ControlHandle`] it hands out.

use std::fmt;

use crossbeam_channel::unbounded;

use crate::config::{EngineConfig, Param, ParamValue};
use crate::control::ControlHandle;
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::render::{ChannelLayout, RenderLoop, RenderOutput, RunOptions};

/// Log target for engine console output without an installed callback.
pub const CONSOLE_TARGET: &str = "chuckbridge::console";

/// Control bridge around an engine.
pub struct Bridge<E: Engine> {
    pub(crate) engine: E,
    render: RenderLoop,
    pub(crate) control: ControlHandle<E::Messenger>,
    layout: Option<ChannelLayout>,
    sample_rate: u32,
}

impl<E: Engine> Bridge<E> {
    /// Wrap an engine. Parameters can be staged until [`init`](Self::init).
    pub fn new(mut engine: E) -> Self {
        let (tx, rx) = unbounded();
        engine.attach_resolutions(tx);
        engine.set_stdout_callback(Box::new(|line: &str| {
            log::info!(target: CONSOLE_TARGET, "{}", line.trim_end())
        }));
        engine.set_stderr_callback(Box::new(|line: &str| {
            log::warn!(target: CONSOLE_TARGET, "{}", line.trim_end())
        }));
        let control = ControlHandle::new(engine.messenger(), rx);

        let mut bridge = Self {
            engine,
            render: RenderLoop::new(),
            control,
            layout: None,
            sample_rate: 0,
        };
        if bridge.engine.is_initialized() {
            bridge.mark_initialized();
        }
        bridge
    }

    /// Wrap an engine and stage a full configuration onto it.
    pub fn with_config(engine: E, config: &EngineConfig) -> Result<Self> {
        let mut bridge = Self::new(engine);
        bridge.configure(config)?;
        Ok(bridge)
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Stage every field of `config`.
    ///
    /// After `init()` the writes are forwarded as-is and the engine decides
    /// which of them still matter.
    pub fn configure(&mut self, config: &EngineConfig) -> Result<()> {
        if !self.is_initialized() {
            return config.apply(&mut self.engine);
        }
        for (param, value) in config.params() {
            self.set_param(param, value)?;
        }
        Ok(())
    }

    /// Stage a single parameter.
    ///
    /// Before init the value is checked against the parameter's domain and a
    /// refusal by the engine is an error. After init only read-only keys are
    /// rejected; an ignored write is logged and otherwise left to the caller.
    pub fn set_param(&mut self, param: Param, value: impl Into<ParamValue>) -> Result<()> {
        let value = value.into();
        if !self.is_initialized() {
            param.check(&value)?;
            log::debug!("Staging {} = {:?}", param, value);
            if !self.engine.set_param(param, value) {
                return Err(BridgeError::Config {
                    param,
                    reason: "rejected by engine".to_string(),
                });
            }
            return Ok(());
        }

        if param.is_read_only() {
            return Err(BridgeError::Config {
                param,
                reason: "parameter is read-only".to_string(),
            });
        }
        if !self.engine.set_param(param, value) {
            log::debug!("Engine ignored {} after initialization", param);
        }
        Ok(())
    }

    /// Current value of a parameter as the engine reports it.
    pub fn param(&self, param: Param) -> Option<ParamValue> {
        self.engine.get_param(param)
    }

    /// Read the whole configuration back from the engine.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::from_engine(&self.engine)
    }

    /// Engine version string.
    pub fn version(&self) -> Option<String> {
        self.param(Param::Version)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Initialize the engine with the staged parameters.
    ///
    /// Calling it again on an initialized engine is a no-op.
    pub fn init(&mut self) -> Result<()> {
        if self.is_initialized() {
            log::debug!("Engine already initialized");
            return Ok(());
        }
        if !self.engine.init() {
            log::warn!("Engine initialization failed");
            return Err(BridgeError::InitFailed);
        }
        self.mark_initialized();
        Ok(())
    }

    fn mark_initialized(&mut self) {
        let config = self.config();
        let layout = ChannelLayout::new(
            config.input_channels as usize,
            config.output_channels as usize,
        );
        log::debug!(
            "Engine initialized: {} Hz, {} in / {} out",
            config.sample_rate,
            layout.input,
            layout.output
        );
        self.sample_rate = config.sample_rate;
        self.layout = Some(layout);
        self.control.mark_ready();
    }

    pub fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    /// Channel layout, or `EngineNotReady` before init.
    pub fn ready(&self) -> Result<ChannelLayout> {
        self.layout.ok_or(BridgeError::EngineNotReady)
    }

    /// Sample rate the engine was initialized with (0 before init).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn input_channels(&self) -> usize {
        self.layout.map_or(0, |l| l.input)
    }

    pub fn output_channels(&self) -> usize {
        self.layout.map_or(0, |l| l.output)
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render `frames` frames, then run every callback the engine resolved.
    ///
    /// See [`RunOptions`] for how the output and input buffers are chosen.
    pub fn run<'a>(
        &'a mut self,
        frames: usize,
        options: RunOptions<'a>,
    ) -> Result<RenderOutput<'a>> {
        let layout = self.ready()?;
        let output = self.render.run(&mut self.engine, layout, frames, options)?;
        self.control.dispatch_pending();
        Ok(output)
    }

    /// Render `frames` frames into scratch storage and discard them.
    pub fn advance(&mut self, frames: usize) -> Result<()> {
        let layout = self.ready()?;
        self.render.advance(&mut self.engine, layout, frames)?;
        self.control.dispatch_pending();
        Ok(())
    }

    /// Current virtual time in samples.
    pub fn now(&self) -> u64 {
        self.engine.now()
    }

    /// Frames rendered through this bridge.
    pub fn frames_rendered(&self) -> u64 {
        self.render.frames_rendered()
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    /// A handle for the operations that stay safe during realtime rendering.
    pub fn control(&self) -> ControlHandle<E::Messenger> {
        self.control.clone()
    }

    /// Route engine stdout (`chout`, `<<< >>>`) to `callback`.
    pub fn set_stdout_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.engine.set_stdout_callback(Box::new(callback));
    }

    /// Route engine stderr (`cherr`, compiler diagnostics) to `callback`.
    pub fn set_stderr_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.engine.set_stderr_callback(Box::new(callback));
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}

impl<E: Engine> fmt::Debug for Bridge<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("layout", &self.layout)
            .field("sample_rate", &self.sample_rate)
            .field("render", &self.render)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}
