//! Engine parameter staging.
//!
//! Parameters are collected in an [`EngineConfig`] and staged onto the
//! engine one by one before `init()`. Once the engine is initialized most of
//! them become read-only observations of engine state: the engine may ignore
//! later writes, and that is the caller's concern rather than something the
//! bridge re-validates.

use std::fmt;
use std::path::PathBuf;

use crate::engine::Engine;
use crate::error::{BridgeError, Result};

/// Highest accepted deprecation strictness (0 = ignore, 1 = warn, 2 = error).
pub const MAX_DEPRECATE_LEVEL: i64 = 2;

/// Keys of the engine's parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Param {
    SampleRate,
    InputChannels,
    OutputChannels,
    WorkingDirectory,
    ChuginEnable,
    UserChugins,
    VmAdaptive,
    VmHalt,
    AutoDepend,
    DeprecateLevel,
    DumpInstructions,
    OtfEnable,
    OtfPort,
    TtyColor,
    TtyWidthHint,
    /// Engine version string. Read-only.
    Version,
    CompilerHighlightOnError,
    IsRealtimeAudioHint,
    OtfPrintWarnings,
}

/// Shape of the value a parameter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Str,
    List,
}

impl Param {
    /// Every parameter the engine knows about.
    pub const ALL: [Param; 19] = [
        Param::SampleRate,
        Param::InputChannels,
        Param::OutputChannels,
        Param::WorkingDirectory,
        Param::ChuginEnable,
        Param::UserChugins,
        Param::VmAdaptive,
        Param::VmHalt,
        Param::AutoDepend,
        Param::DeprecateLevel,
        Param::DumpInstructions,
        Param::OtfEnable,
        Param::OtfPort,
        Param::TtyColor,
        Param::TtyWidthHint,
        Param::Version,
        Param::CompilerHighlightOnError,
        Param::IsRealtimeAudioHint,
        Param::OtfPrintWarnings,
    ];

    /// The engine-side name of the parameter.
    pub fn key(self) -> &'static str {
        match self {
            Param::SampleRate => "SAMPLE_RATE",
            Param::InputChannels => "INPUT_CHANNELS",
            Param::OutputChannels => "OUTPUT_CHANNELS",
            Param::WorkingDirectory => "WORKING_DIRECTORY",
            Param::ChuginEnable => "CHUGIN_ENABLE",
            Param::UserChugins => "USER_CHUGINS",
            Param::VmAdaptive => "VM_ADAPTIVE",
            Param::VmHalt => "VM_HALT",
            Param::AutoDepend => "AUTO_DEPEND",
            Param::DeprecateLevel => "DEPRECATE_LEVEL",
            Param::DumpInstructions => "DUMP_INSTRUCTIONS",
            Param::OtfEnable => "OTF_ENABLE",
            Param::OtfPort => "OTF_PORT",
            Param::TtyColor => "TTY_COLOR",
            Param::TtyWidthHint => "TTY_WIDTH_HINT",
            Param::Version => "VERSION",
            Param::CompilerHighlightOnError => "COMPILER_HIGHLIGHT_ON_ERROR",
            Param::IsRealtimeAudioHint => "IS_REALTIME_AUDIO_HINT",
            Param::OtfPrintWarnings => "OTF_PRINT_WARNINGS",
        }
    }

    /// The value shape this parameter accepts.
    pub fn value_type(self) -> ParamType {
        match self {
            Param::WorkingDirectory | Param::Version => ParamType::Str,
            Param::UserChugins => ParamType::List,
            _ => ParamType::Int,
        }
    }

    /// Whether the parameter can never be written.
    pub fn is_read_only(self) -> bool {
        matches!(self, Param::Version)
    }

    /// Whether a write after `init()` still takes effect.
    ///
    /// Everything else is frozen once the engine has been initialized.
    pub fn is_mutable_after_init(self) -> bool {
        matches!(
            self,
            Param::TtyColor
                | Param::TtyWidthHint
                | Param::DumpInstructions
                | Param::CompilerHighlightOnError
                | Param::IsRealtimeAudioHint
                | Param::OtfPrintWarnings
        )
    }

    /// Check a value against this parameter's type and domain.
    pub fn check(self, value: &ParamValue) -> Result<()> {
        if self.is_read_only() {
            return Err(self.invalid("parameter is read-only"));
        }
        if value.value_type() != self.value_type() {
            return Err(self.invalid(format!(
                "expected a {:?} value, got {:?}",
                self.value_type(),
                value.value_type()
            )));
        }
        let ParamValue::Int(n) = *value else {
            return Ok(());
        };
        match self {
            Param::SampleRate if n <= 0 => Err(self.invalid(format!("must be positive, got {n}"))),
            Param::InputChannels | Param::OutputChannels if n < 0 => {
                Err(self.invalid(format!("must not be negative, got {n}")))
            }
            Param::DeprecateLevel if !(0..=MAX_DEPRECATE_LEVEL).contains(&n) => Err(self.invalid(
                format!("must be between 0 and {MAX_DEPRECATE_LEVEL}, got {n}"),
            )),
            Param::OtfPort if !(0..=i64::from(u16::MAX)).contains(&n) => {
                Err(self.invalid(format!("not a valid port: {n}")))
            }
            Param::TtyWidthHint if n < 0 => {
                Err(self.invalid(format!("must not be negative, got {n}")))
            }
            _ => Ok(()),
        }
    }

    fn invalid(self, reason: impl Into<String>) -> BridgeError {
        BridgeError::Config {
            param: self,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A parameter value as stored in the engine's table.
///
/// Flags travel as `Int(0)` / `Int(1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn value_type(&self) -> ParamType {
        match self {
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Str(_) => ParamType::Str,
            ParamValue::List(_) => ParamType::List,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_int().map(|n| n != 0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

/// Engine configuration staged before initialization.
///
/// Built once by the caller, applied field by field to the engine and then
/// frozen. Defaults match the engine's own defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub input_channels: u32,
    pub output_channels: u32,
    /// Base for relative source paths (None = process working directory).
    pub working_directory: Option<PathBuf>,
    pub chugin_enable: bool,
    /// Additional chugin search paths, in load order.
    pub user_chugin_paths: Vec<PathBuf>,
    pub vm_adaptive: bool,
    pub vm_halt: bool,
    pub auto_depend: bool,
    /// 0 = ignore deprecations, 1 = warn, 2 = error.
    pub deprecate_level: u8,
    pub dump_instructions: bool,
    pub otf_enable: bool,
    pub otf_port: u16,
    pub tty_color: bool,
    pub tty_width_hint: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            input_channels: 2,
            output_channels: 2,
            working_directory: None,
            chugin_enable: true,
            user_chugin_paths: Vec::new(),
            vm_adaptive: false,
            vm_halt: false,
            auto_depend: false,
            deprecate_level: 1,
            dump_instructions: false,
            otf_enable: false,
            otf_port: 8888,
            tty_color: false,
            tty_width_hint: 80,
        }
    }
}

impl EngineConfig {
    /// Create a new EngineConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_input_channels(mut self, channels: u32) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn with_output_channels(mut self, channels: u32) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_chugins(mut self, enable: bool) -> Self {
        self.chugin_enable = enable;
        self
    }

    /// Append a chugin search path.
    pub fn with_user_chugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_chugin_paths.push(path.into());
        self
    }

    pub fn with_vm_adaptive(mut self, enable: bool) -> Self {
        self.vm_adaptive = enable;
        self
    }

    pub fn with_vm_halt(mut self, enable: bool) -> Self {
        self.vm_halt = enable;
        self
    }

    pub fn with_auto_depend(mut self, enable: bool) -> Self {
        self.auto_depend = enable;
        self
    }

    pub fn with_deprecate_level(mut self, level: u8) -> Self {
        self.deprecate_level = level;
        self
    }

    pub fn with_dump_instructions(mut self, enable: bool) -> Self {
        self.dump_instructions = enable;
        self
    }

    /// Enable the on-the-fly programming listener on the given port.
    pub fn with_otf(mut self, enable: bool, port: u16) -> Self {
        self.otf_enable = enable;
        self.otf_port = port;
        self
    }

    pub fn with_tty(mut self, color: bool, width_hint: u32) -> Self {
        self.tty_color = color;
        self.tty_width_hint = width_hint;
        self
    }

    /// The parameter writes this config stages, in application order.
    ///
    /// The working directory and chugin list are only staged when set, so the
    /// engine keeps its own defaults otherwise.
    pub fn params(&self) -> Vec<(Param, ParamValue)> {
        let mut params = vec![
            (Param::SampleRate, self.sample_rate.into()),
            (Param::InputChannels, self.input_channels.into()),
            (Param::OutputChannels, self.output_channels.into()),
        ];
        if let Some(dir) = &self.working_directory {
            params.push((
                Param::WorkingDirectory,
                dir.to_string_lossy().into_owned().into(),
            ));
        }
        params.push((Param::ChuginEnable, self.chugin_enable.into()));
        if !self.user_chugin_paths.is_empty() {
            let paths: Vec<String> = self
                .user_chugin_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            params.push((Param::UserChugins, paths.into()));
        }
        params.extend([
            (Param::VmAdaptive, self.vm_adaptive.into()),
            (Param::VmHalt, self.vm_halt.into()),
            (Param::AutoDepend, self.auto_depend.into()),
            (Param::DeprecateLevel, i64::from(self.deprecate_level).into()),
            (Param::DumpInstructions, self.dump_instructions.into()),
            (Param::OtfEnable, self.otf_enable.into()),
            (Param::OtfPort, i64::from(self.otf_port).into()),
            (Param::TtyColor, self.tty_color.into()),
            (Param::TtyWidthHint, self.tty_width_hint.into()),
        ]);
        params
    }

    /// Check every staged value against its domain.
    pub fn validate(&self) -> Result<()> {
        for (param, value) in self.params() {
            param.check(&value)?;
        }
        if self.user_chugin_paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(BridgeError::Config {
                param: Param::UserChugins,
                reason: "chugin path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Validate and stage every field onto an engine that has not been
    /// initialized yet.
    pub fn apply<E: Engine + ?Sized>(&self, engine: &mut E) -> Result<()> {
        self.validate()?;
        for (param, value) in self.params() {
            log::debug!("Staging {} = {:?}", param, value);
            if !engine.set_param(param, value) {
                return Err(BridgeError::Config {
                    param,
                    reason: "rejected by engine".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read the current parameter values back from an engine.
    ///
    /// Values the engine does not report keep their defaults.
    pub fn from_engine<E: Engine + ?Sized>(engine: &E) -> Self {
        let defaults = Self::default();
        let int = |param: Param| engine.get_param(param).and_then(|v| v.as_int());
        let flag = |param: Param, fallback: bool| {
            engine
                .get_param(param)
                .and_then(|v| v.as_bool())
                .unwrap_or(fallback)
        };

        Self {
            sample_rate: int(Param::SampleRate)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.sample_rate),
            input_channels: int(Param::InputChannels)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.input_channels),
            output_channels: int(Param::OutputChannels)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.output_channels),
            working_directory: engine
                .get_param(Param::WorkingDirectory)
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            chugin_enable: flag(Param::ChuginEnable, defaults.chugin_enable),
            user_chugin_paths: engine
                .get_param(Param::UserChugins)
                .and_then(|v| v.as_list().map(|l| l.iter().map(PathBuf::from).collect()))
                .unwrap_or_default(),
            vm_adaptive: flag(Param::VmAdaptive, defaults.vm_adaptive),
            vm_halt: flag(Param::VmHalt, defaults.vm_halt),
            auto_depend: flag(Param::AutoDepend, defaults.auto_depend),
            deprecate_level: int(Param::DeprecateLevel)
                .and_then(|n| u8::try_from(n).ok())
                .unwrap_or(defaults.deprecate_level),
            dump_instructions: flag(Param::DumpInstructions, defaults.dump_instructions),
            otf_enable: flag(Param::OtfEnable, defaults.otf_enable),
            otf_port: int(Param::OtfPort)
                .and_then(|n| u16::try_from(n).ok())
                .unwrap_or(defaults.otf_port),
            tty_color: flag(Param::TtyColor, defaults.tty_color),
            tty_width_hint: int(Param::TtyWidthHint)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.tty_width_hint),
        }
    }
}
