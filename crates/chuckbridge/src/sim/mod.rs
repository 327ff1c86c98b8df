//! Deterministic in-process engine.
//!
//! [`SimEngine`] implements [`Engine`] over a tiny statement subset so the
//! bridge can be exercised without a native synthesis engine. It is not a
//! language implementation; see the crate docs for the accepted statements.
//!
//! Control messages are consumed at the top of every sample frame, shreds
//! run in id order, remove and clear take effect at the next frame, and
//! replace is immediate.

mod program;
mod vm;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Sender};

use crate::callbacks::CallbackId;
use crate::config::{EngineConfig, Param, ParamValue};
use crate::engine::{
    CompileResult, ConsoleCallback, Engine, EngineMessenger, GlobalKind, GlobalValue, Resolution,
    ShredHandle, ShredId,
};

use program::Program;
use vm::{Control, Vm};

/// Version string reported through [`Param::Version`].
pub const SIM_VERSION: &str = "1.5.4.0 (chuckbridge-sim)";

const DEFAULT_SEED: u64 = 0x5eed;

/// Queued control messages for a [`SimEngine`].
#[derive(Clone)]
pub struct SimMessenger {
    tx: Sender<Control>,
}

impl SimMessenger {
    fn send(&self, message: Control) {
        // The engine owns the receiver; once it is gone there is nobody to tell.
        let _ = self.tx.send(message);
    }
}

impl EngineMessenger for SimMessenger {
    fn set_global(&self, name: &str, value: GlobalValue) {
        self.send(Control::SetGlobal(name.to_string(), value));
    }

    fn get_global(&self, name: &str, kind: GlobalKind, id: CallbackId) {
        self.send(Control::GetGlobal(name.to_string(), kind, id));
    }

    fn signal_event(&self, name: &str) {
        self.send(Control::Signal(name.to_string()));
    }

    fn broadcast_event(&self, name: &str) {
        self.send(Control::Broadcast(name.to_string()));
    }

    fn listen_for_event(&self, name: &str, id: CallbackId, persistent: bool) {
        self.send(Control::Listen(name.to_string(), id, persistent));
    }

    fn stop_listening_for_event(&self, name: &str, id: CallbackId) {
        self.send(Control::StopListening(name.to_string(), id));
    }
}

impl fmt::Debug for SimMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimMessenger").finish_non_exhaustive()
    }
}

/// Simulated synthesis engine.
pub struct SimEngine {
    params: BTreeMap<Param, ParamValue>,
    initialized: bool,
    vm: Vm,
    tx: Sender<Control>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let mut params: BTreeMap<Param, ParamValue> =
            EngineConfig::default().params().into_iter().collect();
        params.insert(Param::WorkingDirectory, ParamValue::from(""));
        params.insert(Param::UserChugins, ParamValue::List(Vec::new()));
        params.insert(Param::Version, ParamValue::from(SIM_VERSION));
        params.insert(Param::CompilerHighlightOnError, ParamValue::Int(0));
        params.insert(Param::IsRealtimeAudioHint, ParamValue::Int(0));
        params.insert(Param::OtfPrintWarnings, ParamValue::Int(1));

        Self {
            params,
            initialized: false,
            vm: Vm::new(rx, DEFAULT_SEED),
            tx,
        }
    }

    /// Cap the number of live shreds. Spawns beyond the cap are skipped.
    pub fn with_shred_limit(mut self, limit: usize) -> Self {
        self.vm.set_shred_limit(Some(limit));
        self
    }

    /// Seed for `Noise` generators.
    pub fn with_seed(mut self, seed: u64) -> Self {
        let (tx, rx) = unbounded();
        let limit = self.vm.shred_limit();
        self.vm = Vm::new(rx, seed);
        self.vm.set_shred_limit(limit);
        self.tx = tx;
        self
    }

    fn int_param(&self, param: Param) -> Option<i64> {
        self.params.get(&param).and_then(ParamValue::as_int)
    }

    fn parse(&mut self, source: &str, origin: &str) -> Option<Program> {
        let vm = &self.vm;
        match program::parse(source, &|name: &str| vm.declared(name)) {
            Ok(program) => Some(program),
            Err(err) => {
                let message = format!("[{origin}]:{err}");
                self.vm.console.err(&message);
                None
            }
        }
    }

    fn compile_source(
        &mut self,
        source: &str,
        origin: &str,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> CompileResult {
        if !self.initialized {
            self.vm.console.err("[chuck]: VM not initialized");
            return CompileResult::failed();
        }
        let Some(program) = self.parse(source, origin) else {
            return CompileResult::failed();
        };
        let ids = self.vm.spawn(program, origin, &split_args(args), count, immediate);
        CompileResult::spawned(ids)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        let base = self
            .params
            .get(&Param::WorkingDirectory)
            .and_then(ParamValue::as_str)
            .filter(|dir| !dir.is_empty());
        match base {
            Some(dir) if path.is_relative() => Path::new(dir).join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split(':')
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

impl Engine for SimEngine {
    type Messenger = SimMessenger;

    fn set_param(&mut self, param: Param, value: ParamValue) -> bool {
        if param.check(&value).is_err() {
            return false;
        }
        if self.initialized && !param.is_mutable_after_init() {
            return false;
        }
        self.params.insert(param, value);
        true
    }

    fn get_param(&self, param: Param) -> Option<ParamValue> {
        self.params.get(&param).cloned()
    }

    fn init(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        let rate = self.int_param(Param::SampleRate).unwrap_or(0);
        let ins = self.int_param(Param::InputChannels).and_then(|n| usize::try_from(n).ok());
        let outs = self.int_param(Param::OutputChannels).and_then(|n| usize::try_from(n).ok());
        let (Some(ins), Some(outs)) = (ins, outs) else {
            return false;
        };
        if rate <= 0 {
            return false;
        }
        self.vm.sample_rate = rate as f64;
        self.vm.input_channels = ins;
        self.vm.output_channels = outs;
        self.initialized = true;
        true
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn compile_code(
        &mut self,
        code: &str,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> CompileResult {
        self.compile_source(code, "inline", args, count, immediate)
    }

    fn compile_file(
        &mut self,
        path: &Path,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> CompileResult {
        let path = self.resolve_path(path);
        let origin = path.to_string_lossy().into_owned();
        match std::fs::read_to_string(&path) {
            Ok(source) => self.compile_source(&source, &origin, args, count, immediate),
            Err(e) => {
                self.vm.console.err(&format!("[chuck]: cannot open file '{origin}': {e}"));
                CompileResult::failed()
            }
        }
    }

    fn run(&mut self, input: &[f32], output: &mut [f32], frames: usize) {
        self.vm.run(input, output, frames);
    }

    fn now(&self) -> u64 {
        self.vm.now()
    }

    fn remove_shred(&mut self, id: ShredId) {
        self.vm.queue_remove(id);
    }

    fn replace_shred(&mut self, id: ShredId, code: &str, args: &str) -> ShredId {
        if !self.vm.ids().contains(&id) {
            return ShredId::NONE;
        }
        match self.parse(code, "inline") {
            Some(program) => self.vm.replace(id, program, &split_args(args)),
            None => ShredId::NONE,
        }
    }

    fn clear_vm(&mut self) {
        self.vm.queue_clear();
    }

    fn reset_shred_id(&mut self) {
        self.vm.reset_id();
    }

    fn all_shred_ids(&self) -> BTreeSet<ShredId> {
        self.vm.ids()
    }

    fn shred_info(&self, id: ShredId) -> Option<ShredHandle> {
        self.vm.info(id)
    }

    fn messenger(&self) -> SimMessenger {
        SimMessenger {
            tx: self.tx.clone(),
        }
    }

    fn attach_resolutions(&mut self, tx: Sender<Resolution>) {
        self.vm.attach_resolutions(tx);
    }

    fn set_stdout_callback(&mut self, callback: ConsoleCallback) {
        self.vm.console.stdout = Some(callback);
    }

    fn set_stderr_callback(&mut self, callback: ConsoleCallback) {
        self.vm.console.stderr = Some(callback);
    }
}

impl fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEngine")
            .field("initialized", &self.initialized)
            .field("now", &self.vm.now())
            .field("shreds", &self.vm.ids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::error::BridgeError;
    use crate::globals::DEFAULT_RUN_FRAMES;
    use crate::render::RunOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn bridge() -> Bridge<SimEngine> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut bridge = Bridge::new(SimEngine::new());
        bridge.init().unwrap();
        bridge
    }

    fn capture_stdout(bridge: &mut Bridge<SimEngine>) -> Arc<Mutex<Vec<String>>> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        bridge.set_stdout_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        lines
    }

    #[test]
    fn test_every_option_readable_after_init() {
        let config = EngineConfig::new()
            .with_sample_rate(48_000)
            .with_input_channels(1)
            .with_output_channels(6)
            .with_working_directory("/tmp")
            .with_chugins(false)
            .with_user_chugin("/opt/chugins")
            .with_vm_adaptive(true)
            .with_vm_halt(true)
            .with_auto_depend(true)
            .with_deprecate_level(0)
            .with_dump_instructions(true)
            .with_otf(true, 9001)
            .with_tty(true, 132);
        let mut bridge = Bridge::with_config(SimEngine::new(), &config).unwrap();
        bridge.init().unwrap();
        assert_eq!(bridge.config(), config);
        assert_eq!(bridge.version().as_deref(), Some(SIM_VERSION));
    }

    #[test]
    fn test_compile_reports_success_and_failure() {
        let mut bridge = bridge();
        let ok = bridge.compile("SinOsc s => dac;", "", 1, false).unwrap();
        assert!(ok.success);
        assert_eq!(ok.ids.len(), 1);
        assert!(ok.ids[0].as_u64() > 0);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        bridge.set_stderr_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        let bad = bridge.compile("not valid code", "", 1, false).unwrap();
        assert!(!bad.success);
        assert!(bad.ids.is_empty());
        assert!(errors.lock().unwrap()[0].contains("syntax error"));
    }

    #[test]
    fn test_reuse_buffer_identity() {
        let mut bridge = bridge();
        let first = bridge.run(512, RunOptions::new().reuse()).unwrap().as_ptr();
        let second = bridge.run(512, RunOptions::new().reuse()).unwrap().as_ptr();
        assert_eq!(first, second);
        let third = bridge.run(256, RunOptions::new().reuse()).unwrap().as_ptr();
        assert_eq!(bridge.render_loop().reuse_tag(), Some((256, 2)));
        // The old pair is dropped only after its replacement is allocated.
        assert_ne!(third, first);
    }

    #[test]
    fn test_caller_buffer_filled_with_oscillator() {
        let mut bridge = bridge();
        bridge
            .compile("SinOsc s => dac; 440 => s.freq; 1::second => now;", "", 1, false)
            .unwrap();
        let mut buf = vec![0.0f32; 256 * 2];
        let ptr = buf.as_ptr();
        let out = bridge.run(256, RunOptions::new().output(&mut buf)).unwrap();
        assert_eq!(out.as_ptr(), ptr);
        drop(out);
        assert!(buf.iter().any(|s| s.abs() > 1e-3));
        assert!(buf.iter().all(|s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn test_input_passthrough() {
        let mut bridge = bridge();
        bridge.compile("adc => dac; 1::second => now;", "", 1, false).unwrap();
        let input: Vec<f32> = (0..8).map(|i| i as f32 / 10.0).collect();
        let out = bridge.run(4, RunOptions::new().input(&input)).unwrap().into_vec();
        for (a, b) in out.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_finished_shred_is_reaped() {
        let mut bridge = bridge();
        let result = bridge.compile("SinOsc s => dac; 10::samp => now;", "", 1, false).unwrap();
        let id = result.ids[0];
        bridge.advance(5).unwrap();
        let info = bridge.info(id).unwrap().unwrap();
        assert!(info.is_running);
        assert!(!info.is_done);
        bridge.advance(10).unwrap();
        assert!(bridge.info(id).unwrap().is_none());
        let out = bridge.run(4, RunOptions::new()).unwrap();
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_remove_unknown_leaves_ids_unchanged() {
        let mut bridge = bridge();
        bridge.compile("SinOsc s => dac; 1::second => now;", "", 2, false).unwrap();
        let before = bridge.list_ids().unwrap();
        bridge.remove(ShredId(99_999)).unwrap();
        bridge.advance(1).unwrap();
        assert_eq!(bridge.list_ids().unwrap(), before);
    }

    #[test]
    fn test_remove_applies_next_frame() {
        let mut bridge = bridge();
        let id = bridge
            .compile("SinOsc s => dac; 1::second => now;", "", 1, false)
            .unwrap()
            .ids[0];
        bridge.remove(id).unwrap();
        assert!(bridge.list_ids().unwrap().contains(&id));
        bridge.advance(1).unwrap();
        assert!(!bridge.list_ids().unwrap().contains(&id));
    }

    #[test]
    fn test_clear_empties_vm_after_flush() {
        let mut bridge = bridge();
        bridge.compile("SinOsc s => dac; 1::second => now;", "", 5, false).unwrap();
        bridge.compile("global Event e; e => now;", "", 1, false).unwrap();
        bridge.clear().unwrap();
        bridge.advance(1).unwrap();
        assert!(bridge.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_replace_swaps_code() {
        let mut bridge = bridge();
        let out = capture_stdout(&mut bridge);
        let id = bridge
            .compile("SinOsc s => dac; 1::second => now;", "", 1, false)
            .unwrap()
            .ids[0];
        let new_id = bridge.replace(id, "<<< 7 >>>; 1::second => now;", "").unwrap();
        assert!(!new_id.is_none());
        assert_ne!(new_id, id);
        assert_eq!(bridge.list_ids().unwrap(), BTreeSet::from([new_id]));
        assert_eq!(*out.lock().unwrap(), vec!["7 :(int)"]);

        assert_eq!(bridge.replace(new_id, "bogus", "").unwrap(), ShredId::NONE);
        assert_eq!(bridge.replace(ShredId(500), "<<< 1 >>>;", "").unwrap(), ShredId::NONE);
    }

    #[test]
    fn test_reset_id_counter_affects_future_spawns() {
        let mut bridge = bridge();
        let ids = bridge
            .compile("SinOsc s => dac; 1::second => now;", "", 3, false)
            .unwrap()
            .ids;
        assert_eq!(ids, vec![ShredId(1), ShredId(2), ShredId(3)]);
        bridge.remove(ShredId(3)).unwrap();
        bridge.advance(1).unwrap();
        bridge.reset_id_counter().unwrap();
        let next = bridge.compile("SinOsc s => dac;", "", 1, false).unwrap().ids;
        assert_eq!(next, vec![ShredId(3)]);
        assert!(bridge.list_ids().unwrap().contains(&ShredId(1)));
    }

    #[test]
    fn test_partial_spawn_rolled_back_at_shred_limit() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut bridge = Bridge::new(SimEngine::new().with_shred_limit(2));
        bridge.init().unwrap();
        let result = bridge.compile("SinOsc s => dac; 1::second => now;", "", 3, false).unwrap();
        assert!(!result.success);
        bridge.advance(1).unwrap();
        assert!(bridge.list_ids().unwrap().is_empty());

        let result = bridge.compile("SinOsc s => dac; 1::second => now;", "", 2, false).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_shred_info_fields() {
        let mut bridge = bridge();
        bridge.advance(100).unwrap();
        let id = bridge
            .compile("global Event go; go => now;", "tempo:120", 1, true)
            .unwrap()
            .ids[0];
        let info = bridge.info(id).unwrap().unwrap();
        assert_eq!(info.name, "inline");
        assert_eq!(info.args, vec!["tempo", "120"]);
        assert_eq!(info.spawn_time, 100);
        assert!(!info.is_running);
        assert!(!info.is_done);
    }

    #[test]
    fn test_immediate_runs_leading_statements() {
        let mut bridge = bridge();
        let out = capture_stdout(&mut bridge);
        bridge.compile("<<< 1 >>>;", "", 1, true).unwrap();
        assert_eq!(*out.lock().unwrap(), vec!["1 :(int)"]);
        bridge.compile("<<< 2 >>>;", "", 1, false).unwrap();
        assert_eq!(out.lock().unwrap().len(), 1);
        bridge.advance(1).unwrap();
        assert_eq!(*out.lock().unwrap(), vec!["1 :(int)", "2 :(int)"]);
    }

    #[test]
    fn test_get_after_set_returns_value() {
        let mut bridge = bridge();
        bridge.compile("global int x;", "", 1, false).unwrap();
        bridge.set_int("x", 42).unwrap();
        assert_eq!(bridge.get_int("x", DEFAULT_RUN_FRAMES).unwrap(), 42);
    }

    #[test]
    fn test_zero_frame_budget_times_out() {
        let mut bridge = bridge();
        bridge.compile("global int x;", "", 1, false).unwrap();
        bridge.set_int("x", 42).unwrap();
        assert!(matches!(
            bridge.get_int("x", 0),
            Err(BridgeError::CallbackTimeout { frames: 0, .. })
        ));
        // The late resolution of the cancelled read is discarded.
        assert_eq!(bridge.get_int("x", 1).unwrap(), 42);
    }

    #[test]
    fn test_undeclared_global_times_out() {
        let mut bridge = bridge();
        match bridge.get_float("nope", 128) {
            Err(BridgeError::CallbackTimeout { name, frames }) => {
                assert_eq!(name, "nope");
                assert_eq!(frames, 128);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_shred_writes_are_visible() {
        let mut bridge = bridge();
        bridge
            .compile("global float f; global string s; 0.25 => f; \"hello\" => s;", "", 1, true)
            .unwrap();
        assert!((bridge.get_float("f", 1).unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(bridge.get_string("s", 1).unwrap(), "hello");
    }

    #[test]
    fn test_virtual_time_capture() {
        let mut bridge = bridge();
        bridge
            .compile("global int vmTime; 100::samp => now; now/samp => vmTime;", "", 1, false)
            .unwrap();
        bridge.advance(200).unwrap();
        assert_eq!(bridge.get_int("vmTime", 1).unwrap(), 100);
    }

    fn listen_twice(persistent: bool) -> usize {
        let mut bridge = bridge();
        bridge.compile("global Event e;", "", 1, false).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bridge
            .listen(
                "e",
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                persistent,
            )
            .unwrap();
        for _ in 0..2 {
            bridge.signal("e").unwrap();
            bridge.advance(256).unwrap();
        }
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn test_single_shot_listener() {
        assert_eq!(listen_twice(false), 1);
    }

    #[test]
    fn test_persistent_listener() {
        assert_eq!(listen_twice(true), 2);
    }

    #[test]
    fn test_signal_wakes_one_broadcast_wakes_all() {
        let mut bridge = bridge();
        let out = capture_stdout(&mut bridge);
        bridge
            .compile("global Event go; go => now; <<< 1 >>>;", "", 3, false)
            .unwrap();
        bridge.advance(1).unwrap();

        bridge.signal("go").unwrap();
        bridge.advance(1).unwrap();
        assert_eq!(out.lock().unwrap().len(), 1);

        bridge.broadcast("go").unwrap();
        bridge.advance(1).unwrap();
        assert_eq!(out.lock().unwrap().len(), 3);
        bridge.advance(1).unwrap();
        assert!(bridge.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_shred_signal_reaches_listener() {
        let mut bridge = bridge();
        bridge.compile("global Event tick;", "", 1, false).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let fired = move || {
            c.fetch_add(1, Ordering::SeqCst);
        };
        bridge.listen("tick", fired, true).unwrap();
        bridge.advance(1).unwrap();
        let code = "tick.broadcast(); 10::samp => now; tick.broadcast();";
        bridge.compile(code, "", 1, false).unwrap();
        bridge.advance(20).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_before_declaration_fires_later() {
        let mut bridge = bridge();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let fired = move || {
            c.fetch_add(1, Ordering::SeqCst);
        };
        bridge.listen("late", fired, true).unwrap();
        bridge.signal("late").unwrap();
        bridge.advance(8).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bridge.compile("global Event late;", "", 1, false).unwrap();
        bridge.signal("late").unwrap();
        bridge.advance(8).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_does_not_consume_signal_meant_for_shred() {
        let mut bridge = bridge();
        let out = capture_stdout(&mut bridge);
        bridge.compile("global Event e;", "", 1, false).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let fired = move || {
            c.fetch_add(1, Ordering::SeqCst);
        };
        bridge.listen("e", fired, true).unwrap();
        bridge.advance(1).unwrap();

        bridge.compile("e => now; <<< 1 >>>;", "", 1, false).unwrap();
        bridge.advance(1).unwrap();
        bridge.signal("e").unwrap();
        bridge.advance(4).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*out.lock().unwrap(), vec!["1 :(int)".to_string()]);

        bridge.signal("e").unwrap();
        bridge.advance(4).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_huge_wait_sleeps_without_overflow() {
        let mut bridge = bridge();
        bridge.advance(1).unwrap();
        let code = "global int t; 100000000000000000000::second => now; 1 => t;";
        assert!(bridge.compile(code, "", 1, false).unwrap().success);
        bridge.advance(4).unwrap();

        let ids = bridge.list_ids().unwrap();
        assert_eq!(ids.len(), 1);
        let id = *ids.iter().next().unwrap();
        let info = bridge.info(id).unwrap().unwrap();
        assert!(info.is_running);
        assert!(!info.is_done);
        assert!(matches!(
            bridge.get_int("t", 4),
            Err(BridgeError::CallbackTimeout { .. })
        ));
    }

    #[test]
    fn test_compile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blip.ck");
        let source = "// a blip\nSinOsc s => dac;\n0.5 => s.gain;\n5::ms => now;\n";
        std::fs::write(&path, source).unwrap();

        let mut bridge = bridge();
        let result = bridge.compile_file(&path, "", 1, false).unwrap();
        assert!(result.success);
        let info = bridge.info(result.ids[0]).unwrap().unwrap();
        assert_eq!(info.name, path.to_string_lossy());

        let missing = bridge.compile_file(dir.path().join("nope.ck"), "", 1, false).unwrap();
        assert!(!missing.success);
    }

    #[test]
    fn test_noise_is_deterministic_per_seed() {
        let render = |seed: u64| {
            let mut bridge = Bridge::new(SimEngine::new().with_seed(seed));
            bridge.init().unwrap();
            bridge.compile("Noise n => dac; 1::second => now;", "", 1, false).unwrap();
            let samples = bridge.run(32, RunOptions::new()).unwrap().into_vec();
            samples
        };
        assert_eq!(render(7), render(7));
        assert_ne!(render(7), render(8));
    }
}
