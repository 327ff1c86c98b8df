//! Scripted engine double for unit tests that need to force engine behavior.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::callbacks::CallbackId;
use crate::config::{Param, ParamValue};
use crate::engine::{
    CompileResult, ConsoleCallback, Engine, EngineMessenger, GlobalKind, GlobalValue, Resolution,
    ShredHandle, ShredId,
};

#[derive(Debug)]
pub(crate) enum Message {
    Set(String, GlobalValue),
    Get(String, GlobalKind, CallbackId),
    Signal(String),
    Broadcast(String),
    Listen(String, CallbackId, bool),
    Unlisten(String, CallbackId),
}

#[derive(Clone)]
pub(crate) struct ScriptedMessenger {
    tx: Sender<Message>,
}

impl EngineMessenger for ScriptedMessenger {
    fn set_global(&self, name: &str, value: GlobalValue) {
        let _ = self.tx.send(Message::Set(name.to_string(), value));
    }
    fn get_global(&self, name: &str, kind: GlobalKind, id: CallbackId) {
        let _ = self.tx.send(Message::Get(name.to_string(), kind, id));
    }
    fn signal_event(&self, name: &str) {
        let _ = self.tx.send(Message::Signal(name.to_string()));
    }
    fn broadcast_event(&self, name: &str) {
        let _ = self.tx.send(Message::Broadcast(name.to_string()));
    }
    fn listen_for_event(&self, name: &str, id: CallbackId, persistent: bool) {
        let _ = self.tx.send(Message::Listen(name.to_string(), id, persistent));
    }
    fn stop_listening_for_event(&self, name: &str, id: CallbackId) {
        let _ = self.tx.send(Message::Unlisten(name.to_string(), id));
    }
}

/// Engine whose compile outcomes and output are set by the test.
///
/// Every rendered sample is `fill + input`, so tests can tell which input
/// buffer reached the engine.
pub(crate) struct ScriptedEngine {
    pub params: BTreeMap<Param, ParamValue>,
    pub rejected: BTreeSet<Param>,
    pub fail_init: bool,
    initialized: bool,
    pub fill: f32,
    pub runs: usize,
    now: u64,
    next_id: u64,
    pub shreds: BTreeMap<ShredId, ShredHandle>,
    /// Caps how many shreds one compile call spawns, while still reporting success.
    pub spawn_limit: Option<usize>,
    pub outcomes: VecDeque<CompileResult>,
    pub removed: Vec<ShredId>,
    pub globals: HashMap<String, GlobalValue>,
    listeners: Vec<(String, CallbackId, bool)>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    resolutions: Option<Sender<Resolution>>,
    stdout: Option<ConsoleCallback>,
    stderr: Option<ConsoleCallback>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let mut params = BTreeMap::new();
        params.insert(Param::SampleRate, ParamValue::Int(44_100));
        params.insert(Param::InputChannels, ParamValue::Int(2));
        params.insert(Param::OutputChannels, ParamValue::Int(2));
        params.insert(Param::Version, ParamValue::from("scripted"));
        Self {
            params,
            rejected: BTreeSet::new(),
            fail_init: false,
            initialized: false,
            fill: 0.25,
            runs: 0,
            now: 0,
            next_id: 1,
            shreds: BTreeMap::new(),
            spawn_limit: None,
            outcomes: VecDeque::new(),
            removed: Vec::new(),
            globals: HashMap::new(),
            listeners: Vec::new(),
            tx,
            rx,
            resolutions: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn print(&mut self, line: &str) {
        if let Some(out) = self.stdout.as_mut() {
            out(line);
        }
    }

    pub fn print_err(&mut self, line: &str) {
        if let Some(err) = self.stderr.as_mut() {
            err(line);
        }
    }

    fn resolve(&self, resolution: Resolution) {
        if let Some(tx) = &self.resolutions {
            let _ = tx.send(resolution);
        }
    }

    fn fire(&mut self, name: &str, all: bool) {
        let mut fired = Vec::new();
        for (event, id, _) in &self.listeners {
            if event == name {
                fired.push(*id);
                if !all {
                    break;
                }
            }
        }
        for id in &fired {
            self.resolve(Resolution::Event { id: *id });
        }
        self.listeners
            .retain(|(event, id, persistent)| *persistent || event != name || !fired.contains(id));
    }

    fn spawn(&mut self, name: &str, args: &str, count: usize) -> CompileResult {
        if let Some(outcome) = self.outcomes.pop_front() {
            return outcome;
        }
        let spawned = self.spawn_limit.map_or(count, |limit| count.min(limit));
        let mut ids = Vec::with_capacity(spawned);
        for _ in 0..spawned {
            let id = ShredId(self.next_id);
            self.next_id += 1;
            self.shreds.insert(
                id,
                ShredHandle {
                    id,
                    name: name.to_string(),
                    args: args.split(':').filter(|a| !a.is_empty()).map(str::to_string).collect(),
                    spawn_time: self.now,
                    is_running: true,
                    is_done: false,
                },
            );
            ids.push(id);
        }
        CompileResult::spawned(ids)
    }
}

impl Engine for ScriptedEngine {
    type Messenger = ScriptedMessenger;

    fn set_param(&mut self, param: Param, value: ParamValue) -> bool {
        if self.rejected.contains(&param) {
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
        if self.fail_init {
            return false;
        }
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
        _immediate: bool,
    ) -> CompileResult {
        if code.contains("syntax error") {
            return CompileResult::failed();
        }
        self.spawn("inline", args, count)
    }

    fn compile_file(
        &mut self,
        path: &Path,
        args: &str,
        count: usize,
        _immediate: bool,
    ) -> CompileResult {
        if !path.exists() {
            return CompileResult::failed();
        }
        self.spawn(&path.to_string_lossy(), args, count)
    }

    fn run(&mut self, input: &[f32], output: &mut [f32], frames: usize) {
        for message in self.rx.try_iter().collect::<Vec<_>>() {
            match message {
                Message::Set(name, value) => {
                    self.globals.insert(name, value);
                }
                Message::Get(name, kind, id) => {
                    if let Some(value) = self.globals.get(&name).filter(|v| v.kind() == kind) {
                        self.resolve(Resolution::Global {
                            id,
                            value: value.clone(),
                        });
                    }
                }
                Message::Signal(name) => self.fire(&name, false),
                Message::Broadcast(name) => self.fire(&name, true),
                Message::Listen(name, id, persistent) => {
                    self.listeners.push((name, id, persistent))
                }
                Message::Unlisten(_, id) => self.listeners.retain(|(_, l, _)| *l != id),
            }
        }
        let in_channels = input.len().checked_div(frames).unwrap_or(0);
        let out_channels = output.len().checked_div(frames).unwrap_or(0);
        for frame in 0..frames {
            let sample_in = if in_channels > 0 { input[frame * in_channels] } else { 0.0 };
            for ch in 0..out_channels {
                output[frame * out_channels + ch] = self.fill + sample_in;
            }
        }
        self.now += frames as u64;
        self.runs += 1;
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn remove_shred(&mut self, id: ShredId) {
        if self.shreds.remove(&id).is_some() {
            self.removed.push(id);
        }
    }

    fn replace_shred(&mut self, id: ShredId, code: &str, args: &str) -> ShredId {
        if code.contains("syntax error") || !self.shreds.contains_key(&id) {
            return ShredId::NONE;
        }
        self.shreds.remove(&id);
        match self.spawn("inline", args, 1).first() {
            Some(new_id) => new_id,
            None => ShredId::NONE,
        }
    }

    fn clear_vm(&mut self) {
        self.shreds.clear();
    }

    fn reset_shred_id(&mut self) {
        self.next_id = self.shreds.keys().next_back().map_or(1, |id| id.0 + 1);
    }

    fn all_shred_ids(&self) -> BTreeSet<ShredId> {
        self.shreds.keys().copied().collect()
    }

    fn shred_info(&self, id: ShredId) -> Option<ShredHandle> {
        self.shreds.get(&id).cloned()
    }

    fn messenger(&self) -> ScriptedMessenger {
        ScriptedMessenger {
            tx: self.tx.clone(),
        }
    }

    fn attach_resolutions(&mut self, tx: Sender<Resolution>) {
        self.resolutions = Some(tx);
    }

    fn set_stdout_callback(&mut self, callback: ConsoleCallback) {
        self.stdout = Some(callback);
    }

    fn set_stderr_callback(&mut self, callback: ConsoleCallback) {
        self.stderr = Some(callback);
    }
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
