//! Sample-accurate scheduler for the simulated engine.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::f64::consts::TAU;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::program::{Declared, Literal, Operand, Program, Statement, TimeUnit, UgenKind, UgenParam};
use crate::callbacks::CallbackId;
use crate::engine::{ConsoleCallback, GlobalKind, GlobalValue, Resolution, ShredHandle, ShredId};

/// Control messages queued by the messenger and consumed per frame.
#[derive(Debug)]
pub(crate) enum Control {
    SetGlobal(String, GlobalValue),
    GetGlobal(String, GlobalKind, CallbackId),
    Signal(String),
    Broadcast(String),
    Listen(String, CallbackId, bool),
    StopListening(String, CallbackId),
}

/// Lifecycle changes applied at the next frame boundary.
#[derive(Debug)]
enum VmOp {
    Remove(ShredId),
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
enum ShredState {
    Ready,
    Sleeping { until: u64 },
    Waiting { event: String },
    Done,
}

#[derive(Debug)]
struct Ugen {
    name: String,
    kind: UgenKind,
    freq: f64,
    gain: f64,
    phase: f64,
}

impl Ugen {
    fn new(kind: UgenKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            freq: 220.0,
            gain: 1.0,
            phase: 0.0,
        }
    }
}

#[derive(Debug)]
struct Shred {
    name: String,
    args: Vec<String>,
    spawn_time: u64,
    program: Arc<Program>,
    pc: usize,
    state: ShredState,
    ugens: Vec<Ugen>,
    passthrough: bool,
}

/// A control-thread listener registered on an event.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Listener {
    id: CallbackId,
    persistent: bool,
}

#[derive(Default)]
pub(crate) struct Console {
    pub stdout: Option<ConsoleCallback>,
    pub stderr: Option<ConsoleCallback>,
}

impl Console {
    pub fn out(&mut self, line: &str) {
        if let Some(callback) = self.stdout.as_mut() {
            callback(line);
        }
    }

    pub fn err(&mut self, line: &str) {
        if let Some(callback) = self.stderr.as_mut() {
            callback(line);
        }
    }
}

pub(crate) struct Vm {
    pub sample_rate: f64,
    pub input_channels: usize,
    pub output_channels: usize,
    now: u64,
    next_id: u64,
    shred_limit: Option<usize>,
    shreds: BTreeMap<ShredId, Shred>,
    kinds: HashMap<String, Declared>,
    values: HashMap<String, GlobalValue>,
    queues: HashMap<String, VecDeque<ShredId>>,
    listeners: HashMap<String, Vec<Listener>>,
    ops: VecDeque<VmOp>,
    control: Receiver<Control>,
    resolutions: Option<Sender<Resolution>>,
    rng: StdRng,
    pub console: Console,
}

impl Vm {
    pub fn new(control: Receiver<Control>, seed: u64) -> Self {
        Self {
            sample_rate: 44_100.0,
            input_channels: 2,
            output_channels: 2,
            now: 0,
            next_id: 1,
            shred_limit: None,
            shreds: BTreeMap::new(),
            kinds: HashMap::new(),
            values: HashMap::new(),
            queues: HashMap::new(),
            listeners: HashMap::new(),
            ops: VecDeque::new(),
            control,
            resolutions: None,
            rng: StdRng::seed_from_u64(seed),
            console: Console::default(),
        }
    }

    pub fn set_shred_limit(&mut self, limit: Option<usize>) {
        self.shred_limit = limit;
    }

    pub fn shred_limit(&self) -> Option<usize> {
        self.shred_limit
    }

    pub fn attach_resolutions(&mut self, tx: Sender<Resolution>) {
        self.resolutions = Some(tx);
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Kind of an already declared global.
    pub fn declared(&self, name: &str) -> Option<Declared> {
        self.kinds.get(name).copied()
    }

    // ------------------------------------------------------------------
    // Shreds
    // ------------------------------------------------------------------

    /// Declare the program's globals and spawn up to `count` shreds from it.
    pub fn spawn(
        &mut self,
        program: Program,
        name: &str,
        args: &[String],
        count: usize,
        immediate: bool,
    ) -> Vec<ShredId> {
        for (global, declared) in &program.declarations {
            self.declare(global, *declared);
        }
        let room = self
            .shred_limit
            .map_or(count, |limit| limit.saturating_sub(self.shreds.len()).min(count));
        let program = Arc::new(program);
        let ids: Vec<ShredId> = (0..room)
            .map(|_| self.add_shred(program.clone(), name, args))
            .collect();
        if immediate {
            for id in &ids {
                self.execute(*id);
            }
        }
        ids
    }

    fn add_shred(&mut self, program: Arc<Program>, name: &str, args: &[String]) -> ShredId {
        let id = ShredId(self.next_id);
        self.next_id += 1;
        self.shreds.insert(
            id,
            Shred {
                name: name.to_string(),
                args: args.to_vec(),
                spawn_time: self.now,
                program,
                pc: 0,
                state: ShredState::Ready,
                ugens: Vec::new(),
                passthrough: false,
            },
        );
        id
    }

    fn declare(&mut self, name: &str, declared: Declared) {
        self.kinds.insert(name.to_string(), declared);
        if let Declared::Scalar(kind) = declared {
            self.values.entry(name.to_string()).or_insert_with(|| match kind {
                GlobalKind::Int => GlobalValue::Int(0),
                GlobalKind::Float => GlobalValue::Float(0.0),
                GlobalKind::Str => GlobalValue::Str(String::new()),
            });
        }
    }

    /// Swap a live shred for a new one running `program`, effective now.
    pub fn replace(&mut self, id: ShredId, program: Program, args: &[String]) -> ShredId {
        let Some(old) = self.shreds.remove(&id) else {
            return ShredId::NONE;
        };
        for (global, declared) in &program.declarations {
            self.declare(global, *declared);
        }
        let new_id = self.add_shred(Arc::new(program), &old.name, args);
        self.execute(new_id);
        new_id
    }

    pub fn queue_remove(&mut self, id: ShredId) {
        self.ops.push_back(VmOp::Remove(id));
    }

    pub fn queue_clear(&mut self) {
        self.ops.push_back(VmOp::Clear);
    }

    pub fn reset_id(&mut self) {
        self.next_id = self.shreds.keys().next_back().map_or(1, |id| id.0 + 1);
    }

    pub fn ids(&self) -> BTreeSet<ShredId> {
        self.shreds.keys().copied().collect()
    }

    pub fn info(&self, id: ShredId) -> Option<ShredHandle> {
        self.shreds.get(&id).map(|shred| ShredHandle {
            id,
            name: shred.name.clone(),
            args: shred.args.clone(),
            spawn_time: shred.spawn_time,
            is_running: matches!(shred.state, ShredState::Ready | ShredState::Sleeping { .. }),
            is_done: shred.state == ShredState::Done,
        })
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    pub fn run(&mut self, input: &[f32], output: &mut [f32], frames: usize) {
        let (ins, outs) = (self.input_channels, self.output_channels);
        for frame in 0..frames {
            self.drain_control();
            self.apply_ops();
            self.step();
            let frame_in = input.get(frame * ins..(frame + 1) * ins).unwrap_or(&[]);
            if let Some(frame_out) = output.get_mut(frame * outs..(frame + 1) * outs) {
                self.render_frame(frame_in, frame_out);
            }
            self.shreds.retain(|_, shred| shred.state != ShredState::Done);
            self.now += 1;
        }
    }

    fn drain_control(&mut self) {
        while let Ok(message) = self.control.try_recv() {
            match message {
                Control::SetGlobal(name, value) => self.set_value(&name, value),
                Control::GetGlobal(name, kind, id) => {
                    if self.declared(&name) == Some(Declared::Scalar(kind)) {
                        if let Some(value) = self.values.get(&name).cloned() {
                            self.resolve(Resolution::Global { id, value });
                        }
                    }
                }
                Control::Signal(name) => self.signal(&name),
                Control::Broadcast(name) => self.broadcast(&name),
                Control::Listen(name, id, persistent) => self
                    .listeners
                    .entry(name)
                    .or_default()
                    .push(Listener { id, persistent }),
                Control::StopListening(name, id) => {
                    if let Some(listeners) = self.listeners.get_mut(&name) {
                        listeners.retain(|listener| listener.id != id);
                    }
                }
            }
        }
    }

    fn set_value(&mut self, name: &str, value: GlobalValue) {
        let value = match (self.declared(name), value) {
            (Some(Declared::Scalar(GlobalKind::Float)), GlobalValue::Int(n)) => {
                GlobalValue::Float(n as f64)
            }
            (Some(Declared::Scalar(kind)), value) if value.kind() == kind => value,
            _ => return,
        };
        self.values.insert(name.to_string(), value);
    }

    fn resolve(&self, resolution: Resolution) {
        if let Some(tx) = &self.resolutions {
            let _ = tx.send(resolution);
        }
    }

    fn apply_ops(&mut self) {
        while let Some(op) = self.ops.pop_front() {
            match op {
                VmOp::Remove(id) => {
                    self.shreds.remove(&id);
                }
                VmOp::Clear => self.shreds.clear(),
            }
        }
    }

    /// Run every shred that is due, in id order.
    fn step(&mut self) {
        let now = self.now;
        let due: Vec<ShredId> = self
            .shreds
            .iter_mut()
            .filter_map(|(id, shred)| {
                if let ShredState::Sleeping { until } = shred.state {
                    if until <= now {
                        shred.state = ShredState::Ready;
                    }
                }
                (shred.state == ShredState::Ready).then_some(*id)
            })
            .collect();
        for id in due {
            self.execute(id);
        }
    }

    /// Execute statements of one shred until it yields or finishes.
    fn execute(&mut self, id: ShredId) {
        loop {
            let Some(shred) = self.shreds.get_mut(&id) else {
                return;
            };
            if shred.state != ShredState::Ready {
                return;
            }
            let Some(statement) = shred.program.statements.get(shred.pc).cloned() else {
                shred.state = ShredState::Done;
                return;
            };
            shred.pc += 1;

            match statement {
                Statement::Declare { .. } => {}
                Statement::Connect { kind, name } => shred.ugens.push(Ugen::new(kind, &name)),
                Statement::Passthrough => shred.passthrough = true,
                Statement::SetParam { name, param, value } => {
                    if let Some(ugen) = shred.ugens.iter_mut().rev().find(|u| u.name == name) {
                        match param {
                            UgenParam::Freq => ugen.freq = value,
                            UgenParam::Gain => ugen.gain = value,
                        }
                    }
                }
                Statement::Assign { value, name } => {
                    let value = match value {
                        Literal::Int(n) => GlobalValue::Int(n),
                        Literal::Float(x) => GlobalValue::Float(x),
                        Literal::Str(s) => GlobalValue::Str(s),
                    };
                    self.set_value(&name, value);
                }
                Statement::CaptureTime { name } => {
                    let now = self.now;
                    self.set_value(&name, GlobalValue::Int(now as i64));
                }
                Statement::Wait { amount, unit } => {
                    let samples = to_samples(amount, unit, self.sample_rate);
                    if samples > 0 {
                        shred.state = ShredState::Sleeping {
                            until: self.now.saturating_add(samples),
                        };
                    }
                }
                Statement::WaitEvent { name } => {
                    shred.state = ShredState::Waiting { event: name.clone() };
                    self.queues.entry(name).or_default().push_back(id);
                }
                Statement::Signal { name } => self.signal(&name),
                Statement::Broadcast { name } => self.broadcast(&name),
                Statement::Print(operand) => {
                    let line = match operand {
                        Operand::Literal(value) => print_literal(&value),
                        Operand::Global(name) => match self.values.get(&name) {
                            Some(value) => print_value(value),
                            None => format!("{name} :(undefined)"),
                        },
                    };
                    self.console.out(&line);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Wake the first live shred waiting on `name` and fire its listeners.
    fn signal(&mut self, name: &str) {
        if self.declared(name) != Some(Declared::Event) {
            return;
        }
        while let Some(id) = self.queues.get_mut(name).and_then(VecDeque::pop_front) {
            if self.wake(name, id) {
                break;
            }
        }
        self.notify(name);
    }

    /// Wake every shred waiting on `name` and fire its listeners.
    fn broadcast(&mut self, name: &str) {
        if self.declared(name) != Some(Declared::Event) {
            return;
        }
        let waiting: Vec<ShredId> = self
            .queues
            .get_mut(name)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default();
        for id in waiting {
            self.wake(name, id);
        }
        self.notify(name);
    }

    /// Returns `false` for stale entries (removed or no longer waiting shreds).
    fn wake(&mut self, name: &str, id: ShredId) -> bool {
        match self.shreds.get_mut(&id) {
            Some(shred) => {
                let waiting =
                    matches!(&shred.state, ShredState::Waiting { event } if event == name);
                if waiting {
                    shred.state = ShredState::Ready;
                }
                waiting
            }
            None => false,
        }
    }

    /// Resolve every listener on `name`; single-shot listeners are dropped.
    fn notify(&mut self, name: &str) {
        let Some(listeners) = self.listeners.get_mut(name) else {
            return;
        };
        let fired: Vec<CallbackId> = listeners.iter().map(|listener| listener.id).collect();
        listeners.retain(|listener| listener.persistent);
        for id in fired {
            self.resolve(Resolution::Event { id });
        }
    }

    fn render_frame(&mut self, input: &[f32], output: &mut [f32]) {
        let mut mono = 0.0f64;
        let mut passthrough = false;
        for shred in self.shreds.values_mut() {
            if shred.state == ShredState::Done {
                continue;
            }
            passthrough |= shred.passthrough;
            for ugen in &mut shred.ugens {
                mono += match ugen.kind {
                    UgenKind::SinOsc => {
                        let sample = (ugen.phase * TAU).sin();
                        ugen.phase = (ugen.phase + ugen.freq / self.sample_rate).fract();
                        sample
                    }
                    UgenKind::Noise => self.rng.random_range(-1.0..1.0),
                } * ugen.gain;
            }
        }
        for (ch, sample) in output.iter_mut().enumerate() {
            let through = if passthrough {
                input.get(ch).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            *sample = mono as f32 + through;
        }
    }
}

fn to_samples(amount: f64, unit: TimeUnit, sample_rate: f64) -> u64 {
    let per_unit = match unit {
        TimeUnit::Samp => 1.0,
        TimeUnit::Ms => sample_rate / 1000.0,
        TimeUnit::Second => sample_rate,
    };
    (amount * per_unit).round().max(0.0) as u64
}

fn print_literal(value: &Literal) -> String {
    match value {
        Literal::Int(n) => format!("{n} :(int)"),
        Literal::Float(x) => format!("{x:.6} :(float)"),
        Literal::Str(s) => format!("\"{s}\" : (string)"),
    }
}

fn print_value(value: &GlobalValue) -> String {
    match value {
        GlobalValue::Int(n) => format!("{n} :(int)"),
        GlobalValue::Float(x) => format!("{x:.6} :(float)"),
        GlobalValue::Str(s) => format!("\"{s}\" : (string)"),
    }
}
