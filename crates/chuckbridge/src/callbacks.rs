//! Registration table for pending callbacks.
//!
//! The bridge owns every caller closure; the engine only ever sees the opaque
//! [`CallbackId`] it was registered under. Ids come from a generational arena,
//! so a slot freed by one registration and reused by the next never matches a
//! stale id still in flight inside the engine.
//!
//! Closures are never invoked while the table is borrowed. [`CallbackTable::claim`]
//! hands the closure out, and persistent listeners are put back with
//! [`CallbackTable::restore`], so a callback may itself register or cancel
//! callbacks.

use std::fmt;

use crate::engine::{GlobalValue, Resolution};

/// One-shot receiver of a global value.
pub type GlobalCallback = Box<dyn FnOnce(GlobalValue) + Send>;

/// Receiver of event firings.
pub type EventCallback = Box<dyn FnMut() + Send>;

/// Opaque handle of a registered callback.
///
/// Packs the arena index (low 32 bits) and the slot generation (high 32 bits).
/// Generations start at 1, so a valid id is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw value, for handing to engines that speak integers.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its raw value.
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// What a pending callback is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    GetGlobal,
    EventListener,
}

/// Bookkeeping view of a registered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallback {
    pub id: CallbackId,
    pub kind: CallbackKind,
    /// Global or event name the callback is registered for.
    pub name: String,
    /// Only meaningful for event listeners.
    pub persistent: bool,
    /// True while a persistent listener is being invoked.
    pub in_flight: bool,
}

enum Callback {
    Global(Option<GlobalCallback>),
    Event {
        callback: Option<EventCallback>,
        persistent: bool,
    },
}

struct Entry {
    name: String,
    callback: Callback,
}

enum Slot {
    Occupied { generation: u32, entry: Entry },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A closure handed out for invocation.
pub enum Claimed {
    Global {
        callback: GlobalCallback,
        value: GlobalValue,
    },
    Event {
        id: CallbackId,
        callback: EventCallback,
        persistent: bool,
    },
}

/// Arena of pending callbacks keyed by [`CallbackId`].
#[derive(Default)]
pub struct CallbackTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot global read.
    pub fn insert_global(&mut self, name: &str, callback: GlobalCallback) -> CallbackId {
        self.insert(Entry {
            name: name.to_string(),
            callback: Callback::Global(Some(callback)),
        })
    }

    /// Register an event listener.
    pub fn insert_listener(
        &mut self,
        name: &str,
        callback: EventCallback,
        persistent: bool,
    ) -> CallbackId {
        self.insert(Entry {
            name: name.to_string(),
            callback: Callback::Event {
                callback: Some(callback),
                persistent,
            },
        })
    }

    fn insert(&mut self, entry: Entry) -> CallbackId {
        self.live += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant {
                generation,
                next_free,
            } = *slot
            else {
                unreachable!("free list points at an occupied slot");
            };
            let generation = generation.wrapping_add(1).max(1);
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, entry };
            return CallbackId::new(index, generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 1,
            entry,
        });
        CallbackId::new(index, 1)
    }

    fn entry(&self, id: CallbackId) -> Option<&Entry> {
        match self.slots.get(id.index())? {
            Slot::Occupied { generation, entry } if *generation == id.generation() => Some(entry),
            _ => None,
        }
    }

    fn entry_mut(&mut self, id: CallbackId) -> Option<&mut Entry> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied { generation, entry } if *generation == id.generation() => Some(entry),
            _ => None,
        }
    }

    /// Unregister a callback. Returns `false` for unknown or already removed ids.
    pub fn remove(&mut self, id: CallbackId) -> bool {
        if self.entry(id).is_none() {
            return false;
        }
        let index = id.index();
        self.slots[index] = Slot::Vacant {
            generation: id.generation(),
            next_free: self.free_head,
        };
        self.free_head = Some(index as u32);
        self.live -= 1;
        true
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn pending(&self, id: CallbackId) -> Option<PendingCallback> {
        let entry = self.entry(id)?;
        let (kind, persistent, in_flight) = match &entry.callback {
            Callback::Global(f) => (CallbackKind::GetGlobal, false, f.is_none()),
            Callback::Event {
                callback,
                persistent,
            } => (CallbackKind::EventListener, *persistent, callback.is_none()),
        };
        Some(PendingCallback {
            id,
            kind,
            name: entry.name.clone(),
            persistent,
            in_flight,
        })
    }

    /// Take the closure a resolution refers to.
    ///
    /// One-shot registrations (global reads, non-persistent listeners) leave
    /// the table here. Persistent listeners stay registered with their closure
    /// checked out until [`restore`](Self::restore). Resolutions for unknown
    /// ids, or of the wrong kind, yield `None`.
    pub fn claim(&mut self, resolution: Resolution) -> Option<Claimed> {
        let id = resolution.id();
        let entry = self.entry_mut(id)?;
        let claimed = match (&mut entry.callback, resolution) {
            (Callback::Global(callback), Resolution::Global { value, .. }) => Claimed::Global {
                callback: callback.take()?,
                value,
            },
            (
                Callback::Event {
                    callback,
                    persistent,
                },
                Resolution::Event { .. },
            ) => Claimed::Event {
                id,
                callback: callback.take()?,
                persistent: *persistent,
            },
            _ => return None,
        };

        let one_shot = match &claimed {
            Claimed::Global { .. } => true,
            Claimed::Event { persistent, .. } => !persistent,
        };
        if one_shot {
            self.remove(id);
        }
        Some(claimed)
    }

    /// Return a persistent listener's closure after invocation.
    ///
    /// If the listener was cancelled while it ran, the closure is dropped.
    pub fn restore(&mut self, id: CallbackId, closure: EventCallback) {
        if let Some(Entry {
            callback: Callback::Event { callback, .. },
            ..
        }) = self.entry_mut(id)
        {
            *callback = Some(closure);
        }
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}
