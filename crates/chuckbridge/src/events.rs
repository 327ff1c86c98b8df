//! Named events: signal, broadcast and control-thread listeners.

use crate::bridge::Bridge;
use crate::callbacks::CallbackId;
use crate::engine::Engine;
use crate::error::Result;

impl<E: Engine> Bridge<E> {
    /// Wake at most one shred waiting on `name`.
    pub fn signal(&self, name: &str) -> Result<()> {
        self.control.signal(name)
    }

    /// Wake every shred waiting on `name`.
    pub fn broadcast(&self, name: &str) -> Result<()> {
        self.control.broadcast(name)
    }

    /// Call `callback` each time `name` fires during a later render pass.
    ///
    /// A listener for an event nothing has declared yet stays registered.
    pub fn listen<F>(&self, name: &str, callback: F, persistent: bool) -> Result<CallbackId>
    where
        F: FnMut() + Send + 'static,
    {
        self.control.listen(name, callback, persistent)
    }

    /// Cancel a listener. Unknown ids are ignored.
    pub fn unlisten(&self, name: &str, id: CallbackId) -> Result<()> {
        self.control.unlisten(name, id)
    }
}
