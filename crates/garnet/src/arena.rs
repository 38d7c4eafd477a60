//! GC arena checkpoints
//!
//! The guest roots every object a native caller creates in its arena until
//! the arena is restored. Host code brackets work that creates transient
//! values with a save and a restore, or holds an [`ArenaGuard`] for the
//! duration. Values that must outlive the checkpoint have to be stored
//! somewhere the guest marks (a global, an instance variable, a container
//! reachable from one) or re-protected with [`Value::gc_protect`](crate::Value::gc_protect).

use crate::handle::Handle;
use log::trace;

/// Opaque arena checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex(usize);

impl ArenaIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub(crate) fn get(self) -> usize {
        self.0
    }
}

/// Restores the arena to the checkpoint taken at construction when dropped,
/// on every exit path.
#[must_use = "the arena is restored when the guard drops"]
pub struct ArenaGuard<'h> {
    handle: &'h Handle,
    index: ArenaIndex,
}

impl<'h> ArenaGuard<'h> {
    pub fn new(handle: &'h Handle) -> Self {
        let index = handle.arena_save();
        trace!("arena save {}", index.0);
        Self { handle, index }
    }

    /// The checkpoint this guard restores to.
    pub fn index(&self) -> ArenaIndex {
        self.index
    }
}

impl Drop for ArenaGuard<'_> {
    fn drop(&mut self) {
        self.handle.arena_restore(self.index);
    }
}

#[cfg(test)]
mod tests {
    use crate::Garnet;

    #[test]
    fn test_restore_is_idempotent() {
        let grb = Garnet::open().expect("open");
        let idx = grb.arena_save();
        grb.arena_restore(idx);
        grb.arena_restore(idx);
        assert_eq!(grb.arena_save(), idx);
    }

    #[test]
    fn test_guard_releases_values() {
        let grb = Garnet::open().expect("open");
        let before = grb.arena_save();
        let value = {
            let _guard = grb.arena();
            let value = grb.to_guest("transient");
            assert!(grb.arena_save() > before);
            value.raw()
        };
        assert_eq!(grb.arena_save(), before);
        grb.full_gc();
        assert!(grb.mrb().is_dead(value));
    }
}
