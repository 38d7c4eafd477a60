//! Process-wide map from interpreter state pointers to their handles
//!
//! Native methods are entered with nothing but the raw `*mut MrbState`; the
//! trampolines use this registry to get back to the owning [`Handle`] and its
//! method table. Entries live exactly as long as the handle: they are added
//! when a [`Garnet`](crate::Garnet) is opened and removed before its state is
//! freed.

use crate::handle::Handle;
use dashmap::DashMap;
use garnet_vm::MrbState;
use std::ptr::NonNull;
use std::sync::LazyLock;

/// Pointer to a leaked handle box. The owning `Garnet` holds the same
/// pointer and frees it only after unregistering.
#[derive(Clone, Copy)]
struct HandlePtr(NonNull<Handle>);

// SAFETY: the registry only hands the pointer back to code running on the
// thread that drives the matching interpreter; it never dereferences it
// itself.
unsafe impl Send for HandlePtr {}
unsafe impl Sync for HandlePtr {}

static STATES: LazyLock<DashMap<usize, HandlePtr>> = LazyLock::new(DashMap::new);

fn key(state: *const MrbState) -> usize {
    state as usize
}

pub(crate) fn register(state: *const MrbState, handle: NonNull<Handle>) {
    STATES.insert(key(state), HandlePtr(handle));
}

pub(crate) fn unregister(state: *const MrbState) {
    STATES.remove(&key(state));
}

/// Resolve the handle that owns `state`.
///
/// # Panics
///
/// When `state` is not registered. That only happens if a native method runs
/// on an interpreter this crate does not own, or after its handle closed.
///
/// # Safety
///
/// The returned reference is valid until the handle is closed; callers must
/// not keep it past the native call they are serving.
pub(crate) unsafe fn lookup<'a>(state: *const MrbState) -> &'a Handle {
    let ptr = match STATES.get(&key(state)) {
        Some(entry) => *entry.value(),
        None => panic!("state not found, this must never happen: {:#x}", key(state)),
    };
    // SAFETY: registered handles stay alive until unregistered.
    unsafe { ptr.0.as_ref() }
}

/// Number of open handles in the process.
pub fn open_handles() -> usize {
    STATES.len()
}

#[cfg(test)]
mod tests {
    use crate::Garnet;

    #[test]
    fn test_lookup_finds_own_handle() {
        let grb = Garnet::open().expect("open");
        // SAFETY: the handle is alive for the whole test.
        let found = unsafe { super::lookup(grb.state_ptr()) };
        assert!(std::ptr::eq(found, &*grb));
    }

    #[test]
    fn test_close_unregisters() {
        let grb = Garnet::open().expect("open");
        let ptr = grb.state_ptr() as usize;
        let handle = std::ptr::NonNull::from(&*grb);
        assert!(super::STATES.get(&ptr).is_some_and(|e| e.0 == handle));
        drop(grb);
        // Another test may reuse the address, but never with this handle.
        assert!(super::STATES.get(&ptr).map_or(true, |e| e.0 != handle));
    }
}
