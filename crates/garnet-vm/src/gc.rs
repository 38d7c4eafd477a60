//! Garbage-collected object heap.
//!
//! A slab of generation-stamped slots with a mark-sweep collector. The
//! *arena* is the stack of recently allocated objects that the collector
//! treats as roots; callers bound its growth with save/restore checkpoints.
//!
//! Full collections mark and sweep atomically. Incremental collections mark
//! atomically and then sweep lazily, a bounded number of slots per step.
//! Lazy sweeping needs no write barrier: once marking is complete an
//! unmarked object is unreachable and stays that way. Objects allocated while
//! a sweep is in flight are born marked when the sweep has not reached their
//! slot yet.

use crate::object::RObject;
use crate::value::{MrbValue, ObjRef};
use log::trace;

#[derive(Debug)]
struct Slot {
    gen: u32,
    marked: bool,
    obj: Option<RObject>,
}

/// Collector statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: u64,
    pub freed: u64,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    arena: Vec<ObjRef>,
    disabled: bool,
    threshold: usize,
    since_gc: usize,
    step_slots: usize,
    /// Next slot the lazy sweeper will visit.
    sweep_cursor: Option<usize>,
    stats: GcStats,
}

impl Heap {
    pub fn new(threshold: usize, step_slots: usize, arena_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            arena: Vec::with_capacity(arena_capacity),
            disabled: false,
            threshold: threshold.max(1),
            since_gc: 0,
            step_slots: step_slots.max(1),
            sweep_cursor: None,
            stats: GcStats::default(),
        }
    }

    /// Allocate an object and root it in the arena.
    pub fn alloc(&mut self, obj: RObject) -> ObjRef {
        self.since_gc += 1;
        self.live += 1;
        let index = match self.free.pop() {
            Some(i) => i as usize,
            None => {
                self.slots.push(Slot {
                    gen: 0,
                    marked: false,
                    obj: None,
                });
                self.slots.len() - 1
            }
        };
        let born_marked = self.sweep_cursor.is_some_and(|c| index >= c);
        let slot = &mut self.slots[index];
        slot.obj = Some(obj);
        slot.marked = born_marked;
        let r = ObjRef {
            index: index as u32,
            gen: slot.gen,
        };
        self.arena.push(r);
        r
    }

    pub fn get(&self, r: ObjRef) -> Option<&RObject> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.gen == r.gen)
            .and_then(|s| s.obj.as_ref())
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut RObject> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.gen == r.gen)
            .and_then(|s| s.obj.as_mut())
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    // ========================================================================
    // Arena
    // ========================================================================

    pub fn arena_save(&self) -> usize {
        self.arena.len()
    }

    /// Truncate the arena back to a checkpoint. Restoring to an index at or
    /// above the current top is a no-op.
    pub fn arena_restore(&mut self, idx: usize) {
        if idx < self.arena.len() {
            self.arena.truncate(idx);
        }
    }

    pub fn protect(&mut self, v: MrbValue) {
        if let MrbValue::Object(r) = v {
            self.arena.push(r);
        }
    }

    // ========================================================================
    // Collection control
    // ========================================================================

    pub fn enable(&mut self) -> bool {
        std::mem::replace(&mut self.disabled, false)
    }

    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.disabled, true)
    }

    /// Whether enough allocation happened since the last cycle to collect.
    pub fn wants_collection(&self) -> bool {
        !self.disabled && self.since_gc >= self.threshold
    }

    /// Mark from `roots` plus the arena, then sweep every slot.
    pub fn full_collect(&mut self, roots: &[MrbValue]) {
        if self.disabled {
            return;
        }
        if self.sweep_cursor.is_some() {
            self.sweep_until(self.slots.len());
        }
        self.mark(roots);
        self.sweep_cursor = Some(0);
        self.sweep_until(self.slots.len());
        self.finish_cycle();
    }

    /// One incremental step: start a cycle with an atomic mark if none is in
    /// flight, then sweep a bounded number of slots.
    pub fn incremental_step(&mut self, roots: &[MrbValue]) {
        if self.disabled {
            return;
        }
        let start = match self.sweep_cursor {
            Some(c) => c,
            None => {
                self.mark(roots);
                self.sweep_cursor = Some(0);
                0
            }
        };
        let end = (start + self.step_slots).min(self.slots.len());
        self.sweep_until(end);
        if end >= self.slots.len() {
            self.finish_cycle();
        }
    }

    /// Whether a lazy sweep is pending.
    #[cfg(test)]
    pub fn in_cycle(&self) -> bool {
        self.sweep_cursor.is_some()
    }

    fn finish_cycle(&mut self) {
        self.sweep_cursor = None;
        self.since_gc = 0;
        self.stats.collections += 1;
        trace!(
            "gc cycle {} done: live={} freed_total={}",
            self.stats.collections,
            self.live,
            self.stats.freed
        );
    }

    fn mark(&mut self, roots: &[MrbValue]) {
        let mut stack: Vec<ObjRef> = roots.iter().filter_map(|v| v.as_obj()).collect();
        stack.extend(self.arena.iter().copied());
        while let Some(r) = stack.pop() {
            let Some(slot) = self.slots.get_mut(r.index as usize) else {
                continue;
            };
            if slot.gen != r.gen || slot.marked {
                continue;
            }
            if let Some(obj) = &slot.obj {
                slot.marked = true;
                obj.trace(&mut stack);
            }
        }
    }

    fn sweep_until(&mut self, end: usize) {
        let Some(start) = self.sweep_cursor else {
            return;
        };
        for i in start..end {
            let slot = &mut self.slots[i];
            if slot.obj.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.obj = None;
                slot.gen = slot.gen.wrapping_add(1);
                self.free.push(i as u32);
                self.live -= 1;
                self.stats.freed += 1;
            }
        }
        self.sweep_cursor = Some(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjKind;

    fn dummy_class(heap: &mut Heap) -> ObjRef {
        let placeholder = ObjRef { index: 0, gen: 0 };
        heap.alloc(RObject::new(placeholder, ObjKind::Object))
    }

    fn string(heap: &mut Heap, class: ObjRef, s: &str) -> ObjRef {
        heap.alloc(RObject::new(class, ObjKind::String(s.to_string())))
    }

    #[test]
    fn test_arena_restore_releases_objects() {
        let mut heap = Heap::new(1000, 16, 8);
        let class = dummy_class(&mut heap);
        let base = heap.live_count();
        let ai = heap.arena_save();
        for _ in 0..10 {
            string(&mut heap, class, "x");
        }
        assert_eq!(heap.live_count(), base + 10);
        heap.arena_restore(ai);
        heap.full_collect(&[]);
        assert_eq!(heap.live_count(), base);
    }

    #[test]
    fn test_stale_reference_is_dead() {
        let mut heap = Heap::new(1000, 16, 8);
        let class = dummy_class(&mut heap);
        let ai = heap.arena_save();
        let s = string(&mut heap, class, "gone");
        heap.arena_restore(ai);
        heap.full_collect(&[]);
        assert!(!heap.is_live(s));
        let reused = string(&mut heap, class, "new");
        assert_eq!(reused.index, s.index);
        assert!(heap.get(s).is_none());
        assert!(heap.is_live(reused));
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut heap = Heap::new(1000, 16, 8);
        let class = dummy_class(&mut heap);
        let ai = heap.arena_save();
        string(&mut heap, class, "a");
        heap.arena_restore(ai);
        heap.arena_restore(ai);
        heap.arena_restore(ai + 5);
        assert_eq!(heap.arena_save(), ai);
    }

    #[test]
    fn test_disabled_heap_does_not_collect() {
        let mut heap = Heap::new(1000, 16, 8);
        let class = dummy_class(&mut heap);
        let ai = heap.arena_save();
        string(&mut heap, class, "a");
        heap.arena_restore(ai);
        heap.disable();
        let before = heap.live_count();
        heap.full_collect(&[]);
        assert_eq!(heap.live_count(), before);
        heap.enable();
        heap.full_collect(&[]);
        assert_eq!(heap.live_count(), before - 1);
    }

    #[test]
    fn test_incremental_sweep_finishes() {
        let mut heap = Heap::new(1000, 2, 8);
        let class = dummy_class(&mut heap);
        let ai = heap.arena_save();
        for _ in 0..9 {
            string(&mut heap, class, "x");
        }
        heap.arena_restore(ai);
        let roots = [MrbValue::Object(class)];
        heap.incremental_step(&roots);
        assert!(heap.in_cycle());
        let kept = string(&mut heap, class, "allocated mid-cycle");
        while heap.in_cycle() {
            heap.incremental_step(&roots);
        }
        assert!(heap.is_live(kept));
        assert_eq!(heap.live_count(), 2);
    }
}
