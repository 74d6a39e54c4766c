use std::{collections::BTreeMap, mem::ManuallyDrop};

use smallvec::{SmallVec, smallvec};

use crate::{
    object::Object,
    resource::{ResourceError, ResourceTracker},
    value::Value,
};

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Total number of live cells on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live cells by `HeapData` variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Resource tracker allocation count, if the tracker records it.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records it.
    pub tracker_memory_bytes: Option<usize>,
}

/// Difference between two heap snapshots.
///
/// Positive deltas mean growth, negative means shrinkage. An empty diff across
/// an activation is how tests assert that nothing leaked.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapDiff {
    /// Change in live cell count (`after - before`).
    pub live_objects_delta: isize,
    /// Per-type deltas. Only includes types present in either snapshot.
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
}

impl HeapStats {
    /// Computes the difference between `self` ("before") and `other` ("after").
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let mut objects_by_type_delta = BTreeMap::new();
        for (&type_name, &count) in &self.objects_by_type {
            let after_count = other.objects_by_type.get(type_name).copied().unwrap_or(0);
            objects_by_type_delta.insert(type_name, isize_delta(count, after_count));
        }
        for (&type_name, &count) in &other.objects_by_type {
            objects_by_type_delta
                .entry(type_name)
                .or_insert_with(|| isize_delta(0, count));
        }
        HeapDiff {
            live_objects_delta: isize_delta(self.live_objects, other.live_objects),
            objects_by_type_delta,
        }
    }
}

impl HeapDiff {
    /// Returns `true` when no live cell was added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects_delta == 0 && self.objects_by_type_delta.values().all(|&v| v == 0)
    }
}

impl std::fmt::Display for HeapDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "HeapDiff: no changes");
        }
        write!(f, "HeapDiff: {:+} live objects", self.live_objects_delta)?;
        for (&type_name, &delta) in &self.objects_by_type_delta {
            if delta != 0 {
                write!(f, "\n  {type_name}: {delta:+}")?;
            }
        }
        Ok(())
    }
}

#[expect(clippy::cast_possible_wrap, reason = "heap sizes are far below isize::MAX")]
fn isize_delta(before: usize, after: usize) -> isize {
    (after as isize).wrapping_sub(before as isize)
}

/// Unique identifier for cells stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(index: usize) -> Self {
        Self(index)
    }
}

/// HeapData captures every runtime value that lives in the arena.
///
/// Every value of the lowered language is a heap cell, including primitives: a
/// local holding `false` owns a reference to a `Bool` cell exactly like a local
/// holding an object owns a reference to an `Object` cell.
#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum HeapData {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Object(Object),
}

impl HeapData {
    /// Approximate size in bytes, reported to the resource tracker.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Null | Self::Bool(_) | Self::Int(_) => 0,
            Self::Str(s) => s.len(),
            Self::Object(obj) => obj.estimate_size(),
        };
        std::mem::size_of::<HeapValue>() + payload
    }

    /// Pushes the ids of every cell this value owns a reference to.
    fn collect_child_ids(&self, out: &mut SmallVec<[HeapId; 8]>) {
        if let Self::Object(obj) = self {
            obj.collect_child_ids(out);
        }
    }

    /// Returns the variant name used in heap statistics.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        self.into()
    }
}

/// One live heap cell.
#[derive(Debug)]
struct HeapValue {
    refcount: usize,
    data: HeapData,
}

/// Reference-counted arena that backs every runtime value of one context.
///
/// Uses a free list to reuse slots from freed values, keeping memory usage
/// constant for code that repeatedly allocates and releases values.
/// When a value is freed via `dec_ref`, its slot ID is added to the free list.
/// New allocations pop from the free list when available, otherwise append.
///
/// Generic over `T: ResourceTracker`; with `NoLimitTracker` all resource checks
/// compile away to no-ops.
#[derive(Debug)]
pub struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a new heap with the given resource tracker.
    pub fn new(capacity: usize, tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            tracker,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new cell with a reference count of 1.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        let new_entry = HeapValue { refcount: 1, data };

        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(new_entry));
            id
        };
        Ok(id)
    }

    /// Increments the reference count for an existing cell.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the cell has already been freed.
    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self
            .entries
            .get_mut(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_mut()
            .expect("Heap::inc_ref: object already freed");
        entry.refcount += 1;
    }

    /// Decrements the reference count and frees the cell (plus children) once it hits zero.
    ///
    /// Returns the number of cells freed by this call: 0 when `id` is still
    /// referenced elsewhere, otherwise 1 plus any children that reached zero.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the cell has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) -> usize {
        let mut pending: SmallVec<[HeapId; 8]> = smallvec![id];
        let mut freed = 0;
        while let Some(id) = pending.pop() {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
            if entry.refcount > 1 {
                entry.refcount -= 1;
                continue;
            }
            let value = slot.take().expect("Heap::dec_ref: object already freed");
            self.free_list.push(id);
            self.tracker.on_free(|| value.data.estimate_size());
            // children are released after their owner, so deep chains never recurse
            value.data.collect_child_ids(&mut pending);
            freed += 1;
        }
        freed
    }

    /// Returns an immutable reference to the data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the cell has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    /// Returns a mutable reference to the data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the cell has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// Returns the reference count for the cell at the given ID.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the cell has already been freed.
    #[must_use]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .expect("Heap::get_refcount: slot missing")
            .as_ref()
            .expect("Heap::get_refcount: object already freed")
            .refcount
    }

    /// Returns whether the cell at `id` is still allocated.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    /// Returns the number of live (non-freed) cells.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Takes a snapshot of the current heap state.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(entry.data.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }
}

/// This trait represents types that contain a `Heap`; it allows for more complex structures
/// to participate in the `HeapGuard` pattern.
///
/// Owners that observe releases (the context reports them to its tracer) override
/// [`release_cell`](Self::release_cell); every [`DropWithHeap`] impl goes through it.
pub trait ContainsHeap<T: ResourceTracker> {
    fn heap_mut(&mut self) -> &mut Heap<T>;

    /// Gives up one reference to `id`.
    #[inline]
    fn release_cell(&mut self, id: HeapId) {
        self.heap_mut().dec_ref(id);
    }
}

impl<T: ResourceTracker> ContainsHeap<T> for Heap<T> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Self {
        self
    }
}

/// Trait for types that require heap access for proper cleanup.
///
/// Rust's standard `Drop` trait cannot decrement heap reference counts because it has no
/// access to the `Heap`. This trait provides an explicit drop-with-heap method so that
/// owned values (and containers of them) release their counts when no longer needed.
///
/// **All types implementing this trait must be cleaned up on every code path.** A missed
/// call on any branch leaks reference counts. Prefer [`defer_drop!`] or [`HeapGuard`] to
/// guarantee cleanup automatically.
pub trait DropWithHeap<T: ResourceTracker> {
    /// Consume `self` and decrement reference counts for any heap cells contained within.
    fn drop_with_heap<H: ContainsHeap<T>>(self, heap: &mut H);
}

impl<T: ResourceTracker> DropWithHeap<T> for Value {
    #[inline]
    fn drop_with_heap<H: ContainsHeap<T>>(self, heap: &mut H) {
        heap.release_cell(self.into_id());
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap<H: ContainsHeap<T>>(self, heap: &mut H) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap<H: ContainsHeap<T>>(self, heap: &mut H) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

macro_rules! impl_drop_with_heap_noop {
    ($($ty:ty),*) => {
        $(
            impl<T: ResourceTracker> DropWithHeap<T> for $ty {
                #[inline]
                fn drop_with_heap<H: ContainsHeap<T>>(self, _heap: &mut H) {}
            }
        )*
    };
}

impl<T: ResourceTracker, A: DropWithHeap<T>, B: DropWithHeap<T>> DropWithHeap<T> for (A, B) {
    fn drop_with_heap<H: ContainsHeap<T>>(self, heap: &mut H) {
        self.0.drop_with_heap(heap);
        self.1.drop_with_heap(heap);
    }
}

impl_drop_with_heap_noop!((), bool, i64, String);

/// RAII guard that ensures a [`DropWithHeap`] value is cleaned up on every code path.
///
/// The guard's `Drop` impl calls [`DropWithHeap::drop_with_heap`] automatically, so
/// cleanup happens whether the scope exits normally, via `?`, early return, or any
/// other branch.
///
/// On the normal path the guarded value can be borrowed via [`as_parts`](Self::as_parts).
pub struct HeapGuard<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> {
    // manually dropped because it needs to be dropped by move.
    value: ManuallyDrop<V>,
    heap: &'a mut H,
    _tracker: std::marker::PhantomData<T>,
}

impl<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> HeapGuard<'a, T, H, V> {
    /// Creates a new `HeapGuard` for the given value and heap owner.
    #[inline]
    pub fn new(value: V, heap: &'a mut H) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            heap,
            _tracker: std::marker::PhantomData,
        }
    }

    /// Borrows the value (immutably) and heap owner (mutably) out of the guard.
    #[inline]
    pub fn as_parts(&mut self) -> (&V, &mut H) {
        (&self.value, self.heap)
    }
}

impl<T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> Drop for HeapGuard<'_, T, H, V> {
    fn drop(&mut self) {
        // SAFETY: value is never manually dropped until this point
        unsafe { ManuallyDrop::take(&mut self.value) }.drop_with_heap(&mut *self.heap);
    }
}

/// The preferred way to ensure a [`DropWithHeap`] value is cleaned up on every code path.
///
/// Creates a [`HeapGuard`] and immediately rebinds `$value` as `&V` and `$heap` as
/// `&mut H` via [`HeapGuard::as_parts`]. The original owned value is moved into the
/// guard, which calls [`DropWithHeap::drop_with_heap`] when scope exits.
///
/// # Limitation
///
/// The macro rebinds `$heap` as a new `let` binding, so it cannot be used when `$heap`
/// is `self`. In `&mut self` methods, first assign `let this = self;` and pass `this`.
#[macro_export]
macro_rules! defer_drop {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::heap::HeapGuard::new($value, $heap);
        #[allow(
            clippy::allow_attributes,
            reason = "the reborrowed parts may not both be used in every case, so allow unused vars to avoid warnings"
        )]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts();
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{class::ClassId, resource::NoLimitTracker};

    fn new_heap() -> Heap<NoLimitTracker> {
        Heap::new(8, NoLimitTracker)
    }

    #[test]
    fn allocate_starts_with_refcount_one() {
        let mut heap = new_heap();
        let id = heap.allocate(HeapData::Int(7)).unwrap();
        assert_eq!(heap.get_refcount(id), 1);
        assert_eq!(heap.get(id), &HeapData::Int(7));
    }

    #[test]
    fn dec_ref_frees_only_at_zero() {
        let mut heap = new_heap();
        let id = heap.allocate(HeapData::Str("error".to_owned())).unwrap();
        heap.inc_ref(id);
        assert_eq!(heap.dec_ref(id), 0);
        assert!(heap.is_live(id));
        assert_eq!(heap.dec_ref(id), 1);
        assert!(!heap.is_live(id));
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = new_heap();
        let first = heap.allocate(HeapData::Null).unwrap();
        heap.dec_ref(first);
        let second = heap.allocate(HeapData::Bool(true)).unwrap();
        assert_eq!(first, second);
        let stats = heap.heap_stats();
        assert_eq!(stats.total_slots, 1);
        assert_eq!(stats.free_slots, 0);
    }

    #[test]
    fn releasing_object_releases_its_properties() {
        let mut heap = new_heap();
        let message = heap.allocate(HeapData::Str("error!".to_owned())).unwrap();
        let mut obj = Object::new(ClassId::from_index(0));
        obj.set_property_raw("message", message);
        let obj_id = heap.allocate(HeapData::Object(obj)).unwrap();
        assert_eq!(heap.live_count(), 2);

        assert_eq!(heap.dec_ref(obj_id), 2);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn releasing_a_deep_previous_chain_does_not_recurse() {
        let mut heap = new_heap();
        let mut head = heap.allocate(HeapData::Null).unwrap();
        for _ in 0..200_000 {
            let mut obj = Object::new(ClassId::from_index(0));
            obj.set_property_raw("previous", head);
            head = heap.allocate(HeapData::Object(obj)).unwrap();
        }
        assert_eq!(heap.dec_ref(head), 200_001);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn shared_property_survives_owner_release() {
        let mut heap = new_heap();
        let message = heap.allocate(HeapData::Str("kept".to_owned())).unwrap();
        heap.inc_ref(message);
        let mut obj = Object::new(ClassId::from_index(0));
        obj.set_property_raw("message", message);
        let obj_id = heap.allocate(HeapData::Object(obj)).unwrap();

        heap.dec_ref(obj_id);
        assert!(heap.is_live(message));
        assert_eq!(heap.get_refcount(message), 1);
    }

    #[test]
    fn stats_diff_reports_growth() {
        let mut heap = new_heap();
        let before = heap.heap_stats();
        let id = heap.allocate(HeapData::Str("x".to_owned())).unwrap();
        let after = heap.heap_stats();
        let diff = before.diff(&after);
        assert_eq!(diff.live_objects_delta, 1);
        assert_eq!(diff.objects_by_type_delta.get("Str"), Some(&1));
        assert!(!diff.is_empty());

        heap.dec_ref(id);
        assert!(before.diff(&heap.heap_stats()).is_empty());
    }

    #[test]
    #[should_panic(expected = "Heap::dec_ref: object already freed")]
    fn double_release_panics() {
        let mut heap = new_heap();
        let id = heap.allocate(HeapData::Null).unwrap();
        heap.dec_ref(id);
        heap.dec_ref(id);
    }
}
