use crate::heap::HeapId;

/// An owned reference to a heap cell.
///
/// Holding a `Value` means holding exactly one of the cell's reference counts.
/// It must end up in an owning slot (a frame local, an object property, the
/// exception channel) or be released with [`DropWithHeap::drop_with_heap`];
/// a plain Rust drop leaks the count.
///
/// With the `ref-count-panic` feature, dropping a `Value` without releasing it
/// panics, which turns every leak on an untested path into a test failure.
///
/// [`DropWithHeap::drop_with_heap`]: crate::heap::DropWithHeap::drop_with_heap
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Value(HeapId);

impl Value {
    /// Wraps an id whose reference count the caller already owns.
    pub(crate) fn from_owned(id: HeapId) -> Self {
        Self(id)
    }

    /// The cell this value refers to.
    #[must_use]
    pub fn id(&self) -> HeapId {
        self.0
    }

    /// Gives up the owned count without releasing it; the caller becomes responsible for it.
    pub(crate) fn into_id(self) -> HeapId {
        let id = self.0;
        std::mem::forget(self);
        id
    }
}

#[cfg(feature = "ref-count-panic")]
impl Drop for Value {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            panic!("Value {:?} dropped without drop_with_heap", self.0);
        }
    }
}
