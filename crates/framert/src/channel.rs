//! The pending-exception slot of one execution context.

use crate::{heap::HeapId, value::Value};

/// Holds at most one in-flight exception.
///
/// The slot owns one reference to the exception it holds, so the exception
/// outlives the frames it is propagated through.
#[derive(Debug, Default)]
pub struct ExceptionChannel {
    pending: Option<Value>,
}

impl ExceptionChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `exc` as the pending exception.
    ///
    /// # Panics
    /// Panics if an exception is already pending: a cleared slot is a precondition
    /// of every raise, and overwriting would leak the earlier exception.
    pub fn raise(&mut self, exc: Value) {
        assert!(
            self.pending.is_none(),
            "ExceptionChannel::raise: an exception is already pending"
        );
        self.pending = Some(exc);
    }

    /// Whether an exception is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The pending exception, without clearing it.
    #[must_use]
    pub fn current(&self) -> Option<HeapId> {
        self.pending.as_ref().map(Value::id)
    }

    /// Empties the slot, handing its reference to the caller.
    pub fn take(&mut self) -> Option<Value> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heap::{DropWithHeap, Heap, HeapData},
        resource::NoLimitTracker,
    };

    #[test]
    fn raise_then_take_round_trips() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let id = heap.allocate(HeapData::Str("error".to_owned())).unwrap();
        let mut channel = ExceptionChannel::new();
        assert!(!channel.is_pending());

        channel.raise(Value::from_owned(id));
        assert!(channel.is_pending());
        assert_eq!(channel.current(), Some(id));

        let taken = channel.take().unwrap();
        assert!(!channel.is_pending());
        assert_eq!(taken.id(), id);
        taken.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "an exception is already pending")]
    fn raising_twice_panics() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let first = heap.allocate(HeapData::Null).unwrap();
        let second = heap.allocate(HeapData::Null).unwrap();
        let mut channel = ExceptionChannel::new();
        channel.raise(Value::from_owned(first));
        channel.raise(Value::from_owned(second));
    }
}
