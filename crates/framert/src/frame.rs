//! Frame stack: one allocation scope per function activation.

use std::borrow::Cow;

use crate::heap::HeapId;

/// A slot in a frame, naming a local of one specific activation.
///
/// Carries the owning frame's serial so a handle that outlives its activation
/// is rejected instead of silently addressing a newer frame at the same depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local {
    depth: usize,
    serial: u64,
    index: usize,
}

/// Proof of a `frame_enter`, consumed by the matching `frame_exit`.
#[must_use = "every entered frame must be exited with Context::frame_exit"]
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle {
    depth: usize,
    serial: u64,
}

impl FrameHandle {
    /// Frame stack depth of this frame (1 for the outermost frame).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth + 1
    }
}

/// The allocation scope of one activation.
#[derive(Debug)]
pub struct Frame {
    name: Cow<'static, str>,
    serial: u64,
    /// Owning slots in registration order; `None` once released or moved out.
    slots: Vec<Option<HeapId>>,
}

impl Frame {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots that still own a value.
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Drains the owned values, most recently registered first.
    pub(crate) fn drain_owned_rev(&mut self) -> impl Iterator<Item = HeapId> + '_ {
        self.slots.drain(..).rev().flatten()
    }
}

#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
    next_serial: u64,
}

impl FrameStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub(crate) fn push(&mut self, name: Cow<'static, str>) -> FrameHandle {
        let serial = self.next_serial;
        self.next_serial += 1;
        let depth = self.frames.len();
        self.frames.push(Frame {
            name,
            serial,
            slots: Vec::new(),
        });
        FrameHandle { depth, serial }
    }

    /// Pops the frame named by `handle`.
    ///
    /// # Panics
    /// Panics if `handle` is not the innermost frame: frames exit strictly in
    /// reverse order of entry.
    pub(crate) fn pop(&mut self, handle: FrameHandle) -> Frame {
        let top = self.frames.last().expect("FrameStack::pop: no active frame");
        assert!(
            handle.depth + 1 == self.frames.len() && handle.serial == top.serial,
            "FrameStack::pop: frame '{}' exited out of order",
            top.name
        );
        self.frames.pop().expect("FrameStack::pop: no active frame")
    }

    /// Adds an owning slot to the innermost frame.
    ///
    /// # Panics
    /// Panics if no frame is active: every allocation that outlives an
    /// expression must belong to exactly one frame.
    pub(crate) fn register(&mut self, value: Option<HeapId>) -> Local {
        let depth = self.frames.len().checked_sub(1).expect("FrameStack::register: no active frame");
        let frame = &mut self.frames[depth];
        frame.slots.push(value);
        Local {
            depth,
            serial: frame.serial,
            index: frame.slots.len() - 1,
        }
    }

    /// # Panics
    /// Panics if the local's frame has already exited.
    #[must_use]
    pub(crate) fn slot(&self, local: Local) -> Option<HeapId> {
        *self.frame_for(local).slots.get(local.index).expect("FrameStack::slot: bad local index")
    }

    /// # Panics
    /// Panics if the local's frame has already exited.
    pub(crate) fn slot_mut(&mut self, local: Local) -> &mut Option<HeapId> {
        let frame = self
            .frames
            .get_mut(local.depth)
            .filter(|f| f.serial == local.serial)
            .expect("FrameStack::slot_mut: local used after its frame exited");
        frame.slots.get_mut(local.index).expect("FrameStack::slot_mut: bad local index")
    }

    fn frame_for(&self, local: Local) -> &Frame {
        self.frames
            .get(local.depth)
            .filter(|f| f.serial == local.serial)
            .expect("FrameStack::slot: local used after its frame exited")
    }
}
