use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{class::ClassId, heap::HeapId};

/// An instance of a registered class.
///
/// Every property slot owns one reference to its cell; releasing the object
/// releases its properties in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    class: ClassId,
    properties: IndexMap<String, HeapId>,
}

impl Object {
    #[must_use]
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            properties: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Returns the cell stored in the named property, if any.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<HeapId> {
        self.properties.get(name).copied()
    }

    /// Stores `id` (whose count the caller hands over) and returns the previous
    /// occupant, whose count the caller must release.
    pub(crate) fn set_property_raw(&mut self, name: &str, id: HeapId) -> Option<HeapId> {
        if let Some(slot) = self.properties.get_mut(name) {
            Some(std::mem::replace(slot, id))
        } else {
            self.properties.insert(name.to_owned(), id);
            None
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.properties
            .keys()
            .map(|name| name.len() + std::mem::size_of::<HeapId>())
            .sum()
    }

    pub(crate) fn collect_child_ids(&self, out: &mut SmallVec<[HeapId; 8]>) {
        out.extend(self.properties.values().copied());
    }
}
