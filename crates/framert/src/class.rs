//! Class registry: builtin exception classes plus classes defined by the host.
//!
//! Class and method names are case-insensitive, so lookups go through a
//! lowercased key while the declared spelling is kept for messages.

use ahash::AHashMap;
use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::{
    context::Context,
    exception_private::{ExcType, RunError, RunResult, install_exception_protocol},
    heap::{HeapData, HeapId},
    resource::{MAX_INHERITANCE_DEPTH, ResourceTracker},
    tracer::RuntimeTracer,
    value::Value,
};

/// Index of a class in its [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("class table exceeds u32::MAX entries"))
    }
}

impl From<ExcType> for ClassId {
    fn from(exc: ExcType) -> Self {
        Self(exc as u32)
    }
}

/// A native method body.
///
/// Receives the receiver and borrowed arguments; the caller keeps ownership of
/// both. Returns an owned value, or `None` for a void method. A method that
/// raises returns `Err(RunError::Exc)` or, like generated code with a sentinel
/// return, `Ok` with the exception left pending; the caller's status check
/// handles both.
pub type NativeMethod<T, Tr> = fn(&mut Context<T, Tr>, HeapId, &[HeapId]) -> RunResult<Option<Value>>;

#[derive(Debug)]
pub struct ClassDef<T: ResourceTracker, Tr: RuntimeTracer> {
    name: String,
    parent: Option<ClassId>,
    methods: AHashMap<String, NativeMethod<T, Tr>>,
    /// Default property values, copied into each new instance.
    properties: IndexMap<String, HeapData>,
}

impl<T: ResourceTracker, Tr: RuntimeTracer> ClassDef<T, Tr> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }
}

#[derive(Debug)]
pub struct ClassTable<T: ResourceTracker, Tr: RuntimeTracer> {
    classes: Vec<ClassDef<T, Tr>>,
    by_name: AHashMap<String, ClassId>,
}

impl<T: ResourceTracker, Tr: RuntimeTracer> ClassTable<T, Tr> {
    /// Creates a table holding the builtin exception hierarchy.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            classes: Vec::new(),
            by_name: AHashMap::new(),
        };
        for exc in ExcType::iter() {
            let parent = exc.parent().map(ClassId::from);
            let id = table
                .define(exc.into(), parent)
                .expect("builtin exception names are unique");
            debug_assert_eq!(id, ClassId::from(exc));
        }
        install_exception_protocol(&mut table);
        table
    }

    /// Registers a new class.
    ///
    /// Fails when a class with the same (case-insensitive) name exists, the
    /// parent id is unknown, or the chain would exceed [`MAX_INHERITANCE_DEPTH`].
    pub fn define(&mut self, name: &str, parent: Option<ClassId>) -> RunResult<ClassId> {
        let key = name.to_ascii_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(RunError::internal(format!("cannot redeclare class {name}")));
        }
        if let Some(parent) = parent {
            if parent.index() >= self.classes.len() {
                return Err(RunError::internal(format!("class {name} extends an unknown class")));
            }
            if self.ancestry(parent).count() >= MAX_INHERITANCE_DEPTH {
                return Err(RunError::internal(format!(
                    "class {name} exceeds maximum inheritance depth of {MAX_INHERITANCE_DEPTH}"
                )));
            }
        }
        let id = ClassId::from_index(self.classes.len());
        self.classes.push(ClassDef {
            name: name.to_owned(),
            parent,
            methods: AHashMap::new(),
            properties: IndexMap::new(),
        });
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Adds or replaces a method on `class`.
    pub fn add_method(&mut self, class: ClassId, name: &str, method: NativeMethod<T, Tr>) {
        self.get_mut(class).methods.insert(name.to_ascii_lowercase(), method);
    }

    /// Declares a property with its default value. Objects are not valid defaults.
    pub fn add_property(&mut self, class: ClassId, name: &str, default: HeapData) {
        assert!(
            !matches!(default, HeapData::Object(_)),
            "ClassTable::add_property: property defaults cannot be objects"
        );
        self.get_mut(class).properties.insert(name.to_owned(), default);
    }

    /// # Panics
    /// Panics if `class` was not issued by this table.
    #[must_use]
    pub fn get(&self, class: ClassId) -> &ClassDef<T, Tr> {
        self.classes.get(class.index()).expect("ClassTable::get: unknown class id")
    }

    fn get_mut(&mut self, class: ClassId) -> &mut ClassDef<T, Tr> {
        self.classes
            .get_mut(class.index())
            .expect("ClassTable::get_mut: unknown class id")
    }

    #[must_use]
    pub fn name(&self, class: ClassId) -> &str {
        &self.get(class).name
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    /// Iterates `class` and its ancestors, nearest first.
    pub fn ancestry(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::successors(Some(class), |&c| self.get(c).parent).take(MAX_INHERITANCE_DEPTH)
    }

    /// Returns true if an instance of `class` matches a `catch (ancestor e)` clause.
    #[must_use]
    pub fn is_subclass_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.ancestry(class).any(|c| c == ancestor)
    }

    /// Finds a method on `class` or the nearest ancestor that defines it.
    #[must_use]
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<NativeMethod<T, Tr>> {
        let key = name.to_ascii_lowercase();
        self.ancestry(class).find_map(|c| self.get(c).methods.get(&key).copied())
    }

    /// Default properties for a new instance, root class first; a subclass
    /// redeclaring a property overrides the inherited default in place.
    #[must_use]
    pub fn default_properties(&self, class: ClassId) -> IndexMap<String, HeapData> {
        let chain: Vec<ClassId> = self.ancestry(class).collect();
        let mut properties = IndexMap::new();
        for c in chain.into_iter().rev() {
            for (name, default) in &self.get(c).properties {
                properties.insert(name.clone(), default.clone());
            }
        }
        properties
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl<T: ResourceTracker, Tr: RuntimeTracer> Default for ClassTable<T, Tr> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::NoLimitTracker, tracer::NoopTracer};

    type Table = ClassTable<NoLimitTracker, NoopTracer>;

    #[test]
    fn builtin_ids_match_exc_type() {
        let table = Table::new();
        assert_eq!(table.lookup("RuntimeException"), Some(ExcType::RuntimeException.into()));
        assert_eq!(table.lookup("runtimeexception"), Some(ExcType::RuntimeException.into()));
        assert_eq!(table.name(ExcType::BadMethodCallException.into()), "BadMethodCallException");
    }

    #[test]
    fn user_class_inherits_methods_and_properties() {
        let mut table = Table::new();
        let custom = table
            .define("Test\\CustomException", Some(ExcType::RuntimeException.into()))
            .unwrap();
        table.add_property(custom, "code", HeapData::Int(42));
        table.add_property(custom, "detail", HeapData::Null);

        assert!(table.is_subclass_of(custom, ExcType::Exception.into()));
        assert!(!table.is_subclass_of(custom, ExcType::LogicException.into()));
        assert!(table.find_method(custom, "getmessage").is_some());

        let defaults = table.default_properties(custom);
        let names: Vec<&str> = defaults.keys().map(String::as_str).collect();
        assert_eq!(names, ["message", "code", "previous", "detail"]);
        assert_eq!(defaults["code"], HeapData::Int(42));
    }

    #[test]
    fn redeclaring_a_class_fails() {
        let mut table = Table::new();
        assert!(table.define("exception", None).is_err());
        assert!(table.define("Fresh", Some(ClassId::from_index(10_000))).is_err());
    }

    #[test]
    fn inheritance_depth_is_bounded_at_define() {
        let mut table = Table::new();
        let mut parent = ClassId::from(ExcType::Exception);
        for level in 1..MAX_INHERITANCE_DEPTH {
            parent = table.define(&format!("Level{level}"), Some(parent)).unwrap();
        }
        assert_eq!(table.ancestry(parent).count(), MAX_INHERITANCE_DEPTH);
        assert!(table.is_subclass_of(parent, ExcType::Exception.into()));

        let err = table.define("TooDeep", Some(parent)).unwrap_err();
        assert!(matches!(&err, RunError::Internal(msg) if msg.contains("maximum inheritance depth")));
        assert_eq!(table.lookup("TooDeep"), None);
    }
}
