//! Runtime type descriptors as reported by the introspection collaborator.
//!
//! A [`RuntimeType`] describes how an object of a given managed type is laid out in target
//! memory: its name, owning module, instance fields with their offsets, single-inheritance base
//! type, classification flags and, for arrays, the element type and element size. Types are shared
//! as [`RuntimeTypeRc`] and refer to each other through weak [`RuntimeTypeRef`] handles, so
//! self-referential layouts (a linked-list node holding a field of its own type) do not leak.
//!
//! # Field offsets
//!
//! Offsets follow the runtime convention: they are relative to the first byte after the
//! type-handle word of a boxed object. A field of a boxed object therefore lives at
//! `address + pointer_size + offset`, while a field of an interior (inline) value lives at
//! `address + offset`. See [`RuntimeField::address`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use heapscope::runtime::{ElementKind, RuntimeType, TypeFlags};
//!
//! let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4));
//! let point = Arc::new(
//!     RuntimeType::new(2, "Demo.Point")
//!         .with_flags(TypeFlags::VALUE_TYPE)
//!         .with_base_size(8),
//! );
//! point.add_field("x", &int32, 0);
//! point.add_field("y", &int32, 4);
//!
//! assert_eq!(point.fields().len(), 2);
//! assert_eq!(point.field_by_name("y").map(|f| f.offset), Some(4));
//! ```

use std::sync::{Arc, LazyLock, OnceLock, Weak};

use bitflags::bitflags;
use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// A reference-counted pointer to a [`RuntimeType`]
pub type RuntimeTypeRc = Arc<RuntimeType>;

/// Identifier reserved for the unresolved-type sentinel
pub const UNRESOLVED_TYPE_ID: u64 = u64::MAX;

/// Display name of the unresolved-type sentinel
pub const UNRESOLVED_TYPE_NAME: &str = "Unknown Type";

static UNRESOLVED: LazyLock<RuntimeTypeRc> = LazyLock::new(|| {
    Arc::new(RuntimeType::new(UNRESOLVED_TYPE_ID, UNRESOLVED_TYPE_NAME).with_flags(TypeFlags::SEALED))
});

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    /// Classification of a runtime type.
    ///
    /// Slots (fields and array elements) of a type flagged `OBJECT_REFERENCE`, `STRING`,
    /// `ARRAY` or `INTERFACE` hold a pointer to a separately allocated object; any one of these
    /// flags is enough, catalogs need not add `OBJECT_REFERENCE` to the other three. Slots of
    /// `PRIMITIVE` and `VALUE_TYPE` types hold the value inline and must not carry any of the
    /// pointer flags. [`RuntimeType::is_reference`] is the single test the crate applies.
    pub struct TypeFlags: u32 {
        /// Single- or multi-dimensional array
        const ARRAY = 0x0001;
        /// Primitive scalar (including enums, which are backed by a primitive)
        const PRIMITIVE = 0x0002;
        /// Value type (struct), stored inline when used as a field or array element
        const VALUE_TYPE = 0x0004;
        /// Stored as a pointer to an independently boxed heap object
        const OBJECT_REFERENCE = 0x0008;
        /// Enumeration, `enum_members` holds its symbolic names
        const ENUM = 0x0010;
        /// Cannot be subclassed; references never need re-resolution
        const SEALED = 0x0020;
        /// `System.String`
        const STRING = 0x0040;
        /// Interface type
        const INTERFACE = 0x0080;
    }
}

/// The primitive storage kind of a primitive or enum-typed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum ElementKind {
    /// System.Boolean - true/false value
    Boolean,
    /// System.Char - Unicode 16-bit character
    Char,
    /// System.SByte - signed 8-bit integer
    I1,
    /// System.Byte - unsigned 8-bit integer
    U1,
    /// System.Int16 - signed 16-bit integer
    I2,
    /// System.UInt16 - unsigned 16-bit integer
    U2,
    /// System.Int32 - signed 32-bit integer
    I4,
    /// System.UInt32 - unsigned 32-bit integer
    U4,
    /// System.Int64 - signed 64-bit integer
    I8,
    /// System.UInt64 - unsigned 64-bit integer
    U8,
    /// System.Single - 32-bit floating point
    R4,
    /// System.Double - 64-bit floating point
    R8,
    /// System.IntPtr - native sized signed integer
    I,
    /// System.UIntPtr - native sized unsigned integer
    U,
}

impl ElementKind {
    /// Fully qualified name of the runtime type for this kind
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            ElementKind::Boolean => "System.Boolean",
            ElementKind::Char => "System.Char",
            ElementKind::I1 => "System.SByte",
            ElementKind::U1 => "System.Byte",
            ElementKind::I2 => "System.Int16",
            ElementKind::U2 => "System.UInt16",
            ElementKind::I4 => "System.Int32",
            ElementKind::U4 => "System.UInt32",
            ElementKind::I8 => "System.Int64",
            ElementKind::U8 => "System.UInt64",
            ElementKind::R4 => "System.Single",
            ElementKind::R8 => "System.Double",
            ElementKind::I => "System.IntPtr",
            ElementKind::U => "System.UIntPtr",
        }
    }

    /// Look up a kind from its fully qualified runtime type name
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        ElementKind::iter().find(|kind| kind.type_name() == name)
    }

    /// Storage size in bytes
    ///
    /// ## Arguments
    /// * 'pointer_size' - Pointer width of the target, used by `I` and `U`
    #[must_use]
    pub fn size(self, pointer_size: usize) -> usize {
        match self {
            ElementKind::Boolean | ElementKind::I1 | ElementKind::U1 => 1,
            ElementKind::Char | ElementKind::I2 | ElementKind::U2 => 2,
            ElementKind::I4 | ElementKind::U4 | ElementKind::R4 => 4,
            ElementKind::I8 | ElementKind::U8 | ElementKind::R8 => 8,
            ElementKind::I | ElementKind::U => pointer_size,
        }
    }
}

/// A weak handle to a [`RuntimeType`], owned strongly by the type catalog.
#[derive(Clone, Debug)]
pub struct RuntimeTypeRef {
    weak_ref: Weak<RuntimeType>,
}

impl RuntimeTypeRef {
    /// Create a new handle from a strong reference
    #[must_use]
    pub fn new(strong_ref: &RuntimeTypeRc) -> Self {
        Self {
            weak_ref: Arc::downgrade(strong_ref),
        }
    }

    /// Get a strong reference to the type, returning None if the catalog dropped it
    #[must_use]
    pub fn upgrade(&self) -> Option<RuntimeTypeRc> {
        self.weak_ref.upgrade()
    }

    /// Get a strong reference, falling back to the unresolved-type sentinel
    #[must_use]
    pub fn resolve(&self) -> RuntimeTypeRc {
        self.upgrade().unwrap_or_else(RuntimeType::unresolved)
    }
}

impl From<&RuntimeTypeRc> for RuntimeTypeRef {
    fn from(value: &RuntimeTypeRc) -> Self {
        RuntimeTypeRef::new(value)
    }
}

/// A declared instance field.
#[derive(Clone, Debug)]
pub struct RuntimeField {
    /// Field name as stored in metadata (possibly obfuscated)
    pub name: String,
    /// Declared (static) type of the field
    pub field_type: RuntimeTypeRef,
    /// Offset relative to the end of the object header
    pub offset: usize,
}

impl RuntimeField {
    /// Address of this field inside a container object.
    ///
    /// ## Arguments
    /// * 'container'    - Address of the object holding the field
    /// * 'interior'     - Whether the container is an inline value without a type handle
    /// * 'pointer_size' - Pointer width of the target
    #[must_use]
    pub fn address(&self, container: u64, interior: bool, pointer_size: usize) -> u64 {
        let header = if interior { 0 } else { pointer_size as u64 };
        container
            .wrapping_add(header)
            .wrapping_add(self.offset as u64)
    }

    /// The declared type, or the unresolved-type sentinel if the catalog no longer holds it
    #[must_use]
    pub fn resolved_type(&self) -> RuntimeTypeRc {
        self.field_type.resolve()
    }
}

/// Layout and classification of a managed type.
#[derive(Debug)]
pub struct RuntimeType {
    /// Catalog-unique identity of the type
    pub id: u64,
    /// Fully qualified name with `+` as the nested-type separator (possibly obfuscated)
    pub name: String,
    /// File name of the module that defines the type
    pub module: Option<String>,
    /// Classification flags
    pub flags: TypeFlags,
    /// Storage kind for primitive and enum types
    pub element_kind: Option<ElementKind>,
    /// Size of a non-array instance, including the header
    pub base_size: usize,
    /// Size of one array element (arrays only)
    pub component_size: usize,
    /// Symbolic names of an enum's members
    pub enum_members: Vec<(String, i64)>,
    fields: boxcar::Vec<RuntimeField>,
    base: OnceLock<RuntimeTypeRef>,
    component: OnceLock<RuntimeTypeRef>,
}

impl RuntimeType {
    /// Create a new type without fields, base or component type
    ///
    /// ## Arguments
    /// * 'id'   - Catalog-unique identity
    /// * 'name' - Fully qualified type name
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        RuntimeType {
            id,
            name: name.into(),
            module: None,
            flags: TypeFlags::empty(),
            element_kind: None,
            base_size: 0,
            component_size: 0,
            enum_members: Vec::new(),
            fields: boxcar::Vec::new(),
            base: OnceLock::new(),
            component: OnceLock::new(),
        }
    }

    /// Create a sealed primitive type for the given storage kind
    #[must_use]
    pub fn primitive(id: u64, kind: ElementKind) -> Self {
        RuntimeType::new(id, kind.type_name())
            .with_flags(TypeFlags::PRIMITIVE | TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
            .with_element_kind(kind)
    }

    /// The shared unresolved-type sentinel: named "Unknown Type", sealed, without fields.
    #[must_use]
    pub fn unresolved() -> RuntimeTypeRc {
        UNRESOLVED.clone()
    }

    /// Set the module file name
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Set the classification flags
    #[must_use]
    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the primitive storage kind
    #[must_use]
    pub fn with_element_kind(mut self, kind: ElementKind) -> Self {
        self.element_kind = Some(kind);
        self
    }

    /// Set the instance size of non-array objects
    #[must_use]
    pub fn with_base_size(mut self, size: usize) -> Self {
        self.base_size = size;
        self
    }

    /// Set the element size of an array type
    #[must_use]
    pub fn with_component_size(mut self, size: usize) -> Self {
        self.component_size = size;
        self
    }

    /// Add a symbolic enum member
    #[must_use]
    pub fn with_enum_member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.enum_members.push((name.into(), value));
        self
    }

    /// Append a declared instance field
    ///
    /// ## Arguments
    /// * 'name'       - Field name as stored in metadata
    /// * 'field_type' - Declared type of the field
    /// * 'offset'     - Offset relative to the end of the object header
    pub fn add_field(&self, name: impl Into<String>, field_type: &RuntimeTypeRc, offset: usize) {
        self.fields.push(RuntimeField {
            name: name.into(),
            field_type: field_type.into(),
            offset,
        });
    }

    /// Set the base type. Returns `false` if a base was already set.
    pub fn set_base(&self, base: &RuntimeTypeRc) -> bool {
        self.base.set(base.into()).is_ok()
    }

    /// Set the array element type. Returns `false` if one was already set.
    pub fn set_component(&self, component: &RuntimeTypeRc) -> bool {
        self.component.set(component.into()).is_ok()
    }

    /// The base type, if any
    #[must_use]
    pub fn base(&self) -> Option<RuntimeTypeRc> {
        self.base.get().and_then(RuntimeTypeRef::upgrade)
    }

    /// The array element type, if any
    #[must_use]
    pub fn component(&self) -> Option<RuntimeTypeRc> {
        self.component.get().and_then(RuntimeTypeRef::upgrade)
    }

    /// Fields declared directly on this type, in declaration order
    pub fn declared_fields(&self) -> impl Iterator<Item = &RuntimeField> {
        self.fields.iter().map(|(_, field)| field)
    }

    /// All instance fields, inherited ones first, in declaration order.
    #[must_use]
    pub fn fields(&self) -> Vec<RuntimeField> {
        let mut chain = Vec::new();
        let mut current = self.base();
        while let Some(base) = current {
            current = base.base();
            chain.push(base);
        }

        let mut fields = Vec::new();
        for ancestor in chain.iter().rev() {
            fields.extend(ancestor.declared_fields().cloned());
        }
        fields.extend(self.declared_fields().cloned());
        fields
    }

    /// Find an instance field by its metadata name, searching this type before its bases.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<RuntimeField> {
        if let Some(field) = self.declared_fields().find(|field| field.name == name) {
            return Some(field.clone());
        }

        let mut current = self.base();
        while let Some(base) = current {
            if let Some(field) = base.declared_fields().find(|field| field.name == name) {
                return Some(field.clone());
            }
            current = base.base();
        }

        None
    }

    /// Symbolic name of an enum value
    #[must_use]
    pub fn enum_name(&self, value: i64) -> Option<&str> {
        self.enum_members
            .iter()
            .find(|(_, member)| *member == value)
            .map(|(name, _)| name.as_str())
    }

    /// Returns true for the unresolved-type sentinel
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.id == UNRESOLVED_TYPE_ID
    }

    /// Returns true for array types
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.contains(TypeFlags::ARRAY)
    }

    /// Returns true for primitive and enum types
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.flags.contains(TypeFlags::PRIMITIVE)
    }

    /// Returns true for value types that are not primitive
    #[must_use]
    pub fn is_value_class(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE) && !self.is_primitive()
    }

    /// Returns true if the type carries the `OBJECT_REFERENCE` flag
    #[must_use]
    pub fn is_object_reference(&self) -> bool {
        self.flags.contains(TypeFlags::OBJECT_REFERENCE)
    }

    /// Returns true if slots of this type hold a pointer to a separately allocated object:
    /// object references, strings, arrays and interfaces
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.flags.intersects(
            TypeFlags::OBJECT_REFERENCE | TypeFlags::STRING | TypeFlags::ARRAY | TypeFlags::INTERFACE,
        )
    }

    /// Returns true for enums
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(TypeFlags::ENUM)
    }

    /// Returns true for sealed types
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }

    /// Returns true for `System.String`
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.flags.contains(TypeFlags::STRING)
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }
}

impl PartialEq for RuntimeType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RuntimeType {}

impl std::hash::Hash for RuntimeType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_flags_stand_alone() {
        for flags in [
            TypeFlags::OBJECT_REFERENCE,
            TypeFlags::STRING,
            TypeFlags::ARRAY,
            TypeFlags::INTERFACE,
        ] {
            assert!(RuntimeType::new(1, "Slot").with_flags(flags).is_reference(), "{flags:?}");
        }
        assert!(!RuntimeType::primitive(2, ElementKind::I4).is_reference());
        assert!(!RuntimeType::new(3, "Demo.Point")
            .with_flags(TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
            .is_reference());
    }

    #[test]
    fn element_kind_names() {
        assert_eq!(ElementKind::COUNT, 14);
        for kind in ElementKind::iter() {
            assert_eq!(ElementKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(ElementKind::from_type_name("System.String"), None);
        assert_eq!(ElementKind::I.size(4), 4);
        assert_eq!(ElementKind::U.size(8), 8);
        assert_eq!(ElementKind::Char.size(8), 2);
    }

    #[test]
    fn inherited_fields_come_first() {
        let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4));
        let base = Arc::new(RuntimeType::new(2, "Demo.Base").with_flags(TypeFlags::OBJECT_REFERENCE));
        base.add_field("a", &int32, 0);
        let derived =
            Arc::new(RuntimeType::new(3, "Demo.Derived").with_flags(TypeFlags::OBJECT_REFERENCE));
        derived.add_field("b", &int32, 4);
        assert!(derived.set_base(&base));
        assert!(!derived.set_base(&base));

        let names: Vec<_> = derived.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(derived.field_by_name("a").map(|f| f.offset), Some(0));
        assert!(derived.field_by_name("c").is_none());
    }

    #[test]
    fn field_addresses() {
        let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4));
        let holder = Arc::new(RuntimeType::new(2, "Demo.Holder"));
        holder.add_field("value", &int32, 4);
        let field = holder.field_by_name("value").unwrap();

        assert_eq!(field.address(0x1000, false, 8), 0x100C);
        assert_eq!(field.address(0x1000, true, 8), 0x1004);
    }

    #[test]
    fn unresolved_sentinel() {
        let sentinel = RuntimeType::unresolved();
        assert!(sentinel.is_unresolved());
        assert!(sentinel.is_sealed());
        assert_eq!(sentinel.name, UNRESOLVED_TYPE_NAME);
        assert!(sentinel.fields().is_empty());
    }

    #[test]
    fn dropped_type_resolves_to_sentinel() {
        let handle = {
            let temp = Arc::new(RuntimeType::new(5, "Gone"));
            RuntimeTypeRef::new(&temp)
        };
        assert!(handle.upgrade().is_none());
        assert!(handle.resolve().is_unresolved());
    }

    #[test]
    fn enum_names() {
        let kind = RuntimeType::primitive(9, ElementKind::I4)
            .with_flags(TypeFlags::PRIMITIVE | TypeFlags::ENUM | TypeFlags::SEALED)
            .with_enum_member("Red", 0)
            .with_enum_member("Green", 1);
        assert_eq!(kind.enum_name(1), Some("Green"));
        assert_eq!(kind.enum_name(7), None);
        assert!(kind.is_enum());
        assert!(!kind.is_value_class());
    }
}
