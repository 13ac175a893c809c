//! Dynamic, schema-free views of heap objects.
//!
//! A [`DynamicObject`] is an address, a runtime type and an *interior* flag, borrowed from the
//! [`HeapSession`] that produced it. It owns no memory: every accessor reads the target afresh,
//! so two reads of the same field can disagree if the target changed in between. Collect into a
//! `Vec` when a stable snapshot is needed.
//!
//! Field lookups accept original (deobfuscated) names, auto-property names and raw metadata
//! names; navigating a field re-resolves the runtime type of non-sealed references so that a
//! field declared as a base class or interface yields the actual derived instance.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use heapscope::prelude::*;
//!
//! let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4));
//! let point = Arc::new(
//!     RuntimeType::new(0x7000, "Demo.Point")
//!         .with_flags(TypeFlags::OBJECT_REFERENCE)
//!         .with_base_size(24),
//! );
//! point.add_field("x", &int32, 0);
//! point.add_field("y", &int32, 4);
//!
//! let mut heap = MemorySnapshot::new(8);
//! heap.register_type(&int32);
//! heap.register_type(&point);
//! let address = heap.alloc_object(&point, 24)?;
//! heap.write(address + 8, &3_i32.to_le_bytes())?;
//! heap.write(address + 12, &4_i32.to_le_bytes())?;
//!
//! let session = HeapSession::new(heap);
//! let object = session.object(address);
//! assert_eq!(object.field("y")?.to::<i32>()?, 4);
//! assert_eq!(object.to_string(), format!("{{Demo.Point (0x{address:X})}}"));
//! # Ok::<(), heapscope::Error>(())
//! ```

use std::{cmp::Ordering, fmt, sync::LazyLock};

use regex::Regex;

use crate::{
    decoder,
    obfuscation::TypeName,
    runtime::{RuntimeField, RuntimeTypeRc, TypeCatalog},
    session::HeapSession,
    visualizers::{dictionary, Visualization},
    Error, Result,
};

mod display;
mod value;

pub use display::DetailOptions;
pub use value::SimpleValue;

/// Address of the null reference
pub const NULL_ADDRESS: u64 = 0;

static BACKING_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([^>]+)>k__BackingField$").expect("backing field pattern is valid")
});

/// Metadata name of the field backing the auto-property `property`
#[must_use]
pub fn backing_field_name(property: &str) -> String {
    format!("<{property}>k__BackingField")
}

/// A lazily evaluated view of one heap value.
#[derive(Clone)]
pub struct DynamicObject<'s> {
    session: &'s HeapSession,
    address: u64,
    ty: RuntimeTypeRc,
    interior: bool,
}

impl<'s> DynamicObject<'s> {
    /// Create a view without validating it against the heap.
    ///
    /// ## Arguments
    /// * 'session'  - Session the object is read through
    /// * 'address'  - Object address, or for interior values the address of the inline data
    /// * 'ty'       - Runtime type to interpret the memory as
    /// * 'interior' - Whether the value is embedded inline in a container
    #[must_use]
    pub fn new(session: &'s HeapSession, address: u64, ty: RuntimeTypeRc, interior: bool) -> Self {
        DynamicObject {
            session,
            address,
            ty,
            interior,
        }
    }

    /// Address of the object
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Runtime type the memory is interpreted as
    #[must_use]
    pub fn runtime_type(&self) -> &RuntimeTypeRc {
        &self.ty
    }

    /// Returns true for values embedded inline in a container
    #[must_use]
    pub fn is_interior(&self) -> bool {
        self.interior
    }

    /// The session this object is read through
    #[must_use]
    pub fn session(&self) -> &'s HeapSession {
        self.session
    }

    /// Memory and type metadata of the target
    #[must_use]
    pub fn catalog(&self) -> &'s dyn TypeCatalog {
        self.session.catalog()
    }

    /// Original name of the object's type.
    ///
    /// Types the renaming map does not mention are translated structurally, so arrays and
    /// generic instantiations of renamed types still read naturally.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.session.type_name(&self.ty)
    }

    /// Returns true for the null reference and for objects whose type could not be resolved
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.address == NULL_ADDRESS || self.ty.is_unresolved()
    }

    /// Returns true if the object's type could not be resolved
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        self.ty.is_unresolved()
    }

    /// Find the declared field `name` refers to.
    ///
    /// Tries, on this type and then on each base type: the renaming map entry whose original
    /// name is `name`, then the one for the auto-property backing field `<name>k__BackingField`.
    /// Obfuscation may give several fields the same name; among those the one whose declared
    /// type matches the entry's field type wins. Falls back to `name` and the backing field name
    /// as raw metadata names.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<RuntimeField> {
        let backing = backing_field_name(name);

        let mut current = Some(self.ty.clone());
        while let Some(ty) = current {
            let deobfuscator = self.session.type_deobfuscator(&ty);
            for candidate in [name, backing.as_str()] {
                let Some(record) = deobfuscator.obfuscate_field(candidate) else {
                    continue;
                };

                let field_type = record.field_type.to_string();
                let renamed: Vec<&RuntimeField> = ty
                    .declared_fields()
                    .filter(|field| field.name == record.obfuscated_name)
                    .collect();
                let declared = renamed
                    .iter()
                    .find(|field| self.field_type_key(field) == field_type)
                    .or_else(|| renamed.first());

                if let Some(field) = declared {
                    return Some((*field).clone());
                }
                if let Some(field) = ty.field_by_name(&record.obfuscated_name) {
                    return Some(field);
                }
            }
            current = ty.base();
        }

        self.ty
            .field_by_name(name)
            .or_else(|| self.ty.field_by_name(&backing))
    }

    /// Returns true if [`DynamicObject::field`] would find `name`
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        !self.ty.is_unresolved() && self.find_field(name).is_some()
    }

    /// Value of the field `name`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedType`] on an undefined object, [`Error::NullReference`] on
    /// null, [`Error::FieldNotFound`] if no field matches, or a read error.
    pub fn field(&self, name: &str) -> Result<DynamicObject<'s>> {
        self.ensure_dereferenceable(name)?;

        let Some(field) = self.find_field(name) else {
            return Err(Error::FieldNotFound {
                type_name: self.type_name(),
                field: name.to_string(),
            });
        };

        self.field_by_declaration(&field)
    }

    /// Value of a field already resolved on this object's type.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedType`] for fields whose type is neither a reference, a
    /// primitive nor a value type, or a read error.
    pub fn field_by_declaration(&self, field: &RuntimeField) -> Result<DynamicObject<'s>> {
        self.ensure_dereferenceable(&field.name)?;

        let pointer_size = self.catalog().pointer_size();
        let slot = field.address(self.address, self.interior, pointer_size);
        self.inner_object(slot, field.resolved_type())
    }

    /// Element `index` of an array.
    ///
    /// # Errors
    /// Returns [`Error::NotAnArray`] for non-array types, [`Error::IndexOutOfRange`] unless
    /// `0 <= index < length`, or a read error.
    pub fn index(&self, index: i64) -> Result<DynamicObject<'s>> {
        self.ensure_dereferenceable("[]")?;

        let length = self.array_length()?;
        let position = usize::try_from(index)
            .ok()
            .filter(|position| *position < length)
            .ok_or(Error::IndexOutOfRange { index, length })?;

        let Some(component) = self.ty.component() else {
            return Err(malformed_error!(
                "Array type '{}' has no component type",
                self.ty.name
            ));
        };

        let slot = self
            .catalog()
            .array_element_address(self.address, &self.ty, position);
        self.inner_object(slot, component)
    }

    /// Number of elements of an array.
    ///
    /// # Errors
    /// Returns [`Error::NotAnArray`] for non-array types, or a read error.
    pub fn array_length(&self) -> Result<usize> {
        if self.is_undefined() {
            return Err(Error::UnresolvedType {
                address: self.address,
            });
        }
        self.catalog().array_length(self.address, &self.ty)
    }

    /// Size of the object in bytes.
    ///
    /// # Errors
    /// Returns a read error for strings and arrays whose length cannot be read.
    pub fn size(&self) -> Result<u64> {
        self.catalog().object_size(self.address, &self.ty)
    }

    /// Returns true if the object decodes to a single [`SimpleValue`]
    #[must_use]
    pub fn has_simple_value(&self) -> bool {
        self.is_null() || decoder::is_simple_type(&self.ty)
    }

    /// Decode the object into a [`SimpleValue`].
    ///
    /// # Errors
    /// Returns [`Error::NotSimpleValue`] for complex objects, or a read error.
    pub fn value(&self) -> Result<SimpleValue> {
        decoder::decode(self)
    }

    /// Decode and convert the object into a native value.
    ///
    /// # Errors
    /// Fails like [`DynamicObject::value`], or with [`Error::TypeMismatch`] if the value is of
    /// a different kind.
    pub fn to<T>(&self) -> Result<T>
    where
        T: TryFrom<SimpleValue, Error = Error>,
    {
        T::try_from(self.value()?)
    }

    /// Display text of a simple value: the member name of an enum, `{null}` for null.
    ///
    /// # Errors
    /// Fails like [`DynamicObject::value`].
    pub fn display_value(&self) -> Result<String> {
        Ok(self.value()?.to_string())
    }

    /// Instance fields of the object's type, inherited ones first
    #[must_use]
    pub fn fields(&self) -> Vec<RuntimeField> {
        if self.ty.is_unresolved() {
            return Vec::new();
        }
        self.ty.fields()
    }

    /// Original name of a field, from the renaming entry of the type that declares it.
    ///
    /// The entry is keyed by obfuscated name and declared field type, so fields that share an
    /// obfuscated name keep distinct original names. Auto-property backing fields are reported
    /// under the property name.
    #[must_use]
    pub fn field_display_name(&self, field: &RuntimeField) -> String {
        let field_type = self.field_type_key(field);
        let mut display = field.name.clone();

        let mut current = Some(self.ty.clone());
        while let Some(ty) = current {
            let declares = ty
                .declared_fields()
                .any(|declared| declared.name == field.name && declared.offset == field.offset);
            if declares {
                let deobfuscator = self.session.type_deobfuscator(&ty);
                if let Some(original) = deobfuscator
                    .deobfuscate_typed_field(&field.name, &field_type)
                    .or_else(|| deobfuscator.deobfuscate_field(&field.name))
                {
                    display = original.to_string();
                }
                break;
            }
            current = ty.base();
        }

        match BACKING_FIELD.captures(&display) {
            Some(captures) => captures[1].to_string(),
            None => display,
        }
    }

    /// Iterate array elements in index order, or field values in declaration order.
    ///
    /// Null and undefined objects yield nothing. Every call reads the target again.
    ///
    /// # Errors
    /// Returns a read error if the array length cannot be read.
    pub fn iter(&self) -> Result<Children<'s>> {
        let state = if self.is_null() {
            ChildState::Done
        } else if self.ty.is_array() {
            ChildState::Elements {
                next: 0,
                length: self.array_length()?,
            }
        } else {
            ChildState::Fields(self.fields().into_iter())
        };

        Ok(Children {
            object: self.clone(),
            state,
        })
    }

    /// The same memory viewed as the immediate base type
    #[must_use]
    pub fn downcast_to_base(&self) -> Option<DynamicObject<'s>> {
        let base = self.ty.base()?;
        Some(DynamicObject::new(
            self.session,
            self.address,
            base,
            self.interior,
        ))
    }

    /// Addresses of every object this object references directly.
    ///
    /// # Errors
    /// Returns a read error if a reference slot cannot be read.
    pub fn reference_addresses(&self) -> Result<Vec<u64>> {
        if self.is_null() || self.interior {
            return Ok(Vec::new());
        }
        self.catalog().references_of(self.address, &self.ty)
    }

    /// Every object this object references directly.
    ///
    /// # Errors
    /// Returns a read error if a reference slot cannot be read.
    pub fn references(&self) -> Result<Vec<DynamicObject<'s>>> {
        Ok(self
            .reference_addresses()?
            .into_iter()
            .map(|address| self.session.object(address))
            .collect())
    }

    /// Every heap object holding a reference to this one.
    ///
    /// Answered from the session's reference index when one was built, otherwise by scanning
    /// the whole heap.
    ///
    /// # Errors
    /// Returns a read error from the scan.
    pub fn referenced_by(&self) -> Result<Vec<DynamicObject<'s>>> {
        if let Some(index) = self.session.reference_index() {
            return Ok(index
                .parents_of(self.address)
                .map(|parent| {
                    DynamicObject::new(self.session, parent.address, parent.ty.clone(), false)
                })
                .collect());
        }

        self.referenced_by_in(self.session.objects())
    }

    /// The objects among `candidates` holding a reference to this one.
    ///
    /// # Errors
    /// Returns the first read error raised while enumerating a candidate's references.
    pub fn referenced_by_in<I>(&self, candidates: I) -> Result<Vec<DynamicObject<'s>>>
    where
        I: IntoIterator<Item = DynamicObject<'s>>,
    {
        let mut parents = Vec::new();
        for candidate in candidates {
            if candidate.reference_addresses()?.contains(&self.address) {
                parents.push(candidate);
            }
        }
        Ok(parents)
    }

    /// Values of the live entries of a `System.Collections.Generic.Dictionary`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedType`] for other types, or a read error.
    pub fn dictionary_values(&self) -> Result<Vec<DynamicObject<'s>>> {
        if !self
            .type_name()
            .starts_with("System.Collections.Generic.Dictionary<")
        {
            return Err(Error::UnsupportedType(self.type_name()));
        }

        Ok(dictionary::entries(self)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Friendlier view provided by a registered type visualizer, if one applies
    #[must_use]
    pub fn visualize(&self) -> Option<Visualization<'s>> {
        self.session.visualizers().visualize(self)
    }

    /// Order against another object.
    ///
    /// Two simple values compare by value, two complex objects by address; a simple value and
    /// a complex object are unordered.
    #[must_use]
    pub fn compare(&self, other: &DynamicObject<'_>) -> Option<Ordering> {
        match (self.has_simple_value(), other.has_simple_value()) {
            (true, true) => {
                let (Ok(left), Ok(right)) = (self.value(), other.value()) else {
                    return None;
                };
                left.compare(&right)
            }
            (false, false) => Some(self.address.cmp(&other.address)),
            _ => None,
        }
    }

    /// Compare the decoded value with `expected`; complex objects never match
    #[must_use]
    pub fn eq_value(&self, expected: &SimpleValue) -> bool {
        self.has_simple_value()
            && self
                .value()
                .is_ok_and(|value| value.equivalent(expected))
    }

    /// Compare with a string; enums match by member name
    #[must_use]
    pub fn eq_str(&self, expected: &str) -> bool {
        self.eq_value(&SimpleValue::from(expected))
    }

    /// Declared type of `field` spelled like a renaming-map field signature
    fn field_type_key(&self, field: &RuntimeField) -> String {
        let declared = self.session.deobfuscate_type(&field.resolved_type().name);
        TypeName::parse(&declared).sanitized().to_string()
    }

    fn ensure_dereferenceable(&self, member: &str) -> Result<()> {
        if self.ty.is_unresolved() {
            return Err(Error::UnresolvedType {
                address: self.address,
            });
        }
        if self.address == NULL_ADDRESS {
            return Err(Error::NullReference {
                type_name: self.type_name(),
                member: member.to_string(),
            });
        }
        Ok(())
    }

    /// Classify the value stored in a field or array slot by its declared type
    fn inner_object(&self, slot: u64, declared: RuntimeTypeRc) -> Result<DynamicObject<'s>> {
        let catalog = self.catalog();

        if declared.is_reference() {
            let target = catalog.read_pointer(slot)?;
            let actual = if target != NULL_ADDRESS && !declared.is_sealed() {
                catalog.type_at(target)
            } else {
                declared
            };
            return Ok(DynamicObject::new(self.session, target, actual, false));
        }

        if declared.is_primitive() || declared.is_enum() {
            let address = slot.wrapping_sub(catalog.pointer_size() as u64);
            return Ok(DynamicObject::new(self.session, address, declared, true));
        }

        if declared.is_value_class() {
            return Ok(DynamicObject::new(self.session, slot, declared, true));
        }

        Err(Error::UnsupportedType(declared.name.clone()))
    }
}

impl fmt::Debug for DynamicObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicObject")
            .field("address", &format_args!("0x{:X}", self.address))
            .field("type", &self.ty.name)
            .field("interior", &self.interior)
            .finish()
    }
}

impl PartialEq for DynamicObject<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for DynamicObject<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl PartialEq<SimpleValue> for DynamicObject<'_> {
    fn eq(&self, other: &SimpleValue) -> bool {
        self.eq_value(other)
    }
}

impl PartialEq<&str> for DynamicObject<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.eq_str(other)
    }
}

macro_rules! forward_conversion {
    ($($target:ty),+ $(,)?) => {
        $(
            impl TryFrom<&DynamicObject<'_>> for $target {
                type Error = Error;

                fn try_from(object: &DynamicObject<'_>) -> Result<Self> {
                    object.to::<$target>()
                }
            }
        )+
    };
}

forward_conversion!(
    bool,
    char,
    i8,
    u8,
    i16,
    u16,
    i32,
    u32,
    i64,
    u64,
    f32,
    f64,
    String,
    uguid::Guid,
    decoder::TimeSpan,
    decoder::Timestamp,
    std::net::IpAddr,
);

/// Lazy iterator over the elements or field values of an object.
///
/// Created by [`DynamicObject::iter`].
pub struct Children<'s> {
    object: DynamicObject<'s>,
    state: ChildState,
}

enum ChildState {
    Elements { next: usize, length: usize },
    Fields(std::vec::IntoIter<RuntimeField>),
    Done,
}

impl<'s> Iterator for Children<'s> {
    type Item = Result<DynamicObject<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            ChildState::Elements { next, length } => {
                if *next >= *length {
                    return None;
                }
                let index = *next as i64;
                *next += 1;
                Some(self.object.index(index))
            }
            ChildState::Fields(fields) => {
                let field = fields.next()?;
                Some(self.object.field_by_declaration(&field))
            }
            ChildState::Done => None,
        }
    }
}
