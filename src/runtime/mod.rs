//! The collaborator interface through which the inspector sees a target process or dump.
//!
//! Attaching to a process, opening a crash dump and resolving the runtime's data-access layer are
//! all outside of this crate. Whatever does that work exposes the target through two traits:
//!
//! - [`MemoryReader`] - raw byte and pointer reads at target addresses
//! - [`TypeCatalog`]  - runtime type resolution, heap enumeration and array layout
//!
//! [`MemorySnapshot`] implements both traits over in-memory byte regions. It is used to replay
//! captured heaps and as the backend for tests.
//!
//! # Object layout
//!
//! The provided methods of [`TypeCatalog`] assume the standard managed object layout:
//!
//! | Object   | Layout                                                                  |
//! |----------|-------------------------------------------------------------------------|
//! | Boxed    | `[type handle][fields...]`                                              |
//! | String   | `[type handle][u32 length][UTF-16 code units...]`                       |
//! | Array    | `[type handle][u32 length, padded to a pointer][elements...]`           |
//!
//! A catalog for a runtime with a different layout overrides the affected methods.

mod snapshot;
mod types;

pub use snapshot::MemorySnapshot;
pub use types::{
    ElementKind, RuntimeField, RuntimeType, RuntimeTypeRc, RuntimeTypeRef, TypeFlags,
    UNRESOLVED_TYPE_ID, UNRESOLVED_TYPE_NAME,
};

use crate::{
    memory::{read_le, read_pointer_le, HeapIO},
    Error, Result,
};

/// Raw memory access to the target.
pub trait MemoryReader: Send + Sync {
    /// Pointer width of the target in bytes (4 or 8)
    fn pointer_size(&self) -> usize;

    /// Read up to `length` bytes at `address`.
    ///
    /// May return fewer bytes than requested when the read runs into unmapped memory.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if nothing at `address` is readable.
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>>;

    /// Read exactly `length` bytes at `address`.
    ///
    /// # Errors
    /// Returns [`Error::ShortRead`] if the target delivered fewer bytes than requested; partial
    /// data is never returned.
    fn read_exact(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        let data = self.read_bytes(address, length)?;
        if data.len() != length {
            return Err(Error::ShortRead {
                address,
                expected: length,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Read a pointer-sized value at `address`.
    ///
    /// # Errors
    /// Returns an error if the read is short or the pointer size is unsupported.
    fn read_pointer(&self, address: u64) -> Result<u64> {
        let size = self.pointer_size();
        let data = self.read_exact(address, size)?;
        read_pointer_le(&data, size)
    }

    /// Read a little-endian primitive at `address`.
    ///
    /// # Errors
    /// Returns [`Error::ShortRead`] if the value could not be read completely.
    fn read_le<T: HeapIO>(&self, address: u64) -> Result<T>
    where
        Self: Sized,
    {
        let data = self.read_exact(address, std::mem::size_of::<T>())?;
        read_le(&data)
    }
}

/// Runtime type metadata and heap enumeration.
pub trait TypeCatalog: MemoryReader {
    /// Resolve the runtime type of the object at `address`.
    ///
    /// Never fails: memory that cannot be classified yields [`RuntimeType::unresolved`].
    fn type_at(&self, address: u64) -> RuntimeTypeRc;

    /// Addresses of every object on the managed heap, in heap order
    fn objects(&self) -> Box<dyn Iterator<Item = u64> + '_>;

    /// Every type known to the runtime
    fn types(&self) -> Vec<RuntimeTypeRc>;

    /// Find a type by its fully qualified runtime name
    fn type_by_name(&self, name: &str) -> Option<RuntimeTypeRc> {
        self.types().into_iter().find(|ty| ty.name == name)
    }

    /// Number of elements in the array at `address`.
    ///
    /// # Errors
    /// Returns [`Error::NotAnArray`] for non-array types, or a read error.
    fn array_length(&self, address: u64, ty: &RuntimeType) -> Result<usize> {
        if !ty.is_array() {
            return Err(Error::NotAnArray(ty.name.clone()));
        }

        let data = self.read_exact(address + self.pointer_size() as u64, 4)?;
        Ok(read_le::<u32>(&data)? as usize)
    }

    /// Address of element `index` of the array at `address`
    fn array_element_address(&self, address: u64, ty: &RuntimeType, index: usize) -> u64 {
        let header = 2 * self.pointer_size() as u64;
        address
            .wrapping_add(header)
            .wrapping_add((index as u64).wrapping_mul(ty.component_size as u64))
    }

    /// Size of the object at `address` in bytes.
    ///
    /// # Errors
    /// Returns a read error if the length of a string or array cannot be read.
    fn object_size(&self, address: u64, ty: &RuntimeType) -> Result<u64> {
        let pointer_size = self.pointer_size() as u64;
        if ty.is_array() {
            let length = self.array_length(address, ty)? as u64;
            return Ok(2 * pointer_size + length * ty.component_size as u64);
        }

        if ty.is_string() {
            let data = self.read_exact(address + pointer_size, 4)?;
            let length = u64::from(read_le::<u32>(&data)?);
            return Ok((pointer_size + 4 + 2 * (length + 1)).max(ty.base_size as u64));
        }

        Ok(ty.base_size as u64)
    }

    /// Non-null object references held by the object at `address`.
    ///
    /// Covers reference-typed fields, reference fields of embedded value types and
    /// reference-typed (or struct-typed) array elements.
    ///
    /// # Errors
    /// Returns a read error if a reference slot cannot be read.
    fn references_of(&self, address: u64, ty: &RuntimeType) -> Result<Vec<u64>> {
        let mut references = Vec::new();
        collect_references(self, address, ty, false, &mut references)?;
        Ok(references)
    }
}

fn collect_references<C: TypeCatalog + ?Sized>(
    catalog: &C,
    address: u64,
    ty: &RuntimeType,
    interior: bool,
    references: &mut Vec<u64>,
) -> Result<()> {
    if ty.is_unresolved() || ty.is_string() {
        return Ok(());
    }

    if ty.is_array() {
        let Some(component) = ty.component() else {
            return Ok(());
        };
        if !component.is_reference() && !component.is_value_class() {
            return Ok(());
        }

        let length = catalog.array_length(address, ty)?;
        for index in 0..length {
            let element = catalog.array_element_address(address, ty, index);
            collect_slot(catalog, element, &component, references)?;
        }
        return Ok(());
    }

    let pointer_size = catalog.pointer_size();
    for field in ty.fields() {
        let slot = field.address(address, interior, pointer_size);
        collect_slot(catalog, slot, &field.resolved_type(), references)?;
    }

    Ok(())
}

fn collect_slot<C: TypeCatalog + ?Sized>(
    catalog: &C,
    slot: u64,
    slot_type: &RuntimeType,
    references: &mut Vec<u64>,
) -> Result<()> {
    if slot_type.is_reference() {
        let target = catalog.read_pointer(slot)?;
        if target != 0 {
            references.push(target);
        }
    } else if slot_type.is_value_class() {
        collect_references(catalog, slot, slot_type, true, references)?;
    }

    Ok(())
}
