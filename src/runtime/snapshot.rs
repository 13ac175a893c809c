//! In-memory heap snapshot implementing the collaborator traits.
//!
//! [`MemorySnapshot`] holds a set of non-overlapping byte regions keyed by their base address, a
//! table of runtime types keyed by their type handle, and the ordered list of object addresses
//! that make up the managed heap. The first pointer-sized word of every object is its type
//! handle, which is the `id` of a registered [`RuntimeType`].
//!
//! Regions are looked up by base address; reads may span adjacent regions but stop at the first
//! unmapped byte, which the caller observes as a short read.

use std::collections::{BTreeMap, HashMap};

use crate::{
    runtime::{MemoryReader, RuntimeType, RuntimeTypeRc, TypeCatalog},
    Error, Result,
};

/// Base of the bump allocator used by [`MemorySnapshot::alloc`]
const ALLOC_BASE: u64 = 0x0200_0000;

/// An in-memory managed heap.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use heapscope::runtime::{MemoryReader, MemorySnapshot, RuntimeType, TypeCatalog, TypeFlags};
///
/// let mut heap = MemorySnapshot::new(8);
/// let node = Arc::new(
///     RuntimeType::new(0x7000, "Demo.Node")
///         .with_flags(TypeFlags::OBJECT_REFERENCE)
///         .with_base_size(24),
/// );
/// heap.register_type(&node);
///
/// let address = heap.alloc_object(&node, 24)?;
/// assert_eq!(heap.type_at(address).name, "Demo.Node");
/// assert_eq!(heap.objects().count(), 1);
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct MemorySnapshot {
    pointer_size: usize,
    regions: BTreeMap<u64, Vec<u8>>,
    types: HashMap<u64, RuntimeTypeRc>,
    type_order: Vec<u64>,
    objects: Vec<u64>,
    next_alloc: u64,
}

impl MemorySnapshot {
    /// Create an empty snapshot
    ///
    /// ## Arguments
    /// * 'pointer_size' - Pointer width of the captured process (4 or 8)
    #[must_use]
    pub fn new(pointer_size: usize) -> Self {
        MemorySnapshot {
            pointer_size,
            regions: BTreeMap::new(),
            types: HashMap::new(),
            type_order: Vec::new(),
            objects: Vec::new(),
            next_alloc: ALLOC_BASE,
        }
    }

    /// Register a runtime type under its `id`, which doubles as its type handle
    pub fn register_type(&mut self, ty: &RuntimeTypeRc) {
        if self.types.insert(ty.id, ty.clone()).is_none() {
            self.type_order.push(ty.id);
        }
    }

    /// Map a region of memory at `base`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the region overlaps an existing one.
    pub fn map_region(&mut self, base: u64, data: Vec<u8>) -> Result<()> {
        let end = base
            .checked_add(data.len() as u64)
            .ok_or_else(|| malformed_error!("Region at 0x{:X} overflows the address space", base))?;

        if let Some((&prev_base, prev)) = self.regions.range(..end).next_back() {
            if prev_base + prev.len() as u64 > base {
                return Err(malformed_error!(
                    "Region 0x{:X}..0x{:X} overlaps region at 0x{:X}",
                    base,
                    end,
                    prev_base
                ));
            }
        }

        self.regions.insert(base, data);
        Ok(())
    }

    /// Allocate and map a zeroed region of `size` bytes, returning its base address.
    ///
    /// Allocations are pointer-aligned and separated by a guard gap of one pointer.
    ///
    /// # Errors
    /// Returns an error if the allocation would overlap a manually mapped region.
    pub fn alloc(&mut self, size: usize) -> Result<u64> {
        let align = self.pointer_size as u64;
        let address = self.next_alloc;
        let rounded = (size as u64).div_ceil(align) * align;

        self.map_region(address, vec![0; size])?;
        self.next_alloc = address + rounded + align;
        Ok(address)
    }

    /// Allocate an object of `ty`, write its type handle and add it to the heap.
    ///
    /// # Errors
    /// Returns an error if `size` cannot hold the type handle or the allocation fails.
    pub fn alloc_object(&mut self, ty: &RuntimeType, size: usize) -> Result<u64> {
        if size < self.pointer_size {
            return Err(malformed_error!(
                "Object of {} bytes cannot hold a type handle",
                size
            ));
        }

        let address = self.alloc(size)?;
        self.write_pointer(address, ty.id)?;
        self.objects.push(address);
        Ok(address)
    }

    /// Add an already written object to the heap enumeration
    pub fn add_object(&mut self, address: u64) {
        self.objects.push(address);
    }

    /// Overwrite mapped memory.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if the write does not fit inside a single region.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let Some((&base, region)) = self.regions.range_mut(..=address).next_back() else {
            return Err(Error::InvalidAddress(address));
        };

        let offset = (address - base) as usize;
        let Some(end) = offset.checked_add(data.len()) else {
            return Err(Error::InvalidAddress(address));
        };
        if end > region.len() {
            return Err(Error::InvalidAddress(address));
        }

        region[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Write a pointer-sized value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if the target is not mapped.
    pub fn write_pointer(&mut self, address: u64, value: u64) -> Result<()> {
        if self.pointer_size == 4 {
            #[allow(clippy::cast_possible_truncation)]
            let narrow = value as u32;
            self.write(address, &narrow.to_le_bytes())
        } else {
            self.write(address, &value.to_le_bytes())
        }
    }

    /// Number of mapped regions
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn find_region(&self, address: u64) -> Option<(&[u8], usize)> {
        let (&base, region) = self.regions.range(..=address).next_back()?;
        let offset = usize::try_from(address - base).ok()?;
        if offset < region.len() {
            Some((region.as_slice(), offset))
        } else {
            None
        }
    }
}

impl MemoryReader for MemorySnapshot {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let Some((region, offset)) = self.find_region(address) else {
            return Err(Error::InvalidAddress(address));
        };

        let available = region.len() - offset;
        let mut data = Vec::with_capacity(length);
        data.extend_from_slice(&region[offset..offset + available.min(length)]);

        while data.len() < length {
            let next = address + data.len() as u64;
            match self.find_region(next) {
                Some((region, 0)) => {
                    let take = region.len().min(length - data.len());
                    data.extend_from_slice(&region[..take]);
                }
                _ => break,
            }
        }

        Ok(data)
    }
}

impl TypeCatalog for MemorySnapshot {
    fn type_at(&self, address: u64) -> RuntimeTypeRc {
        if address == 0 {
            return RuntimeType::unresolved();
        }

        match self.read_pointer(address) {
            Ok(handle) => self
                .types
                .get(&handle)
                .cloned()
                .unwrap_or_else(RuntimeType::unresolved),
            Err(_) => RuntimeType::unresolved(),
        }
    }

    fn objects(&self) -> Box<dyn Iterator<Item = u64> + '_> {
        Box::new(self.objects.iter().copied())
    }

    fn types(&self) -> Vec<RuntimeTypeRc> {
        self.type_order
            .iter()
            .filter_map(|id| self.types.get(id).cloned())
            .collect()
    }

    fn type_by_name(&self, name: &str) -> Option<RuntimeTypeRc> {
        self.type_order
            .iter()
            .filter_map(|id| self.types.get(id))
            .find(|ty| ty.name == name)
            .cloned()
    }
}
