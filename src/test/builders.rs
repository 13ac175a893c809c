//! Builder for synthetic managed heaps.
//!
//! Types laid out by [`HeapBuilder`] give every field one pointer-sized slot, in declaration
//! order, after the fields of the base type. Value types are laid out the same way without a
//! header.

use std::sync::Arc;

use crate::{
    runtime::{ElementKind, MemorySnapshot, RuntimeType, RuntimeTypeRc, TypeFlags},
    session::HeapSession,
};

pub(crate) const POINTER_SIZE: usize = 8;

const FIRST_TYPE_ID: u64 = 0x7000;

pub(crate) struct HeapBuilder {
    pub heap: MemorySnapshot,
    next_id: u64,
    pub boolean: RuntimeTypeRc,
    pub char: RuntimeTypeRc,
    pub uint16: RuntimeTypeRc,
    pub int32: RuntimeTypeRc,
    pub int64: RuntimeTypeRc,
    pub double: RuntimeTypeRc,
    pub intptr: RuntimeTypeRc,
    pub string: RuntimeTypeRc,
    pub object: RuntimeTypeRc,
}

impl HeapBuilder {
    pub fn new() -> Self {
        let mut heap = MemorySnapshot::new(POINTER_SIZE);
        let mut next_id = FIRST_TYPE_ID;
        let mut primitive = |kind: ElementKind| {
            let ty = Arc::new(
                RuntimeType::primitive(next_id, kind).with_base_size(POINTER_SIZE + kind.size(8)),
            );
            next_id += 0x10;
            heap.register_type(&ty);
            ty
        };

        let boolean = primitive(ElementKind::Boolean);
        let char = primitive(ElementKind::Char);
        let uint16 = primitive(ElementKind::U2);
        let int32 = primitive(ElementKind::I4);
        let int64 = primitive(ElementKind::I8);
        let double = primitive(ElementKind::R8);
        let intptr = primitive(ElementKind::I);

        let string = Arc::new(
            RuntimeType::new(next_id, "System.String")
                .with_flags(TypeFlags::STRING | TypeFlags::OBJECT_REFERENCE | TypeFlags::SEALED)
                .with_base_size(POINTER_SIZE + 6),
        );
        next_id += 0x10;
        heap.register_type(&string);

        let object = Arc::new(
            RuntimeType::new(next_id, "System.Object")
                .with_flags(TypeFlags::OBJECT_REFERENCE)
                .with_base_size(POINTER_SIZE),
        );
        next_id += 0x10;
        heap.register_type(&object);

        HeapBuilder {
            heap,
            next_id,
            boolean,
            char,
            uint16,
            int32,
            int64,
            double,
            intptr,
            string,
            object,
        }
    }

    pub fn session(&self) -> HeapSession {
        HeapSession::new(self.heap.clone())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 0x10;
        id
    }

    fn register(&mut self, ty: RuntimeType) -> RuntimeTypeRc {
        let ty = Arc::new(ty);
        self.heap.register_type(&ty);
        ty
    }

    /// A reference type deriving from `base` (or `System.Object`)
    pub fn class(
        &mut self,
        name: &str,
        base: Option<&RuntimeTypeRc>,
        fields: &[(&str, &RuntimeTypeRc)],
    ) -> RuntimeTypeRc {
        let base = base.unwrap_or(&self.object).clone();
        let first = base.base_size - POINTER_SIZE;
        let id = self.next_id();
        let ty = self.register(
            RuntimeType::new(id, name)
                .with_module("Shop.dll")
                .with_flags(TypeFlags::OBJECT_REFERENCE)
                .with_base_size(base.base_size + fields.len() * POINTER_SIZE),
        );
        ty.set_base(&base);
        for (index, (field, field_type)) in fields.iter().enumerate() {
            ty.add_field(*field, field_type, first + index * POINTER_SIZE);
        }
        ty
    }

    /// A class that cannot be subclassed
    pub fn sealed_class(&mut self, name: &str, fields: &[(&str, &RuntimeTypeRc)]) -> RuntimeTypeRc {
        let id = self.next_id();
        let ty = self.register(
            RuntimeType::new(id, name)
                .with_module("Shop.dll")
                .with_flags(TypeFlags::OBJECT_REFERENCE | TypeFlags::SEALED)
                .with_base_size(POINTER_SIZE + fields.len() * POINTER_SIZE),
        );
        ty.set_base(&self.object);
        for (index, (field, field_type)) in fields.iter().enumerate() {
            ty.add_field(*field, field_type, index * POINTER_SIZE);
        }
        ty
    }

    /// A value type
    pub fn value_type(&mut self, name: &str, fields: &[(&str, &RuntimeTypeRc)]) -> RuntimeTypeRc {
        let id = self.next_id();
        let ty = self.register(
            RuntimeType::new(id, name)
                .with_module("Shop.dll")
                .with_flags(TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
                .with_base_size(fields.len() * POINTER_SIZE),
        );
        for (index, (field, field_type)) in fields.iter().enumerate() {
            ty.add_field(*field, field_type, index * POINTER_SIZE);
        }
        ty
    }

    /// An `int`-backed enum
    pub fn enum_type(&mut self, name: &str, members: &[(&str, i64)]) -> RuntimeTypeRc {
        let id = self.next_id();
        let mut ty = RuntimeType::new(id, name)
            .with_module("Shop.dll")
            .with_flags(
                TypeFlags::ENUM | TypeFlags::PRIMITIVE | TypeFlags::VALUE_TYPE | TypeFlags::SEALED,
            )
            .with_element_kind(ElementKind::I4)
            .with_base_size(POINTER_SIZE + 4);
        for (member, value) in members {
            ty = ty.with_enum_member(*member, *value);
        }
        self.register(ty)
    }

    /// A single-dimensional array of `component`
    pub fn array_type(&mut self, component: &RuntimeTypeRc) -> RuntimeTypeRc {
        let component_size = if component.is_reference() {
            POINTER_SIZE
        } else if let Some(kind) = component.element_kind {
            kind.size(POINTER_SIZE)
        } else {
            component.base_size
        };

        let id = self.next_id();
        let ty = self.register(
            RuntimeType::new(id, format!("{}[]", component.name))
                .with_flags(TypeFlags::ARRAY | TypeFlags::OBJECT_REFERENCE | TypeFlags::SEALED)
                .with_component_size(component_size),
        );
        ty.set_component(component);
        ty
    }

    pub fn new_object(&mut self, ty: &RuntimeTypeRc) -> u64 {
        self.heap
            .alloc_object(ty, ty.base_size)
            .expect("object allocation")
    }

    pub fn new_string(&mut self, text: &str) -> u64 {
        let units: Vec<u16> = text.encode_utf16().collect();
        let size = POINTER_SIZE + 4 + 2 * (units.len() + 1);
        let string = self.string.clone();
        let address = self
            .heap
            .alloc_object(&string, size)
            .expect("string allocation");

        let length = u32::try_from(units.len()).expect("string length");
        self.write(address + POINTER_SIZE as u64, &length.to_le_bytes());
        let bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        self.write(address + POINTER_SIZE as u64 + 4, &bytes);
        address
    }

    pub fn new_array(&mut self, ty: &RuntimeTypeRc, length: usize) -> u64 {
        let size = 2 * POINTER_SIZE + length * ty.component_size;
        let address = self.heap.alloc_object(ty, size).expect("array allocation");
        let length = u32::try_from(length).expect("array length");
        self.write(address + POINTER_SIZE as u64, &length.to_le_bytes());
        address
    }

    pub fn write(&mut self, address: u64, data: &[u8]) {
        self.heap.write(address, data).expect("write to mapped memory");
    }

    /// Address of `field` inside an object or, with `interior`, inside an inline value
    pub fn field_address(&self, container: u64, ty: &RuntimeType, field: &str, interior: bool) -> u64 {
        ty.field_by_name(field)
            .unwrap_or_else(|| panic!("{} has no field {field}", ty.name))
            .address(container, interior, POINTER_SIZE)
    }

    pub fn set(&mut self, object: u64, ty: &RuntimeType, field: &str, data: &[u8]) {
        let address = self.field_address(object, ty, field, false);
        self.write(address, data);
    }

    pub fn set_i32(&mut self, object: u64, ty: &RuntimeType, field: &str, value: i32) {
        self.set(object, ty, field, &value.to_le_bytes());
    }

    pub fn set_i64(&mut self, object: u64, ty: &RuntimeType, field: &str, value: i64) {
        self.set(object, ty, field, &value.to_le_bytes());
    }

    pub fn set_ref(&mut self, object: u64, ty: &RuntimeType, field: &str, target: u64) {
        self.set(object, ty, field, &target.to_le_bytes());
    }

    pub fn element_address(&self, array: u64, ty: &RuntimeType, index: usize) -> u64 {
        array + 2 * POINTER_SIZE as u64 + (index * ty.component_size) as u64
    }

    pub fn set_element(&mut self, array: u64, ty: &RuntimeType, index: usize, data: &[u8]) {
        let address = self.element_address(array, ty, index);
        self.write(address, data);
    }

    pub fn set_element_ref(&mut self, array: u64, ty: &RuntimeType, index: usize, target: u64) {
        self.set_element(array, ty, index, &target.to_le_bytes());
    }
}
