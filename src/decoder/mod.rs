//! Decoding of simple values.
//!
//! A type is *simple* when its whole content reduces to one [`SimpleValue`]: primitives, enums,
//! strings and a fixed set of well-known framework structs and classes. Primitives are read by
//! their [`ElementKind`]; everything else dispatches through a table of handlers keyed by the
//! runtime type name.
//!
//! Every handler receives the address of the value's first data byte, which is the object
//! address plus one pointer for boxed objects, and the object address itself for values
//! embedded inline in a container. Reads that come back short are always errors.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::decoder::{DateTimeKind, TimeSpan, Timestamp, TICKS_PER_SECOND};
//!
//! let span = TimeSpan::from_ticks(90 * TICKS_PER_SECOND);
//! assert_eq!(span.to_string(), "00:01:30");
//!
//! let stamp = Timestamp::new(0, DateTimeKind::Utc);
//! assert_eq!(stamp.to_string(), "0001-01-01 00:00:00 (Utc)");
//! ```

use std::{collections::HashMap, sync::LazyLock};

use uguid::Guid;
use widestring::U16String;

use crate::{
    memory::{read_le, read_pointer_le, HeapIO},
    objects::{DynamicObject, SimpleValue},
    runtime::{ElementKind, RuntimeType, TypeCatalog},
    Error, Result,
};

mod certificate;
mod net;
mod timestamp;

pub use certificate::Certificate;
pub use net::{ipv4_from_stored, ipv4_to_stored, DnsEndPoint, AF_INET, AF_INET6, AF_UNSPECIFIED};
pub use timestamp::{DateTimeKind, TimeSpan, Timestamp, MAX_TICKS, TICKS_PER_SECOND};

/// Runtime name of `System.String`
pub const STRING_TYPE: &str = "System.String";
/// Runtime name of `System.Guid`
pub const GUID_TYPE: &str = "System.Guid";
/// Runtime name of `System.TimeSpan`
pub const TIMESPAN_TYPE: &str = "System.TimeSpan";
/// Runtime name of `System.DateTime`
pub const DATETIME_TYPE: &str = "System.DateTime";
/// Runtime name of `System.Net.IPAddress`
pub const IP_ADDRESS_TYPE: &str = "System.Net.IPAddress";
/// Runtime name of `System.Net.IPEndPoint`
pub const IP_ENDPOINT_TYPE: &str = "System.Net.IPEndPoint";
/// Runtime name of `System.Net.DnsEndPoint`
pub const DNS_ENDPOINT_TYPE: &str = "System.Net.DnsEndPoint";
/// Runtime name of `X509Certificate`
pub const CERTIFICATE_TYPE: &str = "System.Security.Cryptography.X509Certificates.X509Certificate";
/// Runtime name of `X509Certificate2`
pub const CERTIFICATE2_TYPE: &str =
    "System.Security.Cryptography.X509Certificates.X509Certificate2";

/// Longest string, in UTF-16 code units, that is decoded before the length is deemed corrupt
const MAX_STRING_LENGTH: usize = 64 * 1024 * 1024;

/// Decodes the value of `object` whose data starts at the given address
type Handler = fn(&DynamicObject<'_>, u64) -> Result<SimpleValue>;

static HANDLERS: LazyLock<HashMap<&'static str, Handler>> = LazyLock::new(|| {
    let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
    handlers.insert(STRING_TYPE, decode_string);
    handlers.insert(GUID_TYPE, decode_guid);
    handlers.insert(TIMESPAN_TYPE, decode_timespan);
    handlers.insert(DATETIME_TYPE, decode_datetime);
    handlers.insert(IP_ADDRESS_TYPE, net::decode_ip_address);
    handlers.insert(IP_ENDPOINT_TYPE, net::decode_ip_endpoint);
    handlers.insert(DNS_ENDPOINT_TYPE, net::decode_dns_endpoint);
    handlers.insert(CERTIFICATE_TYPE, certificate::decode_certificate);
    handlers.insert(CERTIFICATE2_TYPE, certificate::decode_certificate);
    handlers
});

/// Returns true if values of `ty` decode to a single [`SimpleValue`]
#[must_use]
pub fn is_simple_type(ty: &RuntimeType) -> bool {
    ty.is_primitive() || ty.is_enum() || ty.is_string() || has_handler(&ty.name)
}

/// Returns true if a handler is registered for the runtime type name
#[must_use]
pub fn has_handler(type_name: &str) -> bool {
    HANDLERS.contains_key(type_name)
}

/// Decode the value of a simple object.
///
/// # Errors
/// Returns [`Error::NotSimpleValue`] for complex types, or the read error of the underlying
/// memory access.
pub(crate) fn decode(object: &DynamicObject<'_>) -> Result<SimpleValue> {
    if object.is_null() {
        return Ok(SimpleValue::Null);
    }

    let ty = object.runtime_type();
    let catalog = object.catalog();
    let pointer_size = catalog.pointer_size() as u64;

    // Primitives are always addressed as if boxed, inline ones included
    if ty.is_primitive() || ty.is_enum() {
        return decode_primitive(catalog, object.address().wrapping_add(pointer_size), ty);
    }

    let data = if object.is_interior() {
        object.address()
    } else {
        object.address().wrapping_add(pointer_size)
    };

    match HANDLERS.get(ty.name.as_str()) {
        Some(handler) => handler(object, data),
        None => Err(Error::NotSimpleValue(ty.name.clone())),
    }
}

/// Decode the primitive or enum stored at `address`.
///
/// ## Arguments
/// * 'catalog' - Memory of the target
/// * 'address' - First byte of the value
/// * 'ty'      - A primitive or enum type carrying an [`ElementKind`]
///
/// # Errors
/// Returns [`Error::ShortRead`] if the value is not fully readable, or
/// [`Error::Malformed`] if `ty` has no element kind.
pub fn decode_primitive(
    catalog: &dyn TypeCatalog,
    address: u64,
    ty: &RuntimeType,
) -> Result<SimpleValue> {
    let Some(kind) = ty.element_kind else {
        return Err(malformed_error!(
            "Primitive type '{}' has no element kind",
            ty.name
        ));
    };

    let pointer_size = catalog.pointer_size();
    let data = catalog.read_exact(address, kind.size(pointer_size))?;
    let value = match kind {
        ElementKind::Boolean => SimpleValue::Boolean(read_le::<u8>(&data)? != 0),
        ElementKind::Char => {
            let unit = read_le::<u16>(&data)?;
            SimpleValue::Char(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER))
        }
        ElementKind::I1 => SimpleValue::SByte(read_le(&data)?),
        ElementKind::U1 => SimpleValue::Byte(read_le(&data)?),
        ElementKind::I2 => SimpleValue::Int16(read_le(&data)?),
        ElementKind::U2 => SimpleValue::UInt16(read_le(&data)?),
        ElementKind::I4 => SimpleValue::Int32(read_le(&data)?),
        ElementKind::U4 => SimpleValue::UInt32(read_le(&data)?),
        ElementKind::I8 => SimpleValue::Int64(read_le(&data)?),
        ElementKind::U8 => SimpleValue::UInt64(read_le(&data)?),
        ElementKind::R4 => SimpleValue::Single(read_le(&data)?),
        ElementKind::R8 => SimpleValue::Double(read_le(&data)?),
        ElementKind::I => SimpleValue::IntPtr(if pointer_size == 4 {
            i64::from(read_le::<i32>(&data)?)
        } else {
            read_le::<i64>(&data)?
        }),
        ElementKind::U => SimpleValue::UIntPtr(read_pointer_le(&data, pointer_size)?),
    };

    if !ty.is_enum() {
        return Ok(value);
    }

    let raw = value
        .as_integer()
        .and_then(|raw| i64::try_from(raw).ok())
        .ok_or_else(|| {
            malformed_error!(
                "Enum '{}' is backed by non-integral value {}",
                ty.name,
                value
            )
        })?;

    Ok(SimpleValue::Enum {
        value: raw,
        name: ty.enum_name(raw).map(str::to_string),
    })
}

/// Read a little-endian value of type `T` at `address`
pub(crate) fn read_value<T: HeapIO>(catalog: &dyn TypeCatalog, address: u64) -> Result<T> {
    let data = catalog.read_exact(address, std::mem::size_of::<T>())?;
    read_le(&data)
}

/// Read the UTF-16 string whose length prefix is at `address`
pub(crate) fn read_string(catalog: &dyn TypeCatalog, address: u64) -> Result<String> {
    let length = read_value::<u32>(catalog, address)? as usize;
    if length > MAX_STRING_LENGTH {
        return Err(malformed_error!(
            "String at 0x{:X} claims {} characters",
            address,
            length
        ));
    }

    let data = catalog.read_exact(address.wrapping_add(4), length * 2)?;
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(U16String::from_vec(units).to_string_lossy())
}

fn decode_string(object: &DynamicObject<'_>, address: u64) -> Result<SimpleValue> {
    Ok(SimpleValue::String(read_string(object.catalog(), address)?))
}

fn decode_guid(object: &DynamicObject<'_>, address: u64) -> Result<SimpleValue> {
    let data = object.catalog().read_exact(address, 16)?;
    let bytes: [u8; 16] = data.as_slice().try_into().map_err(|_| Error::ShortRead {
        address,
        expected: 16,
        actual: data.len(),
    })?;

    Ok(SimpleValue::Guid(Guid::from_bytes(bytes)))
}

fn decode_timespan(object: &DynamicObject<'_>, address: u64) -> Result<SimpleValue> {
    let ticks = read_value::<i64>(object.catalog(), address)?;
    Ok(SimpleValue::TimeSpan(TimeSpan::from_ticks(ticks)))
}

fn decode_datetime(object: &DynamicObject<'_>, address: u64) -> Result<SimpleValue> {
    let raw = read_value::<u64>(object.catalog(), address)?;
    Ok(SimpleValue::Timestamp(Timestamp::from_raw(raw)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::{MemorySnapshot, TypeFlags};

    #[test]
    fn handler_table_covers_well_known_types() {
        for name in [
            STRING_TYPE,
            GUID_TYPE,
            TIMESPAN_TYPE,
            DATETIME_TYPE,
            IP_ADDRESS_TYPE,
            IP_ENDPOINT_TYPE,
            DNS_ENDPOINT_TYPE,
            CERTIFICATE_TYPE,
            CERTIFICATE2_TYPE,
        ] {
            assert!(has_handler(name), "{name}");
        }
        assert!(!has_handler("System.Object"));
    }

    #[test]
    fn primitives_by_kind() {
        let mut heap = MemorySnapshot::new(8);
        heap.map_region(0x1000, vec![0; 0x40]).unwrap();
        heap.write(0x1000, &(-2_i16).to_le_bytes()).unwrap();
        heap.write(0x1008, &1.5_f64.to_le_bytes()).unwrap();
        heap.write(0x1010, &u16::from(b'Z').to_le_bytes()).unwrap();
        heap.write(0x1018, &(-1_i64).to_le_bytes()).unwrap();

        let int16 = RuntimeType::primitive(1, ElementKind::I2);
        let double = RuntimeType::primitive(2, ElementKind::R8);
        let chr = RuntimeType::primitive(3, ElementKind::Char);
        let native = RuntimeType::primitive(4, ElementKind::I);

        assert_eq!(
            decode_primitive(&heap, 0x1000, &int16).unwrap(),
            SimpleValue::Int16(-2)
        );
        assert_eq!(
            decode_primitive(&heap, 0x1008, &double).unwrap(),
            SimpleValue::Double(1.5)
        );
        assert_eq!(
            decode_primitive(&heap, 0x1010, &chr).unwrap(),
            SimpleValue::Char('Z')
        );
        assert_eq!(
            decode_primitive(&heap, 0x1018, &native).unwrap(),
            SimpleValue::IntPtr(-1)
        );
    }

    #[test]
    fn enum_members_resolve() {
        let mut heap = MemorySnapshot::new(8);
        heap.map_region(0x1000, vec![0; 8]).unwrap();
        heap.write(0x1000, &2_i32.to_le_bytes()).unwrap();

        let color = Arc::new(
            RuntimeType::new(9, "Demo.Color")
                .with_flags(TypeFlags::ENUM | TypeFlags::PRIMITIVE | TypeFlags::SEALED)
                .with_element_kind(ElementKind::I4)
                .with_enum_member("Red", 1)
                .with_enum_member("Blue", 2),
        );

        assert_eq!(
            decode_primitive(&heap, 0x1000, &color).unwrap(),
            SimpleValue::Enum {
                value: 2,
                name: Some("Blue".to_string())
            }
        );

        heap.write(0x1000, &7_i32.to_le_bytes()).unwrap();
        assert_eq!(
            decode_primitive(&heap, 0x1000, &color).unwrap().to_string(),
            "7"
        );
    }

    #[test]
    fn short_primitive_read_fails() {
        let mut heap = MemorySnapshot::new(8);
        heap.map_region(0x1000, vec![0; 2]).unwrap();
        let int32 = RuntimeType::primitive(1, ElementKind::I4);

        assert!(matches!(
            decode_primitive(&heap, 0x1000, &int32),
            Err(Error::ShortRead {
                expected: 4,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn string_length_is_bounded() {
        let mut heap = MemorySnapshot::new(8);
        heap.map_region(0x1000, vec![0; 16]).unwrap();
        heap.write(0x1000, &u32::MAX.to_le_bytes()).unwrap();

        assert!(matches!(
            read_string(&heap, 0x1000),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn utf16_strings() {
        let mut heap = MemorySnapshot::new(8);
        heap.map_region(0x1000, vec![0; 32]).unwrap();
        heap.write(0x1000, &3_u32.to_le_bytes()).unwrap();
        let text: Vec<u8> = "h\u{e9}!"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        heap.write(0x1004, &text).unwrap();

        assert_eq!(read_string(&heap, 0x1000).unwrap(), "h\u{e9}!");
    }
}
