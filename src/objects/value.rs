//! Decoded leaf values.
//!
//! [`SimpleValue`] is the closed set of values a heap object can be reduced to without further
//! navigation. Conversions into native types go through [`TryFrom`] and are strict: the only
//! implicit widening is from an enum to an integer type that can hold its value, and from an
//! enum to its symbolic name.

use std::{
    cmp::Ordering,
    fmt,
    net::{IpAddr, SocketAddr},
};

use uguid::Guid;

use crate::{
    decoder::{Certificate, DnsEndPoint, TimeSpan, Timestamp},
    Error, Result,
};

/// A fully decoded value.
#[derive(Clone, Debug, PartialEq)]
pub enum SimpleValue {
    /// Null reference
    Null,
    /// `System.Boolean`
    Boolean(bool),
    /// `System.Char`; unpaired surrogates decode to U+FFFD
    Char(char),
    /// `System.SByte`
    SByte(i8),
    /// `System.Byte`
    Byte(u8),
    /// `System.Int16`
    Int16(i16),
    /// `System.UInt16`
    UInt16(u16),
    /// `System.Int32`
    Int32(i32),
    /// `System.UInt32`
    UInt32(u32),
    /// `System.Int64`
    Int64(i64),
    /// `System.UInt64`
    UInt64(u64),
    /// `System.Single`
    Single(f32),
    /// `System.Double`
    Double(f64),
    /// `System.IntPtr`, sign-extended
    IntPtr(i64),
    /// `System.UIntPtr`
    UIntPtr(u64),
    /// An enum value with its symbolic member name, if the value names one
    Enum {
        /// Integer value of the backing field
        value: i64,
        /// Matching member name
        name: Option<String>,
    },
    /// `System.String`
    String(String),
    /// `System.Guid`
    Guid(Guid),
    /// `System.TimeSpan`
    TimeSpan(TimeSpan),
    /// `System.DateTime`
    Timestamp(Timestamp),
    /// `System.Net.IPAddress`
    IpAddress(IpAddr),
    /// `System.Net.IPEndPoint`
    IpEndPoint(SocketAddr),
    /// `System.Net.DnsEndPoint`
    DnsEndPoint(DnsEndPoint),
    /// `X509Certificate` / `X509Certificate2`
    Certificate(Certificate),
}

impl SimpleValue {
    /// Short name of the value kind, used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            SimpleValue::Null => "null",
            SimpleValue::Boolean(_) => "bool",
            SimpleValue::Char(_) => "char",
            SimpleValue::SByte(_) => "sbyte",
            SimpleValue::Byte(_) => "byte",
            SimpleValue::Int16(_) => "short",
            SimpleValue::UInt16(_) => "ushort",
            SimpleValue::Int32(_) => "int",
            SimpleValue::UInt32(_) => "uint",
            SimpleValue::Int64(_) => "long",
            SimpleValue::UInt64(_) => "ulong",
            SimpleValue::Single(_) => "float",
            SimpleValue::Double(_) => "double",
            SimpleValue::IntPtr(_) => "nint",
            SimpleValue::UIntPtr(_) => "nuint",
            SimpleValue::Enum { .. } => "enum",
            SimpleValue::String(_) => "string",
            SimpleValue::Guid(_) => "Guid",
            SimpleValue::TimeSpan(_) => "TimeSpan",
            SimpleValue::Timestamp(_) => "DateTime",
            SimpleValue::IpAddress(_) => "IPAddress",
            SimpleValue::IpEndPoint(_) => "IPEndPoint",
            SimpleValue::DnsEndPoint(_) => "DnsEndPoint",
            SimpleValue::Certificate(_) => "X509Certificate",
        }
    }

    /// Returns true for [`SimpleValue::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SimpleValue::Null)
    }

    /// The value as a wide integer, for every integral kind and enums
    #[must_use]
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            SimpleValue::SByte(v) => i128::from(v),
            SimpleValue::Byte(v) => i128::from(v),
            SimpleValue::Int16(v) => i128::from(v),
            SimpleValue::UInt16(v) => i128::from(v),
            SimpleValue::Int32(v) => i128::from(v),
            SimpleValue::UInt32(v) => i128::from(v),
            SimpleValue::Int64(v) | SimpleValue::IntPtr(v) => i128::from(v),
            SimpleValue::UInt64(v) | SimpleValue::UIntPtr(v) => i128::from(v),
            SimpleValue::Enum { value, .. } => i128::from(value),
            _ => return None,
        })
    }

    /// The value as a float, for every numeric kind
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            SimpleValue::Single(v) => Some(f64::from(v)),
            SimpleValue::Double(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }

    /// Order two values.
    ///
    /// Numbers compare numerically across kinds, an enum compares with a string by its member
    /// name, and null orders before everything else. Values of unrelated kinds are unordered.
    #[must_use]
    pub fn compare(&self, other: &SimpleValue) -> Option<Ordering> {
        use SimpleValue as V;

        match (self, other) {
            (V::Null, V::Null) => Some(Ordering::Equal),
            (V::Null, _) => Some(Ordering::Less),
            (_, V::Null) => Some(Ordering::Greater),
            (V::Enum { name: Some(name), .. }, V::String(text)) => {
                Some(name.as_str().cmp(text.as_str()))
            }
            (V::String(text), V::Enum { name: Some(name), .. }) => {
                Some(text.as_str().cmp(name.as_str()))
            }
            (V::String(a), V::String(b)) => Some(a.cmp(b)),
            (V::Boolean(a), V::Boolean(b)) => Some(a.cmp(b)),
            (V::Char(a), V::Char(b)) => Some(a.cmp(b)),
            (V::Guid(a), V::Guid(b)) => Some(a.to_bytes().cmp(&b.to_bytes())),
            (V::TimeSpan(a), V::TimeSpan(b)) => Some(a.cmp(b)),
            (V::Timestamp(a), V::Timestamp(b)) => Some(a.ticks().cmp(&b.ticks())),
            (V::IpAddress(a), V::IpAddress(b)) => Some(a.cmp(b)),
            (V::IpEndPoint(a), V::IpEndPoint(b)) => Some(a.cmp(b)),
            (V::DnsEndPoint(a), V::DnsEndPoint(b)) => Some(a.to_string().cmp(&b.to_string())),
            (V::Certificate(a), V::Certificate(b)) => Some(a.thumbprint().cmp(b.thumbprint())),
            _ => {
                if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
                    return Some(a.cmp(&b));
                }
                let (a, b) = (self.as_float()?, other.as_float()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Equality under [`SimpleValue::compare`]
    #[must_use]
    pub fn equivalent(&self, other: &SimpleValue) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            actual: format!("{} '{}'", self.kind_name(), self),
        }
    }
}

impl fmt::Display for SimpleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimpleValue::Null => f.write_str("{null}"),
            SimpleValue::Boolean(v) => f.write_str(if *v { "True" } else { "False" }),
            SimpleValue::Char(v) => write!(f, "{v}"),
            SimpleValue::SByte(v) => write!(f, "{v}"),
            SimpleValue::Byte(v) => write!(f, "{v}"),
            SimpleValue::Int16(v) => write!(f, "{v}"),
            SimpleValue::UInt16(v) => write!(f, "{v}"),
            SimpleValue::Int32(v) => write!(f, "{v}"),
            SimpleValue::UInt32(v) => write!(f, "{v}"),
            SimpleValue::Int64(v) | SimpleValue::IntPtr(v) => write!(f, "{v}"),
            SimpleValue::UInt64(v) | SimpleValue::UIntPtr(v) => write!(f, "{v}"),
            SimpleValue::Single(v) => write!(f, "{v}"),
            SimpleValue::Double(v) => write!(f, "{v}"),
            SimpleValue::Enum {
                name: Some(name), ..
            } => f.write_str(name),
            SimpleValue::Enum { value, name: None } => write!(f, "{value}"),
            SimpleValue::String(v) => f.write_str(v),
            SimpleValue::Guid(v) => write!(f, "{v}"),
            SimpleValue::TimeSpan(v) => write!(f, "{v}"),
            SimpleValue::Timestamp(v) => write!(f, "{v}"),
            SimpleValue::IpAddress(v) => write!(f, "{v}"),
            SimpleValue::IpEndPoint(v) => write!(f, "{v}"),
            SimpleValue::DnsEndPoint(v) => write!(f, "{v}"),
            SimpleValue::Certificate(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! integer_conversion {
    ($target:ty, $expected:literal, $($variant:ident),+) => {
        impl TryFrom<SimpleValue> for $target {
            type Error = Error;

            fn try_from(value: SimpleValue) -> Result<Self> {
                match &value {
                    $(SimpleValue::$variant(v) => Ok(*v),)+
                    SimpleValue::Enum { value: raw, .. } => {
                        <$target>::try_from(*raw).map_err(|_| value.mismatch($expected))
                    }
                    _ => Err(value.mismatch($expected)),
                }
            }
        }
    };
}

integer_conversion!(i8, "sbyte", SByte);
integer_conversion!(u8, "byte", Byte);
integer_conversion!(i16, "short", Int16);
integer_conversion!(u16, "ushort", UInt16);
integer_conversion!(i32, "int", Int32);
integer_conversion!(u32, "uint", UInt32);
integer_conversion!(i64, "long", Int64, IntPtr);
integer_conversion!(u64, "ulong", UInt64, UIntPtr);

macro_rules! exact_conversion {
    ($target:ty, $expected:literal, $variant:ident) => {
        impl TryFrom<SimpleValue> for $target {
            type Error = Error;

            fn try_from(value: SimpleValue) -> Result<Self> {
                match value {
                    SimpleValue::$variant(v) => Ok(v),
                    other => Err(other.mismatch($expected)),
                }
            }
        }

        impl From<$target> for SimpleValue {
            fn from(value: $target) -> Self {
                SimpleValue::$variant(value)
            }
        }
    };
}

exact_conversion!(bool, "bool", Boolean);
exact_conversion!(char, "char", Char);
exact_conversion!(f32, "float", Single);
exact_conversion!(f64, "double", Double);
exact_conversion!(Guid, "Guid", Guid);
exact_conversion!(TimeSpan, "TimeSpan", TimeSpan);
exact_conversion!(Timestamp, "DateTime", Timestamp);
exact_conversion!(IpAddr, "IPAddress", IpAddress);
exact_conversion!(SocketAddr, "IPEndPoint", IpEndPoint);
exact_conversion!(DnsEndPoint, "DnsEndPoint", DnsEndPoint);
exact_conversion!(Certificate, "X509Certificate", Certificate);

impl TryFrom<SimpleValue> for String {
    type Error = Error;

    /// Strings convert as-is and enums convert to their member name (or the number)
    fn try_from(value: SimpleValue) -> Result<Self> {
        match value {
            SimpleValue::String(text) => Ok(text),
            SimpleValue::Enum {
                name: Some(name), ..
            } => Ok(name),
            SimpleValue::Enum { value, name: None } => Ok(value.to_string()),
            other => Err(other.mismatch("string")),
        }
    }
}

impl From<i32> for SimpleValue {
    fn from(value: i32) -> Self {
        SimpleValue::Int32(value)
    }
}

impl From<i64> for SimpleValue {
    fn from(value: i64) -> Self {
        SimpleValue::Int64(value)
    }
}

impl From<String> for SimpleValue {
    fn from(value: String) -> Self {
        SimpleValue::String(value)
    }
}

impl From<&str> for SimpleValue {
    fn from(value: &str) -> Self {
        SimpleValue::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(value: i64, name: Option<&str>) -> SimpleValue {
        SimpleValue::Enum {
            value,
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn strict_integer_conversions() {
        assert_eq!(i32::try_from(SimpleValue::Int32(-4)).unwrap(), -4);
        assert!(matches!(
            i32::try_from(SimpleValue::Int64(4)),
            Err(Error::TypeMismatch { expected: "int", .. })
        ));
        assert_eq!(i64::try_from(SimpleValue::IntPtr(0x1000)).unwrap(), 0x1000);
        assert!(u8::try_from(SimpleValue::Null).is_err());
    }

    #[test]
    fn enum_conversions() {
        assert_eq!(i32::try_from(color(2, Some("Blue"))).unwrap(), 2);
        assert!(u8::try_from(color(-1, None)).is_err());
        assert_eq!(String::try_from(color(2, Some("Blue"))).unwrap(), "Blue");
        assert_eq!(String::try_from(color(7, None)).unwrap(), "7");
        assert!(String::try_from(SimpleValue::Int32(7)).is_err());
    }

    #[test]
    fn ordering_across_kinds() {
        assert_eq!(
            SimpleValue::Int32(5).compare(&SimpleValue::UInt64(7)),
            Some(Ordering::Less)
        );
        assert_eq!(
            SimpleValue::Double(2.5).compare(&SimpleValue::Int16(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            SimpleValue::Null.compare(&SimpleValue::Int32(i32::MIN)),
            Some(Ordering::Less)
        );
        assert_eq!(
            SimpleValue::from("abc").compare(&SimpleValue::Boolean(true)),
            None
        );
    }

    #[test]
    fn enum_equals_member_name() {
        assert!(color(1, Some("Red")).equivalent(&SimpleValue::from("Red")));
        assert!(!color(1, Some("Red")).equivalent(&SimpleValue::from("Blue")));
        assert!(color(1, Some("Red")).equivalent(&SimpleValue::Int32(1)));
    }

    #[test]
    fn display() {
        assert_eq!(SimpleValue::Null.to_string(), "{null}");
        assert_eq!(SimpleValue::Boolean(true).to_string(), "True");
        assert_eq!(color(3, None).to_string(), "3");
        assert_eq!(color(3, Some("Green")).to_string(), "Green");
        assert_eq!(SimpleValue::Char('x').to_string(), "x");
    }
}
