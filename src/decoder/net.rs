//! Network address values.
//!
//! `System.Net.IPAddress` keeps IPv4 addresses in a 64-bit `m_Address` field whose low byte is
//! the first octet, and IPv6 addresses as eight host-order 16-bit labels in `m_Numbers`. The
//! endpoint types wrap an address (or a host name) together with a port.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use crate::{
    objects::{DynamicObject, SimpleValue},
    Error, Result,
};

/// `AddressFamily.Unspecified`
pub const AF_UNSPECIFIED: i32 = 0;
/// `AddressFamily.InterNetwork`
pub const AF_INET: i32 = 2;
/// `AddressFamily.InterNetworkV6`
pub const AF_INET6: i32 = 23;

const IPV6_LABELS: usize = 8;

/// A host name and port, as held by `System.Net.DnsEndPoint`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DnsEndPoint {
    /// Host name or textual address
    pub host: String,
    /// Port number
    pub port: i32,
    /// Raw `AddressFamily` value
    pub family: i32,
}

impl DnsEndPoint {
    /// Symbolic name of the address family
    #[must_use]
    pub fn family_name(&self) -> String {
        match self.family {
            AF_UNSPECIFIED => "Unspecified".to_string(),
            AF_INET => "InterNetwork".to_string(),
            AF_INET6 => "InterNetworkV6".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for DnsEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.family_name(), self.host, self.port)
    }
}

/// Unpack an IPv4 address from its stored 64-bit form, low byte first.
#[must_use]
pub fn ipv4_from_stored(raw: i64) -> Ipv4Addr {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let low = raw as u32;
    Ipv4Addr::from(low.to_le_bytes())
}

/// Pack an IPv4 address into its stored 64-bit form
#[must_use]
pub fn ipv4_to_stored(address: Ipv4Addr) -> i64 {
    i64::from(u32::from_le_bytes(address.octets()))
}

pub(crate) fn decode_ip_address(object: &DynamicObject<'_>, _address: u64) -> Result<SimpleValue> {
    let family: i32 = object.field("m_Family")?.to()?;

    match family {
        AF_INET6 => {
            let numbers = object.field("m_Numbers")?;
            let length = numbers.array_length()?;
            if length < IPV6_LABELS {
                return Err(malformed_error!(
                    "IPv6 address at 0x{:X} has {} labels",
                    object.address(),
                    length
                ));
            }

            let mut labels = [0_u16; IPV6_LABELS];
            for (index, label) in labels.iter_mut().enumerate() {
                *label = numbers.index(index as i64)?.to()?;
            }
            Ok(SimpleValue::IpAddress(IpAddr::V6(Ipv6Addr::from(labels))))
        }
        AF_INET => {
            let raw: i64 = object.field("m_Address")?.to()?;
            Ok(SimpleValue::IpAddress(IpAddr::V4(ipv4_from_stored(raw))))
        }
        other => Err(malformed_error!(
            "IPAddress at 0x{:X} has address family {} which is neither IPv4 nor IPv6",
            object.address(),
            other
        )),
    }
}

pub(crate) fn decode_ip_endpoint(object: &DynamicObject<'_>, _address: u64) -> Result<SimpleValue> {
    let address: IpAddr = object.field("m_Address")?.to()?;
    let port: i32 = object.field("m_Port")?.to()?;
    let port = u16::try_from(port).map_err(|_| {
        malformed_error!("IPEndPoint at 0x{:X} has port {}", object.address(), port)
    })?;

    Ok(SimpleValue::IpEndPoint(SocketAddr::new(address, port)))
}

pub(crate) fn decode_dns_endpoint(object: &DynamicObject<'_>, _address: u64) -> Result<SimpleValue> {
    let host = object.field("m_Host")?;
    if host.is_null() {
        return Err(Error::TypeMismatch {
            expected: "host name",
            actual: host.to_string(),
        });
    }

    Ok(SimpleValue::DnsEndPoint(DnsEndPoint {
        host: host.to()?,
        port: object.field("m_Port")?.to()?,
        family: object.field("m_Family")?.to()?,
    }))
}
