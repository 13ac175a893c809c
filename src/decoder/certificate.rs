//! X.509 certificates held by `X509Certificate` / `X509Certificate2` objects.
//!
//! The managed object only holds a handle to a native `CERT_CONTEXT`:
//!
//! ```text
//! typedef struct _CERT_CONTEXT {
//!     DWORD      dwCertEncodingType;
//!     BYTE       *pbCertEncoded;      // offset 4 (32-bit) / 8 (64-bit)
//!     DWORD      cbCertEncoded;       // offset 8 (32-bit) / 16 (64-bit)
//!     PCERT_INFO pCertInfo;
//!     HCERTSTORE hCertStore;
//! } CERT_CONTEXT;
//! ```
//!
//! The DER bytes are walked just far enough to extract the issuer and subject names.

use std::fmt;

use sha1::{Digest, Sha1};
use widestring::U16Str;

use crate::{
    memory::{read_le_at, Parser},
    objects::{DynamicObject, SimpleValue},
    Result,
};

const TAG_INTEGER: u8 = 0x02;
const TAG_OID: u8 = 0x06;
const TAG_UTF8_STRING: u8 = 0x0C;
const TAG_PRINTABLE_STRING: u8 = 0x13;
const TAG_T61_STRING: u8 = 0x14;
const TAG_IA5_STRING: u8 = 0x16;
const TAG_BMP_STRING: u8 = 0x1E;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_EXPLICIT_VERSION: u8 = 0xA0;

/// A decoded certificate: DER bytes plus the names and thumbprint derived from them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    thumbprint: String,
}

impl Certificate {
    /// The empty certificate of an object without native context
    #[must_use]
    pub fn empty() -> Self {
        Certificate::default()
    }

    /// Parse a DER encoded certificate.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if the structure up to
    /// the subject name is not valid DER.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let mut outer = Parser::new(&der);
        let certificate = expect_tlv(&mut outer, TAG_SEQUENCE)?;
        let mut certificate = Parser::new(certificate);
        let tbs = expect_tlv(&mut certificate, TAG_SEQUENCE)?;

        let mut tbs = Parser::new(tbs);
        if tbs.peek_byte()? == TAG_EXPLICIT_VERSION {
            read_tlv(&mut tbs)?;
        }
        expect_tlv(&mut tbs, TAG_INTEGER)?;
        expect_tlv(&mut tbs, TAG_SEQUENCE)?;
        let issuer = format_name(expect_tlv(&mut tbs, TAG_SEQUENCE)?)?;
        expect_tlv(&mut tbs, TAG_SEQUENCE)?;
        let subject = format_name(expect_tlv(&mut tbs, TAG_SEQUENCE)?)?;

        let thumbprint = Sha1::digest(&der)
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect();

        Ok(Certificate {
            der,
            subject,
            issuer,
            thumbprint,
        })
    }

    /// Returns true for a certificate without data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.der.is_empty()
    }

    /// The DER encoding
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, most specific attribute first
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name, most specific attribute first
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Uppercase hex SHA-1 of the DER encoding
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject, self.thumbprint)
    }
}

pub(crate) fn decode_certificate(object: &DynamicObject<'_>, _address: u64) -> Result<SimpleValue> {
    let handle: i64 = object.field("m_safeCertContext")?.field("handle")?.to()?;
    if handle == 0 {
        return Ok(SimpleValue::Certificate(Certificate::empty()));
    }

    let catalog = object.catalog();
    #[allow(clippy::cast_sign_loss)]
    let context = catalog.read_pointer(handle as u64)?;
    if context == 0 {
        return Ok(SimpleValue::Certificate(Certificate::empty()));
    }

    let (mut data_offset, mut length_offset) = if catalog.pointer_size() == 4 {
        (4, 8)
    } else {
        (8, 16)
    };
    let header = catalog.read_exact(context, length_offset + 4)?;
    let data = if catalog.pointer_size() == 4 {
        u64::from(read_le_at::<u32>(&header, &mut data_offset)?)
    } else {
        read_le_at::<u64>(&header, &mut data_offset)?
    };
    let length = read_le_at::<i32>(&header, &mut length_offset)?;
    let length = usize::try_from(length).map_err(|_| {
        malformed_error!("Certificate context 0x{:X} has length {}", context, length)
    })?;

    let der = catalog.read_exact(data, length)?;
    Ok(SimpleValue::Certificate(Certificate::from_der(der)?))
}

fn read_tlv<'a>(parser: &mut Parser<'a>) -> Result<(u8, &'a [u8])> {
    let tag = parser.read_le::<u8>()?;
    let first = parser.read_le::<u8>()?;

    let length = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let count = first & 0x7F;
        if count == 0 || count > 4 {
            return Err(malformed_error!("Unsupported DER length prefix 0x{:02X}", first));
        }

        let mut length = 0_usize;
        for _ in 0..count {
            length = (length << 8) | usize::from(parser.read_le::<u8>()?);
        }
        length
    };

    Ok((tag, parser.read_bytes(length)?))
}

fn expect_tlv<'a>(parser: &mut Parser<'a>, expected: u8) -> Result<&'a [u8]> {
    let (tag, content) = read_tlv(parser)?;
    if tag != expected {
        return Err(malformed_error!(
            "Expected DER tag 0x{:02X}, found 0x{:02X}",
            expected,
            tag
        ));
    }
    Ok(content)
}

fn format_name(name: &[u8]) -> Result<String> {
    let mut attributes = Vec::new();

    let mut rdns = Parser::new(name);
    while rdns.has_more_data() {
        let mut set = Parser::new(expect_tlv(&mut rdns, TAG_SET)?);
        while set.has_more_data() {
            let mut pair = Parser::new(expect_tlv(&mut set, TAG_SEQUENCE)?);
            let oid = decode_oid(expect_tlv(&mut pair, TAG_OID)?);
            let (tag, value) = read_tlv(&mut pair)?;
            attributes.push(format!(
                "{}={}",
                attribute_name(&oid),
                quote(&decode_string(tag, value))
            ));
        }
    }

    attributes.reverse();
    Ok(attributes.join(", "))
}

fn decode_oid(data: &[u8]) -> String {
    let mut arcs = Vec::new();
    let mut value = 0_u64;

    for byte in data {
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            continue;
        }

        if arcs.is_empty() {
            let first = (value / 40).min(2);
            arcs.push(first);
            arcs.push(value - first * 40);
        } else {
            arcs.push(value);
        }
        value = 0;
    }

    arcs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn attribute_name(oid: &str) -> String {
    let short = match oid {
        "2.5.4.3" => "CN",
        "2.5.4.4" => "SN",
        "2.5.4.5" => "SERIALNUMBER",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "S",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.12" => "T",
        "2.5.4.42" => "G",
        "1.2.840.113549.1.9.1" => "E",
        "0.9.2342.19200300.100.1.25" => "DC",
        _ => return format!("OID.{oid}"),
    };
    short.to_string()
}

fn decode_string(tag: u8, value: &[u8]) -> String {
    match tag {
        TAG_BMP_STRING => {
            let units: Vec<u16> = value
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            U16Str::from_slice(&units).to_string_lossy()
        }
        TAG_UTF8_STRING | TAG_PRINTABLE_STRING | TAG_T61_STRING | TAG_IA5_STRING => {
            String::from_utf8_lossy(value).into_owned()
        }
        _ => value.iter().map(|byte| format!("{byte:02X}")).collect(),
    }
}

fn quote(value: &str) -> String {
    let needs_quotes = value.starts_with(' ')
        || value.ends_with(' ')
        || value
            .chars()
            .any(|c| matches!(c, ',' | '+' | '=' | '"' | '<' | '>' | '#' | ';' | '\n'));

    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        if content.len() < 0x80 {
            out.push(content.len() as u8);
        } else {
            out.push(0x82);
            out.extend_from_slice(&(content.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(content);
        out
    }

    fn attribute(oid: &[u8], tag: u8, value: &[u8]) -> Vec<u8> {
        let pair = [tlv(TAG_OID, oid), tlv(tag, value)].concat();
        tlv(TAG_SET, &tlv(TAG_SEQUENCE, &pair))
    }

    /// A minimal certificate: `CN=<common_name>, O=Heapscope, C=US`, self issued.
    pub(crate) fn sample_der(common_name: &str) -> Vec<u8> {
        let name = tlv(
            TAG_SEQUENCE,
            &[
                attribute(&[0x55, 0x04, 0x06], TAG_PRINTABLE_STRING, b"US"),
                attribute(&[0x55, 0x04, 0x0A], TAG_UTF8_STRING, b"Heapscope"),
                attribute(&[0x55, 0x04, 0x03], TAG_UTF8_STRING, common_name.as_bytes()),
            ]
            .concat(),
        );

        let tbs = tlv(
            TAG_SEQUENCE,
            &[
                tlv(TAG_EXPLICIT_VERSION, &tlv(TAG_INTEGER, &[2])),
                tlv(TAG_INTEGER, &[0x01, 0x02]),
                tlv(TAG_SEQUENCE, &tlv(TAG_OID, &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B])),
                name.clone(),
                tlv(TAG_SEQUENCE, &[]),
                name,
            ]
            .concat(),
        );

        tlv(TAG_SEQUENCE, &tbs)
    }

    #[test]
    fn parse_subject_and_thumbprint() {
        let der = sample_der("heapscope test");
        let certificate = Certificate::from_der(der.clone()).unwrap();

        assert_eq!(certificate.subject(), "CN=heapscope test, O=Heapscope, C=US");
        assert_eq!(certificate.issuer(), certificate.subject());
        assert_eq!(certificate.thumbprint().len(), 40);
        assert!(certificate
            .thumbprint()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(certificate.der(), der.as_slice());
        assert_eq!(
            certificate.to_string(),
            format!("CN=heapscope test, O=Heapscope, C=US ({})", certificate.thumbprint())
        );
    }

    #[test]
    fn quoted_values() {
        let certificate = Certificate::from_der(sample_der("Doe, John")).unwrap();
        assert!(certificate.subject().starts_with("CN=\"Doe, John\""));
    }

    #[test]
    fn long_form_length() {
        let name = "x".repeat(200);
        let certificate = Certificate::from_der(sample_der(&name)).unwrap();
        assert!(certificate.subject().contains(&name));
    }

    #[test]
    fn truncated_der_is_an_error() {
        let der = sample_der("cut");
        assert!(Certificate::from_der(der[..der.len() - 4].to_vec()).is_err());
        assert!(Certificate::from_der(vec![0x31, 0x00]).is_err());
    }

    #[test]
    fn oids_and_strings() {
        assert_eq!(decode_oid(&[0x55, 0x04, 0x03]), "2.5.4.3");
        assert_eq!(
            decode_oid(&[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x01]),
            "1.2.840.113549.1.9.1"
        );
        assert_eq!(attribute_name("1.2.3"), "OID.1.2.3");
        assert_eq!(decode_string(TAG_BMP_STRING, &[0x00, 0x41, 0x00, 0x42]), "AB");
        assert!(Certificate::empty().is_empty());
    }
}
