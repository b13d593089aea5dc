//! Pack codec: the tag/type/value container used by SoftEther for every
//! control-plane message (Hello/Auth/Welcome and beyond).
//!
//! Wire format (big-endian throughout), per item:
//! `u32 name_len_plus_one, name_bytes, u32 type_tag, u32 value_count, values...`
//! preceded by a single `u32 item_count` for the whole Pack.

use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum values per item and maximum item-name length, per spec §4.3.
const MAX_VALUES_PER_ITEM: u32 = 262_144;
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("truncated pack data")]
    Truncated,
    #[error("item name too long: {0} bytes")]
    NameTooLong(usize),
    #[error("name is not valid ASCII")]
    NameNotAscii,
    #[error("unknown type tag: {0}")]
    UnknownType(u32),
    #[error("value count {0} exceeds maximum {MAX_VALUES_PER_ITEM}")]
    TooManyValues(u32),
    #[error("string value is not valid utf-8")]
    InvalidUtf8,
}

/// A single typed value inside a Pack item. All values within one item share
/// the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackValue {
    Int(u32),
    Int64(u64),
    Str(String),
    Unistr(String),
    Data(Vec<u8>),
}

impl PackValue {
    fn type_tag(&self) -> u32 {
        match self {
            PackValue::Int(_) => 0,
            PackValue::Data(_) => 1,
            PackValue::Str(_) => 2,
            PackValue::Unistr(_) => 3,
            PackValue::Int64(_) => 4,
        }
    }
}

/// One named, typed, possibly multi-valued entry in a Pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackItem {
    pub name: String,
    pub values: Vec<PackValue>,
}

/// An ordered sequence of Pack items. Keys are unique by convention; lookups
/// return the first match for a given name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pack {
    items: Vec<PackItem>,
}

impl Pack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn push(&mut self, name: &str, values: Vec<PackValue>) {
        self.items.push(PackItem {
            name: name.to_string(),
            values,
        });
    }

    pub fn add_int(&mut self, name: &str, value: u32) {
        self.push(name, vec![PackValue::Int(value)]);
    }

    pub fn add_int64(&mut self, name: &str, value: u64) {
        self.push(name, vec![PackValue::Int64(value)]);
    }

    pub fn add_bool(&mut self, name: &str, value: bool) {
        self.add_int(name, if value { 1 } else { 0 });
    }

    pub fn add_str(&mut self, name: &str, value: impl Into<String>) {
        self.push(name, vec![PackValue::Str(value.into())]);
    }

    pub fn add_unistr(&mut self, name: &str, value: impl Into<String>) {
        self.push(name, vec![PackValue::Unistr(value.into())]);
    }

    pub fn add_data(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.push(name, vec![PackValue::Data(value.into())]);
    }

    /// Encode an IPv4 address as the spec's little-endian-octet `Int`:
    /// `b0 | b1<<8 | b2<<16 | b3<<24`.
    pub fn add_ipv4(&mut self, name: &str, addr: std::net::Ipv4Addr) {
        let [b0, b1, b2, b3] = addr.octets();
        let v = (b0 as u32) | (b1 as u32) << 8 | (b2 as u32) << 16 | (b3 as u32) << 24;
        self.add_int(name, v);
    }

    pub fn get_int(&self, name: &str) -> Option<u32> {
        self.first_value(name).and_then(|v| match v {
            PackValue::Int(x) => Some(*x),
            _ => None,
        })
    }

    pub fn get_int64(&self, name: &str) -> Option<u64> {
        self.first_value(name).and_then(|v| match v {
            PackValue::Int64(x) => Some(*x),
            _ => None,
        })
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get_int(name).map(|v| v != 0)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.first_value(name).and_then(|v| match v {
            PackValue::Str(s) | PackValue::Unistr(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn get_data(&self, name: &str) -> Option<&[u8]> {
        self.first_value(name).and_then(|v| match v {
            PackValue::Data(d) => Some(d.as_slice()),
            _ => None,
        })
    }

    pub fn get_ipv4(&self, name: &str) -> Option<std::net::Ipv4Addr> {
        self.get_int(name).map(|v| {
            std::net::Ipv4Addr::new(
                (v & 0xff) as u8,
                ((v >> 8) & 0xff) as u8,
                ((v >> 16) & 0xff) as u8,
                ((v >> 24) & 0xff) as u8,
            )
        })
    }

    fn first_value(&self, name: &str) -> Option<&PackValue> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.values.first())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|item| item.name == name)
    }

    pub fn items(&self) -> &[PackItem] {
        &self.items
    }

    /// Encode this Pack to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.items.len() as u32).to_be_bytes());

        for item in &self.items {
            // Historical trailing-NUL convention: stored length is len+1.
            let name_bytes = item.name.as_bytes();
            out.extend_from_slice(&((name_bytes.len() + 1) as u32).to_be_bytes());
            out.extend_from_slice(name_bytes);

            let type_tag = item
                .values
                .first()
                .map(|v| v.type_tag())
                .unwrap_or(0);
            out.extend_from_slice(&type_tag.to_be_bytes());
            out.extend_from_slice(&(item.values.len() as u32).to_be_bytes());

            for value in &item.values {
                match value {
                    PackValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                    PackValue::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
                    PackValue::Data(d) => {
                        out.extend_from_slice(&(d.len() as u32).to_be_bytes());
                        out.extend_from_slice(d);
                    }
                    PackValue::Str(s) | PackValue::Unistr(s) => {
                        let bytes = s.as_bytes();
                        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                        out.extend_from_slice(bytes);
                    }
                }
            }
        }

        out
    }

    /// Decode a Pack from its wire representation.
    pub fn decode(data: &[u8]) -> Result<Self, PackError> {
        let mut cursor = Cursor::new(data);
        let item_count = cursor.u32()?;
        let mut items = Vec::with_capacity(item_count.min(4096) as usize);

        for _ in 0..item_count {
            let name_len_plus_one = cursor.u32()? as usize;
            if name_len_plus_one == 0 {
                return Err(PackError::Truncated);
            }
            // Stored length is len+1 (historical trailing-NUL convention that
            // encode() never actually writes a byte for); read exactly len.
            let name_len = name_len_plus_one - 1;
            let name_bytes = cursor.bytes(name_len)?;
            if name_bytes.len() > MAX_NAME_LEN {
                return Err(PackError::NameTooLong(name_bytes.len()));
            }
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| PackError::NameNotAscii)?
                .to_string();
            if !name.is_ascii() {
                return Err(PackError::NameNotAscii);
            }

            let type_tag = cursor.u32()?;
            let value_count = cursor.u32()?;
            if value_count > MAX_VALUES_PER_ITEM {
                return Err(PackError::TooManyValues(value_count));
            }

            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                let value = match type_tag {
                    0 => PackValue::Int(cursor.u32()?),
                    1 => {
                        let len = cursor.u32()? as usize;
                        PackValue::Data(cursor.bytes(len)?.to_vec())
                    }
                    2 => {
                        let len = cursor.u32()? as usize;
                        let bytes = cursor.bytes(len)?;
                        PackValue::Str(
                            std::str::from_utf8(bytes)
                                .map_err(|_| PackError::InvalidUtf8)?
                                .to_string(),
                        )
                    }
                    3 => {
                        let len = cursor.u32()? as usize;
                        let bytes = cursor.bytes(len)?;
                        PackValue::Unistr(
                            std::str::from_utf8(bytes)
                                .map_err(|_| PackError::InvalidUtf8)?
                                .to_string(),
                        )
                    }
                    4 => PackValue::Int64(cursor.u64()?),
                    other => return Err(PackError::UnknownType(other)),
                };
                values.push(value);
            }

            items.push(PackItem { name, values });
        }

        Ok(Pack { items })
    }

    /// Debug-print this Pack with credential/key/cookie/payload fields
    /// redacted. Keys outside the allowlist are shown as `<redacted N bytes>`
    /// (for `Data`) or `<redacted>` (for scalars/strings).
    pub fn redacted_debug(&self) -> String {
        const ALLOWLIST: &[&str] = &[
            "method",
            "hubname",
            "username",
            "protocol",
            "use_encrypt",
            "use_compress",
            "max_connection",
            "half_connection",
            "qos",
            "client_str",
            "client_ver",
            "client_build",
            "session_name",
            "connection_name",
            "max_connection",
            "timeout",
            "Redirect",
            "Ip",
            "Port",
        ];

        let mut out = String::from("Pack {\n");
        for item in &self.items {
            if ALLOWLIST.contains(&item.name.as_str()) {
                out.push_str(&format!("  {}: {:?}\n", item.name, item.values));
            } else {
                let redacted: Vec<String> = item
                    .values
                    .iter()
                    .map(|v| match v {
                        PackValue::Data(d) => format!("<redacted {} bytes>", d.len()),
                        _ => "<redacted>".to_string(),
                    })
                    .collect();
                out.push_str(&format!("  {}: {:?}\n", item.name, redacted));
            }
        }
        out.push('}');
        out
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u32(&mut self) -> Result<u32, PackError> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, PackError> {
        let bytes = self.bytes(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], PackError> {
        if self.pos + len > self.data.len() {
            return Err(PackError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Build a flat `name -> first value` map, useful in tests that don't care
/// about ordering or multi-valued items.
#[allow(dead_code)]
pub(crate) fn flatten(pack: &Pack) -> BTreeMap<String, PackValue> {
    pack.items
        .iter()
        .filter_map(|item| item.values.first().map(|v| (item.name.clone(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn round_trips_mixed_item_types() {
        let mut pack = Pack::new();
        pack.add_str("method", "login");
        pack.add_int("protocol", 0);
        pack.add_int64("session_key_32", 0x1122_3344_5566_7788);
        pack.add_data("random", vec![1, 2, 3, 4, 5]);
        pack.add_ipv4("clientIPv4", Ipv4Addr::new(10, 0, 0, 5));

        let encoded = pack.encode();
        let decoded = Pack::decode(&encoded).unwrap();

        assert_eq!(decoded.get_str("method"), Some("login"));
        assert_eq!(decoded.get_int("protocol"), Some(0));
        assert_eq!(decoded.get_int64("session_key_32"), Some(0x1122_3344_5566_7788));
        assert_eq!(decoded.get_data("random"), Some(&[1, 2, 3, 4, 5][..]));
        assert_eq!(decoded.get_ipv4("clientIPv4"), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn lookup_returns_first_value_for_duplicate_names() {
        let mut pack = Pack::new();
        pack.push("dup", vec![PackValue::Int(1)]);
        pack.push("dup", vec![PackValue::Int(2)]);
        assert_eq!(pack.get_int("dup"), Some(1));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let data = [0, 0, 0, 1]; // claims 1 item, provides none
        assert_eq!(Pack::decode(&data), Err(PackError::Truncated));
    }

    #[test]
    fn decode_rejects_oversized_value_count() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_be_bytes()); // 1 item
        raw.extend_from_slice(&5u32.to_be_bytes()); // name_len+1
        raw.extend_from_slice(b"name\0");
        raw.extend_from_slice(&0u32.to_be_bytes()); // type Int
        raw.extend_from_slice(&(MAX_VALUES_PER_ITEM + 1).to_be_bytes());

        assert_eq!(
            Pack::decode(&raw),
            Err(PackError::TooManyValues(MAX_VALUES_PER_ITEM + 1))
        );
    }

    #[test]
    fn decode_reads_exactly_name_len_plus_one_minus_one_bytes() {
        // Exercises the spec §9 documented name-length convention: the
        // stored prefix is len+1, but the field on the wire is exactly
        // `len` bytes — encode() never writes a trailing NUL, so decode
        // must not read one either, or every field after the name
        // desyncs by a byte.
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&4u32.to_be_bytes()); // "name_len+1" for "foo"
        raw.extend_from_slice(b"foo");
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&7u32.to_be_bytes());
        let decoded = Pack::decode(&raw).unwrap();
        assert_eq!(decoded.get_int("foo"), Some(7));
    }

    #[test]
    fn redacted_debug_hides_credentials() {
        let mut pack = Pack::new();
        pack.add_str("username", "alice");
        pack.add_data("secure_password", vec![0u8; 20]);
        pack.add_str("jwt", "super-secret-token");

        let rendered = pack.redacted_debug();
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("<redacted 20 bytes>"));
    }

    #[test]
    fn ipv4_round_trip_matches_little_endian_octets() {
        let mut pack = Pack::new();
        pack.add_ipv4("gw", Ipv4Addr::new(10, 0, 0, 1));
        let v = pack.get_int("gw").unwrap();
        assert_eq!(v, 10 | (0 << 8) | (0 << 16) | (1u32 << 24));
    }
}
