use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tlv::{TlvElement, TlvError, TlvReader};

/// Marker byte that distinguishes a version component: the component value is
/// the marker followed by the version number in big-endian bytes.
pub const VERSION_MARKER: u8 = 0xFD;

/// A hierarchical name: an ordered sequence of opaque byte components.
///
/// `Ord` is lexicographic by components, so an ordered map keyed by `Name`
/// enumerates entries in trie order and a prefix corresponds to the range
/// `[prefix, prefix.successor())`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Name {
    pub components: Vec<Vec<u8>>,
}

/// Errors from parsing a URI into a `Name`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameParseError {
    #[error("invalid percent-escape in component")]
    InvalidEscape,
    #[error("name TLV error: {0}")]
    Tlv(String),
}

impl Name {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a URI like `/hello/world`. Empty path segments are skipped;
    /// `%XX` escapes are decoded.
    pub fn from_uri(uri: &str) -> Result<Self, NameParseError> {
        let mut name = Name::new();
        for part in uri.trim_start_matches('/').split('/') {
            if part.is_empty() {
                continue;
            }
            name.components.push(decode_component(part)?);
        }
        Ok(name)
    }

    pub fn append(&mut self, component: Vec<u8>) -> &mut Self {
        self.components.push(component);
        self
    }

    pub fn append_str(&mut self, component: &str) -> &mut Self {
        self.components.push(component.as_bytes().to_vec());
        self
    }

    /// Append a version component encoded with the marker-byte convention.
    pub fn append_version(&mut self, version: u64) -> &mut Self {
        let mut value = vec![VERSION_MARKER];
        value.extend_from_slice(&version.to_be_bytes());
        self.components.push(value);
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Vec<u8>> {
        self.components.get(index)
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.components.last()
    }

    /// The first `length` components as a new name.
    pub fn get_prefix(&self, length: usize) -> Name {
        Name {
            components: self.components.iter().take(length).cloned().collect(),
        }
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        if self.len() > other.len() {
            return false;
        }
        self.components
            .iter()
            .zip(other.components.iter())
            .all(|(a, b)| a == b)
    }

    /// Number of leading components shared with `other`.
    pub fn common_prefix_len(&self, other: &Name) -> usize {
        self.components
            .iter()
            .zip(other.components.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The smallest name ordered after every name that has `self` as a
    /// prefix, or `None` for the empty name (which prefixes everything).
    pub fn successor(&self) -> Option<Name> {
        let mut components = self.components.clone();
        while let Some(mut last) = components.pop() {
            while let Some(&byte) = last.last() {
                if byte < 0xFF {
                    *last.last_mut().unwrap() += 1;
                    components.push(last);
                    return Some(Name { components });
                }
                last.pop();
            }
            // Component exhausted (empty or all 0xFF): carry into the parent.
        }
        None
    }

    /// Whether the last component is a version component.
    pub fn has_version(&self) -> bool {
        self.version().is_some()
    }

    /// Decode the trailing version component, if present.
    pub fn version(&self) -> Option<u64> {
        component_version(self.last()?)
    }

    /// Index of the last version component, if any.
    pub fn last_version_index(&self) -> Option<usize> {
        self.components
            .iter()
            .rposition(|c| component_version(c).is_some())
    }

    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut uri = String::new();
        for component in &self.components {
            uri.push('/');
            uri.push_str(&encode_component(component));
        }
        uri
    }

    /// Encode as a NAME TLV element.
    pub fn encode(&self) -> TlvElement {
        let mut inner = Vec::new();
        for component in &self.components {
            TlvElement::new(tlv_types::NAME_COMPONENT, component.clone()).encode_into(&mut inner);
        }
        TlvElement::new(tlv_types::NAME, inner)
    }

    /// Decode from the value bytes of a NAME TLV element.
    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = Name::new();
        for element in TlvReader::new(value) {
            name.components
                .push(element?.expect_type(tlv_types::NAME_COMPONENT)?.value);
        }
        Ok(name)
    }

    /// Decode from a full NAME TLV element in `data`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (element, consumed) = TlvElement::decode(data)?;
        let element = element.expect_type(tlv_types::NAME)?;
        Ok((Self::decode_value(&element.value)?, consumed))
    }
}

/// TLV type constants for names; packet-level types live in `packets`.
pub mod tlv_types {
    pub const NAME: u8 = 0x07;
    pub const NAME_COMPONENT: u8 = 0x08;
}

/// Decode the version number of a component, if it uses the marker encoding.
pub fn component_version(component: &[u8]) -> Option<u64> {
    if component.len() < 2 || component.len() > 9 || component[0] != VERSION_MARKER {
        return None;
    }
    let mut value: u64 = 0;
    for &byte in &component[1..] {
        value = value << 8 | byte as u64;
    }
    Some(value)
}

fn encode_component(component: &[u8]) -> String {
    let mut out = String::new();
    for &byte in component {
        let c = byte as char;
        if byte.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_component(part: &str) -> Result<Vec<u8>, NameParseError> {
    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or(NameParseError::InvalidEscape)?;
            let hex = std::str::from_utf8(hex).map_err(|_| NameParseError::InvalidEscape)?;
            out.push(u8::from_str_radix(hex, 16).map_err(|_| NameParseError::InvalidEscape)?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl FromStr for Name {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::from_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn test_uri_roundtrip() {
        let n = name("/hello/world/test");
        assert_eq!(n.len(), 3);
        assert_eq!(n.to_uri(), "/hello/world/test");
        assert_eq!(name(""), Name::new());
        assert_eq!(Name::new().to_uri(), "/");
    }

    #[test]
    fn test_percent_escapes() {
        let n = name("/a%2Fb/c");
        assert_eq!(n.get(0).unwrap(), &b"a/b".to_vec());
        assert_eq!(n.to_uri(), "/a%2Fb/c");
        assert!(Name::from_uri("/bad%zz").is_err());
        assert!(Name::from_uri("/bad%f").is_err());
    }

    #[test]
    fn test_prefix_operations() {
        let n = name("/a/b/c");
        assert_eq!(n.get_prefix(2), name("/a/b"));
        assert!(name("/a/b").is_prefix_of(&n));
        assert!(Name::new().is_prefix_of(&n));
        assert!(!name("/a/x").is_prefix_of(&n));
        assert!(!name("/a/b/c/d").is_prefix_of(&n));
        assert_eq!(name("/a/b/x").common_prefix_len(&n), 2);
    }

    #[test]
    fn test_ordering_is_trie_compatible() {
        let mut names = vec![name("/b"), name("/a/b/c"), name("/a"), name("/a/b")];
        names.sort();
        assert_eq!(
            names,
            vec![name("/a"), name("/a/b"), name("/a/b/c"), name("/b")]
        );
    }

    #[test]
    fn test_successor_bounds_prefix_range() {
        let p = name("/a/b");
        let succ = p.successor().unwrap();
        assert!(p < succ);
        assert!(name("/a/b/zzz") < succ);
        assert!(!p.is_prefix_of(&succ));
        assert!(Name::new().successor().is_none());

        let all_ff = Name {
            components: vec![vec![0x61], vec![0xFF, 0xFF]],
        };
        let succ = all_ff.successor().unwrap();
        assert_eq!(succ, Name {
            components: vec![vec![0x62]],
        });
    }

    #[test]
    fn test_version_component() {
        let mut n = name("/strategy/best-route");
        n.append_version(7);
        assert_eq!(n.version(), Some(7));
        assert_eq!(n.last_version_index(), Some(2));
        assert!(name("/plain").version().is_none());

        let mut big = Name::new();
        big.append_version(u64::MAX);
        assert_eq!(big.version(), Some(u64::MAX));
    }

    #[test]
    fn test_tlv_roundtrip() {
        let n = name("/hello/world");
        let wire = n.encode().encode();
        let (decoded, consumed) = Name::decode(&wire).unwrap();
        assert_eq!(decoded, n);
        assert_eq!(consumed, wire.len());
    }
}
