use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{Error, Result};

/// Structure type carrying the advertised name
pub const NAME_TYPE: u8 = 0x09;

/// Structure type carrying advertisement flags
pub const FLAGS_TYPE: u8 = 0x01;

/// Structure type carrying manufacturer specific data (the device id here)
pub const MANUFACTURER_TYPE: u8 = 0xFF;

/// Names are truncated to this many bytes before broadcast
pub const NAME_LIMIT: usize = 8;

/// Legacy advertising payload limit
pub const MAX_ADVERTISEMENT_LEN: usize = 31;

/// One `(type, value)` element of an advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub kind: u8,
    pub value: Bytes,
}

/// A parsed or to-be-encoded advertisement payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    flags: Option<u8>,
    structures: Vec<Structure>,
}

impl Advertisement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flags byte
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Adds a name structure, truncated to [`NAME_LIMIT`] bytes
    pub fn with_name(self, name: &str) -> Self {
        let short = truncate_name(name);
        self.with_structure(NAME_TYPE, Bytes::copy_from_slice(short.as_bytes()))
    }

    /// Adds an arbitrary structure
    pub fn with_structure(mut self, kind: u8, value: impl Into<Bytes>) -> Self {
        self.structures.push(Structure {
            kind,
            value: value.into(),
        });
        self
    }

    pub fn flags(&self) -> Option<u8> {
        self.flags
    }

    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    /// First structure of the given type
    pub fn structure(&self, kind: u8) -> Option<&Structure> {
        self.structures.iter().find(|s| s.kind == kind)
    }

    /// Parses every well-formed structure, stopping at the first malformed one
    pub fn parse(data: &[u8]) -> Self {
        let mut adv = Advertisement::default();
        for (kind, value) in StructureIter::new(data) {
            if kind == FLAGS_TYPE && value.len() == 1 && adv.flags.is_none() {
                adv.flags = Some(value[0]);
            } else {
                adv.structures.push(Structure {
                    kind,
                    value: Bytes::copy_from_slice(value),
                });
            }
        }
        adv
    }

    /// Serializes to the `length, type, value` wire form
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_ADVERTISEMENT_LEN);
        if let Some(flags) = self.flags {
            buf.put_u8(2);
            buf.put_u8(FLAGS_TYPE);
            buf.put_u8(flags);
        }
        for structure in &self.structures {
            // the length byte covers the type byte as well
            let len = structure.value.len() + 1;
            if len > u8::MAX as usize {
                return Err(Error::protocol(format!(
                    "structure 0x{:02x} too long: {} bytes",
                    structure.kind,
                    structure.value.len()
                )));
            }
            buf.put_u8(len as u8);
            buf.put_u8(structure.kind);
            buf.put_slice(&structure.value);
        }
        if buf.len() > MAX_ADVERTISEMENT_LEN {
            return Err(Error::protocol(format!(
                "advertisement is {} bytes, limit is {}",
                buf.len(),
                MAX_ADVERTISEMENT_LEN
            )));
        }
        Ok(buf.freeze())
    }
}

/// Walks the structures of a raw payload without ever reading out of bounds.
///
/// Iteration ends when fewer than two bytes remain, on a zero length byte,
/// or when a declared length runs past the end of the buffer.
pub struct StructureIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StructureIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        StructureIter { data, pos: 0 }
    }
}

impl<'a> Iterator for StructureIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.pos..)?;
        if rest.len() < 2 {
            return None;
        }
        let len = rest[0] as usize;
        if len == 0 || len > rest.len() - 1 {
            self.pos = self.data.len();
            return None;
        }
        let kind = rest[1];
        let value = &rest[2..1 + len];
        self.pos += 1 + len;
        Some((kind, value))
    }
}

/// Longest prefix of `name` that fits [`NAME_LIMIT`] bytes on a char boundary
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= NAME_LIMIT {
        return name;
    }
    let mut end = NAME_LIMIT;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Encodes a bare name advertisement: `(length, NAME_TYPE, name[..8])`
pub fn encode_name(name: &str) -> Bytes {
    let short = truncate_name(name);
    let mut buf = BytesMut::with_capacity(short.len() + 2);
    buf.put_u8((short.len() + 1) as u8);
    buf.put_u8(NAME_TYPE);
    buf.put_slice(short.as_bytes());
    buf.freeze()
}

/// Extracts the advertised name; `None` when no complete name structure exists.
///
/// A zero length byte marks the end of the data, so structures after it are
/// never looked at.
pub fn decode_name(data: &[u8]) -> Option<String> {
    StructureIter::new(data)
        .find(|(kind, _)| *kind == NAME_TYPE)
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .map(str::to_owned)
}

/// Extracts the device id a Beacon appends as manufacturer data
pub fn decode_device(data: &[u8]) -> Option<String> {
    StructureIter::new(data)
        .find(|(kind, _)| *kind == MANUFACTURER_TYPE)
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}
