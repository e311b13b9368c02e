//! Decoded header field representation.

use std::fmt;

use bytes::Bytes;

/// An HTTP field: a name/value pair of opaque byte strings.
#[derive(Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size charged against the dynamic table, RFC 9204 Section 3.2.1:
    /// name length + value length + 32 bytes of per-entry overhead.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl From<(&'static str, &'static str)> for HeaderField {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}
