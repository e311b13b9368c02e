//! Header block wire format: the field section prefix and the five
//! field-line representations of RFC 9204 Section 4.5.
//!
//! Encoding works from the representation chosen by the encoder engine;
//! decoding resolves references against the static table and a dynamic
//! table mirror, yielding fields directly.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::field::HeaderField;
use crate::table::DynamicTable;
use crate::{integer, static_table, strings};

/// Decoded field section prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub required_insert_count: u64,
    pub base: u64,
}

impl Prefix {
    /// Encodes the prefix: the wrapped Required Insert Count with an 8-bit
    /// prefix, then the sign bit and Delta Base with a 7-bit prefix.
    pub fn encode(&self, max_entries: u64, out: &mut Vec<u8>) {
        let enc_ric = if self.required_insert_count == 0 {
            0
        } else {
            self.required_insert_count % (2 * max_entries) + 1
        };
        integer::encode(enc_ric, 8, 0, out);

        if self.base >= self.required_insert_count {
            integer::encode(self.base - self.required_insert_count, 7, 0x00, out);
        } else {
            integer::encode(self.required_insert_count - self.base - 1, 7, 0x80, out);
        }
    }

    /// Decodes the prefix, reconstructing the full Required Insert Count
    /// from its wrapped encoding (RFC 9204 Section 4.5.1.1) using the
    /// decoder table's geometry.
    pub fn decode(data: &[u8], table: &DynamicTable) -> Result<(Prefix, usize)> {
        let (enc_ric, mut pos) = integer::decode(8, data)?;

        let max_entries = table.max_entries();
        let required_insert_count = if enc_ric == 0 {
            0
        } else {
            let full_range = 2 * max_entries;
            if enc_ric > full_range {
                return Err(Error::InvalidReference("required insert count out of range"));
            }
            let max_value = table.insert_count() + max_entries;
            let max_wrapped = (max_value / full_range) * full_range;
            let mut ric = max_wrapped + enc_ric - 1;
            if ric > max_value {
                if ric <= full_range {
                    return Err(Error::InvalidReference("required insert count underflows"));
                }
                ric -= full_range;
            }
            if ric == 0 {
                return Err(Error::InvalidReference("required insert count cannot rewrap to zero"));
            }
            ric
        };

        if pos >= data.len() {
            return Err(Error::Truncated);
        }
        let sign = data[pos] & 0x80 != 0;
        let (delta_base, consumed) = integer::decode(7, &data[pos..])?;
        pos += consumed;

        let base = if sign {
            if delta_base >= required_insert_count {
                return Err(Error::InvalidReference("negative base underflows"));
            }
            required_insert_count - delta_base - 1
        } else {
            required_insert_count + delta_base
        };

        Ok((
            Prefix {
                required_insert_count,
                base,
            },
            pos,
        ))
    }
}

/// A field-line representation chosen by the encoder. Dynamic references
/// carry absolute indices; `encode` converts them to relative or post-base
/// form against the block's base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLine {
    IndexedStatic {
        index: u64,
    },
    IndexedDynamic {
        index: u64,
    },
    LiteralStaticNameRef {
        name_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
    LiteralDynamicNameRef {
        name_index: u64,
        value: Bytes,
        never_indexed: bool,
    },
    LiteralName {
        name: Bytes,
        value: Bytes,
        never_indexed: bool,
    },
}

impl FieldLine {
    /// Serializes the representation against `base`. Dynamic absolute
    /// indices below the base become relative references; at or above it,
    /// post-base references.
    pub fn encode(&self, base: u64, out: &mut Vec<u8>) {
        match self {
            FieldLine::IndexedStatic { index } => {
                integer::encode(*index, 6, 0xC0, out);
            }
            FieldLine::IndexedDynamic { index } => {
                if *index < base {
                    integer::encode(base - index - 1, 6, 0x80, out);
                } else {
                    integer::encode(index - base, 4, 0x10, out);
                }
            }
            FieldLine::LiteralStaticNameRef {
                name_index,
                value,
                never_indexed,
            } => {
                let n_bit = if *never_indexed { 0x20 } else { 0x00 };
                integer::encode(*name_index, 4, 0x40 | n_bit | 0x10, out);
                strings::encode(value, true, 7, 0x00, out);
            }
            FieldLine::LiteralDynamicNameRef {
                name_index,
                value,
                never_indexed,
            } => {
                let n_bit = if *never_indexed { 0x20 } else { 0x00 };
                if *name_index < base {
                    integer::encode(base - name_index - 1, 4, 0x40 | n_bit, out);
                } else {
                    let n_bit = if *never_indexed { 0x08 } else { 0x00 };
                    integer::encode(name_index - base, 3, n_bit, out);
                }
                strings::encode(value, true, 7, 0x00, out);
            }
            FieldLine::LiteralName {
                name,
                value,
                never_indexed,
            } => {
                let n_bit = if *never_indexed { 0x10 } else { 0x00 };
                strings::encode(name, true, 3, 0x20 | n_bit, out);
                strings::encode(value, true, 7, 0x00, out);
            }
        }
    }
}

/// Decodes one field line from the front of `data`, resolving table
/// references. Dynamic references must fall below the block's required
/// insert count; anything else is a fatal `InvalidReference`.
pub fn decode_field_line(
    data: &[u8],
    prefix: &Prefix,
    table: &DynamicTable,
) -> Result<(HeaderField, usize)> {
    if data.is_empty() {
        return Err(Error::Truncated);
    }

    let first = data[0];
    let base = prefix.base;

    if first & 0x80 != 0 {
        // Indexed field line: 1 T idx(6+)
        let (index, consumed) = integer::decode(6, data)?;
        if first & 0x40 != 0 {
            let (name, value) =
                static_table::get(index).ok_or(Error::InvalidReference("static index out of range"))?;
            Ok((HeaderField::new(name, value), consumed))
        } else {
            let absolute = resolve_relative(index, base)?;
            check_covered(absolute, prefix)?;
            let field = table
                .get(absolute)
                .map_err(|_| Error::InvalidReference("dynamic index evicted or unknown"))?;
            Ok((field.clone(), consumed))
        }
    } else if first & 0xF0 == 0x10 {
        // Indexed field line with post-base index: 0001 idx(4+)
        let (index, consumed) = integer::decode(4, data)?;
        let absolute = base + index;
        check_covered(absolute, prefix)?;
        let field = table
            .get(absolute)
            .map_err(|_| Error::InvalidReference("post-base index unknown"))?;
        Ok((field.clone(), consumed))
    } else if first & 0xC0 == 0x40 {
        // Literal with name reference: 01 N T idx(4+), then value
        let (name_index, mut pos) = integer::decode(4, data)?;
        let name = if first & 0x10 != 0 {
            let (name, _) = static_table::get(name_index)
                .ok_or(Error::InvalidReference("static name index out of range"))?;
            Bytes::from_static(name)
        } else {
            let absolute = resolve_relative(name_index, base)?;
            check_covered(absolute, prefix)?;
            table
                .get(absolute)
                .map_err(|_| Error::InvalidReference("dynamic name index unknown"))?
                .name
                .clone()
        };
        let (value, consumed) = strings::decode(7, &data[pos..])?;
        pos += consumed;
        Ok((HeaderField { name, value }, pos))
    } else if first & 0xE0 == 0x20 {
        // Literal with literal name: 001 N H namelen(3+), name, value
        let (name, mut pos) = strings::decode(3, data)?;
        let (value, consumed) = strings::decode(7, &data[pos..])?;
        pos += consumed;
        Ok((HeaderField { name, value }, pos))
    } else {
        // Literal with post-base name reference: 0000 N idx(3+), then value
        let (name_index, mut pos) = integer::decode(3, data)?;
        let absolute = base + name_index;
        check_covered(absolute, prefix)?;
        let name = table
            .get(absolute)
            .map_err(|_| Error::InvalidReference("post-base name index unknown"))?
            .name
            .clone();
        let (value, consumed) = strings::decode(7, &data[pos..])?;
        pos += consumed;
        Ok((HeaderField { name, value }, pos))
    }
}

fn resolve_relative(relative: u64, base: u64) -> Result<u64> {
    base.checked_sub(relative + 1)
        .ok_or(Error::InvalidReference("relative index underflows base"))
}

fn check_covered(absolute: u64, prefix: &Prefix) -> Result<()> {
    if absolute >= prefix.required_insert_count {
        return Err(Error::InvalidReference(
            "reference not covered by required insert count",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(fields: &[(&str, &str)]) -> DynamicTable {
        let mut t = DynamicTable::new(4096);
        t.set_capacity(4096).unwrap();
        for (n, v) in fields {
            t.insert(HeaderField::new(n.to_string(), v.to_string())).unwrap();
        }
        t
    }

    #[test]
    fn prefix_roundtrip_zero() {
        let table = DynamicTable::new(4096);
        let prefix = Prefix {
            required_insert_count: 0,
            base: 0,
        };
        let mut out = Vec::new();
        prefix.encode(table.max_entries(), &mut out);
        assert_eq!(out, [0x00, 0x00]);
        let (decoded, consumed) = Prefix::decode(&out, &table).unwrap();
        assert_eq!(decoded, prefix);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn prefix_wrapped_insert_count() {
        // Capacity 256 gives max_entries 8; two insertions encode as 3.
        let mut table = DynamicTable::new(256);
        table.set_capacity(256).unwrap();
        for _ in 0..2 {
            table.insert(HeaderField::new("a", "1")).unwrap();
        }

        let prefix = Prefix {
            required_insert_count: 2,
            base: 2,
        };
        let mut out = Vec::new();
        prefix.encode(table.max_entries(), &mut out);
        assert_eq!(out, [0x03, 0x00]);

        let (decoded, _) = Prefix::decode(&out, &table).unwrap();
        assert_eq!(decoded, prefix);
    }

    #[test]
    fn prefix_negative_base() {
        let mut table = DynamicTable::new(256);
        table.set_capacity(256).unwrap();
        table.insert(HeaderField::new("a", "1")).unwrap();
        table.insert(HeaderField::new("b", "2")).unwrap();

        // Base 0 with required insert count 2: sign set, delta 1.
        let prefix = Prefix {
            required_insert_count: 2,
            base: 0,
        };
        let mut out = Vec::new();
        prefix.encode(table.max_entries(), &mut out);
        assert_eq!(out, [0x03, 0x81]);
        let (decoded, _) = Prefix::decode(&out, &table).unwrap();
        assert_eq!(decoded, prefix);
    }

    #[test]
    fn prefix_decodes_ahead_of_insertions() {
        // A block may require insertions the table has not seen yet.
        let mut table = DynamicTable::new(256);
        table.set_capacity(256).unwrap();
        let (prefix, _) = Prefix::decode(&[0x04, 0x82], &table).unwrap();
        assert_eq!(prefix.required_insert_count, 3);
        assert!(prefix.required_insert_count > table.insert_count());
    }

    #[test]
    fn nonzero_ric_with_zero_capacity_rejected() {
        let table = DynamicTable::new(0);
        assert!(Prefix::decode(&[0x01, 0x00], &table).is_err());
    }

    #[test]
    fn indexed_static_roundtrip() {
        let table = DynamicTable::new(0);
        let mut out = Vec::new();
        FieldLine::IndexedStatic { index: 17 }.encode(0, &mut out);
        assert_eq!(out, [0xD1]);

        let prefix = Prefix {
            required_insert_count: 0,
            base: 0,
        };
        let (field, consumed) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.name[..], b":method");
        assert_eq!(&field.value[..], b"GET");
        assert_eq!(consumed, 1);
    }

    #[test]
    fn indexed_dynamic_relative_and_post_base() {
        let table = table_with(&[("one", "foo"), ("two", "bar")]);

        // Base 2 covers both entries via relative references.
        let prefix = Prefix {
            required_insert_count: 2,
            base: 2,
        };
        let mut out = Vec::new();
        FieldLine::IndexedDynamic { index: 0 }.encode(prefix.base, &mut out);
        assert_eq!(out, [0x81]);
        let (field, _) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.name[..], b"one");

        // Base 0 forces post-base references.
        let prefix = Prefix {
            required_insert_count: 2,
            base: 0,
        };
        out.clear();
        FieldLine::IndexedDynamic { index: 1 }.encode(prefix.base, &mut out);
        assert_eq!(out, [0x11]);
        let (field, _) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.name[..], b"two");
    }

    #[test]
    fn literal_with_static_name_ref() {
        let table = DynamicTable::new(0);
        let mut out = Vec::new();
        FieldLine::LiteralStaticNameRef {
            name_index: 15,
            value: Bytes::from_static(b"PATCH"),
            never_indexed: false,
        }
        .encode(0, &mut out);

        let prefix = Prefix {
            required_insert_count: 0,
            base: 0,
        };
        let (field, _) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.name[..], b":method");
        assert_eq!(&field.value[..], b"PATCH");
    }

    #[test]
    fn literal_with_literal_name_roundtrip() {
        let table = DynamicTable::new(0);
        let prefix = Prefix {
            required_insert_count: 0,
            base: 0,
        };
        let mut out = Vec::new();
        FieldLine::LiteralName {
            name: Bytes::from_static(b"x-custom"),
            value: Bytes::from_static(b"v1"),
            never_indexed: false,
        }
        .encode(0, &mut out);
        let (field, consumed) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.name[..], b"x-custom");
        assert_eq!(&field.value[..], b"v1");
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn never_indexed_bit_does_not_change_decoding() {
        let table = DynamicTable::new(0);
        let prefix = Prefix {
            required_insert_count: 0,
            base: 0,
        };
        let mut out = Vec::new();
        FieldLine::LiteralName {
            name: Bytes::from_static(b"authorization"),
            value: Bytes::from_static(b"secret"),
            never_indexed: true,
        }
        .encode(0, &mut out);
        assert_eq!(out[0] & 0x10, 0x10);
        let (field, _) = decode_field_line(&out, &prefix, &table).unwrap();
        assert_eq!(&field.value[..], b"secret");
    }

    #[test]
    fn reference_beyond_required_insert_count_is_fatal() {
        let table = table_with(&[("one", "foo"), ("two", "bar")]);
        let prefix = Prefix {
            required_insert_count: 1,
            base: 2,
        };
        // Relative 0 resolves to absolute 1, not covered by RIC 1.
        let err = decode_field_line(&[0x80], &prefix, &table).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }

    #[test]
    fn evicted_reference_is_fatal() {
        let mut table = DynamicTable::new(4096);
        table.set_capacity(68).unwrap();
        for (n, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            table.insert(HeaderField::new(n, v)).unwrap();
        }
        // Absolute 0 is evicted; reference it relative to base 3.
        let prefix = Prefix {
            required_insert_count: 3,
            base: 3,
        };
        let err = decode_field_line(&[0x82], &prefix, &table).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }
}
