//! String-literal encoding and decoding.
//!
//! A QPACK string literal is a Huffman flag, a prefixed-integer length, and
//! the literal or Huffman-coded bytes. The flag sits one bit above the length
//! prefix, so the same routines serve every instruction and field-line
//! representation by taking the prefix width and the opcode bits to preserve.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::{huffman, integer};

/// Maximum decoded length of a single string literal. A guard against
/// absurd length declarations, far above any real header field.
const MAX_STRING_LEN: usize = 1 << 20;

/// Encodes `data` as a string literal with an N-bit length prefix,
/// preserving `prefix_mask` above the prefix and the Huffman flag.
///
/// Huffman coding is applied when requested and it actually shrinks the
/// string; otherwise the raw bytes are emitted with the flag clear.
pub fn encode(data: &[u8], try_huffman: bool, prefix_bits: u8, prefix_mask: u8, out: &mut Vec<u8>) {
    debug_assert!(prefix_bits <= 7, "the Huffman flag needs a bit above the prefix");
    let huffman_bit = 1u8 << prefix_bits;

    if try_huffman {
        let coded_len = huffman::encoded_len(data);
        if coded_len < data.len() {
            integer::encode(coded_len as u64, prefix_bits, prefix_mask | huffman_bit, out);
            huffman::encode(data, out);
            return;
        }
    }

    integer::encode(data.len() as u64, prefix_bits, prefix_mask, out);
    out.extend_from_slice(data);
}

/// Decodes a string literal with an N-bit length prefix from the front of
/// `data`. Returns `(string, bytes_consumed)`.
pub fn decode(prefix_bits: u8, data: &[u8]) -> Result<(Bytes, usize)> {
    debug_assert!(prefix_bits <= 7);

    if data.is_empty() {
        return Err(Error::Truncated);
    }

    let huffman = data[0] & (1u8 << prefix_bits) != 0;
    let (len, consumed) = integer::decode(prefix_bits, data)?;
    let len = len as usize;

    if len > MAX_STRING_LEN {
        return Err(Error::MalformedInteger);
    }
    if consumed + len > data.len() {
        return Err(Error::Truncated);
    }

    let raw = &data[consumed..consumed + len];
    let value = if huffman {
        let mut decoded = Vec::with_capacity(len * 2);
        huffman::decode(raw, &mut decoded)?;
        Bytes::from(decoded)
    } else {
        Bytes::copy_from_slice(raw)
    };

    Ok((value, consumed + len))
}
