//! Encoder-stream and decoder-stream instructions, RFC 9204 Section 4.3.
//!
//! Encoder stream (encoder to decoder): Set Dynamic Table Capacity, Insert
//! With Name Reference, Insert With Literal Name, Duplicate.
//!
//! Decoder stream (decoder to encoder): Section Acknowledgment, Stream
//! Cancellation, Insert Count Increment.
//!
//! `decode` fails with `Truncated` when the buffer ends mid-instruction;
//! callers treat that as "wait for more bytes", never as a protocol error,
//! because the transport may split an instruction anywhere.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::{integer, strings};

/// Encoder stream instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// `001` + capacity (5-bit prefix).
    SetCapacity { capacity: u64 },
    /// `1T` + name index (6-bit prefix), then the value string.
    /// T set means the name comes from the static table.
    InsertWithNameRef {
        is_static: bool,
        name_index: u64,
        value: Bytes,
    },
    /// `01H` + name length (5-bit prefix), name, then the value string.
    InsertWithLiteralName { name: Bytes, value: Bytes },
    /// `000` + relative index (5-bit prefix).
    Duplicate { index: u64 },
}

impl EncoderInstruction {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            EncoderInstruction::SetCapacity { capacity } => {
                integer::encode(*capacity, 5, 0x20, out);
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let mask = if *is_static { 0xC0 } else { 0x80 };
                integer::encode(*name_index, 6, mask, out);
                strings::encode(value, true, 7, 0x00, out);
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                strings::encode(name, true, 5, 0x40, out);
                strings::encode(value, true, 7, 0x00, out);
            }
            EncoderInstruction::Duplicate { index } => {
                integer::encode(*index, 5, 0x00, out);
            }
        }
    }

    /// Decodes one instruction from the front of `data`.
    /// Returns `(instruction, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.is_empty() {
            return Err(Error::Truncated);
        }

        let first = data[0];
        if first & 0x80 != 0 {
            let is_static = first & 0x40 != 0;
            let (name_index, mut pos) = integer::decode(6, data)?;
            let (value, consumed) = strings::decode(7, &data[pos..])?;
            pos += consumed;
            Ok((
                EncoderInstruction::InsertWithNameRef {
                    is_static,
                    name_index,
                    value,
                },
                pos,
            ))
        } else if first & 0xC0 == 0x40 {
            let (name, mut pos) = strings::decode(5, data)?;
            let (value, consumed) = strings::decode(7, &data[pos..])?;
            pos += consumed;
            Ok((EncoderInstruction::InsertWithLiteralName { name, value }, pos))
        } else if first & 0xE0 == 0x20 {
            let (capacity, pos) = integer::decode(5, data)?;
            Ok((EncoderInstruction::SetCapacity { capacity }, pos))
        } else {
            let (index, pos) = integer::decode(5, data)?;
            Ok((EncoderInstruction::Duplicate { index }, pos))
        }
    }
}

/// Decoder stream instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// `1` + stream id (7-bit prefix).
    SectionAck { stream_id: u64 },
    /// `01` + stream id (6-bit prefix).
    StreamCancel { stream_id: u64 },
    /// `00` + increment (6-bit prefix).
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DecoderInstruction::SectionAck { stream_id } => {
                integer::encode(*stream_id, 7, 0x80, out);
            }
            DecoderInstruction::StreamCancel { stream_id } => {
                integer::encode(*stream_id, 6, 0x40, out);
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                integer::encode(*increment, 6, 0x00, out);
            }
        }
    }

    /// Decodes one instruction from the front of `data`.
    /// Returns `(instruction, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.is_empty() {
            return Err(Error::Truncated);
        }

        let first = data[0];
        if first & 0x80 != 0 {
            let (stream_id, pos) = integer::decode(7, data)?;
            Ok((DecoderInstruction::SectionAck { stream_id }, pos))
        } else if first & 0x40 != 0 {
            let (stream_id, pos) = integer::decode(6, data)?;
            Ok((DecoderInstruction::StreamCancel { stream_id }, pos))
        } else {
            let (increment, pos) = integer::decode(6, data)?;
            Ok((DecoderInstruction::InsertCountIncrement { increment }, pos))
        }
    }
}
