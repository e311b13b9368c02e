//! The decoder engine.
//!
//! Applies encoder-stream instructions to the local table mirror, parses
//! header blocks against it, parks blocks that reference insertions not yet
//! received, and produces the decoder-stream bytes that acknowledge progress
//! to the peer encoder.
//!
//! Nothing here suspends: a blocked block surfaces as the `Blocked` error
//! and the caller re-invokes `resume_header` after `feed_encoder` has
//! reported the stream resumable.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::blocked::{BlockedQueue, PendingBlock};
use crate::error::{Error, Result};
use crate::field::HeaderField;
use crate::header_block::{self, Prefix};
use crate::instructions::{DecoderInstruction, EncoderInstruction};
use crate::table::DynamicTable;
use crate::static_table;

/// QPACK decoder for one connection.
pub struct Decoder {
    table: DynamicTable,
    max_blocked_streams: usize,
    blocked: BlockedQueue,
    /// Unconsumed tail of the encoder stream; an instruction may arrive
    /// split across feeds.
    encoder_stream: BytesMut,
    /// Highest insert count already conveyed to the encoder via Section
    /// Acknowledgment or Insert Count Increment.
    conveyed_insert_count: u64,
}

impl Decoder {
    /// Creates a decoder advertising `max_table_capacity` and
    /// `max_blocked_streams`, matching the SETTINGS sent to the peer.
    pub fn new(max_table_capacity: usize, max_blocked_streams: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_capacity),
            max_blocked_streams,
            blocked: BlockedQueue::new(),
            encoder_stream: BytesMut::new(),
            conveyed_insert_count: 0,
        }
    }

    /// Read-only view of the table mirror.
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Number of header blocks currently parked.
    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    /// Applies encoder-stream bytes in arrival order and returns the streams
    /// whose blocks became resumable. Resumption itself is left to the
    /// caller via `resume_header`.
    pub fn feed_encoder(&mut self, data: &[u8]) -> Result<Vec<u64>> {
        self.encoder_stream.extend_from_slice(data);

        loop {
            let (instruction, consumed) = match EncoderInstruction::decode(&self.encoder_stream) {
                Ok(decoded) => decoded,
                Err(Error::Truncated) => break,
                Err(err) => return Err(err),
            };
            let _ = self.encoder_stream.split_to(consumed);
            self.apply_instruction(instruction)?;
        }

        let unblocked = self.blocked.newly_satisfied(self.table.insert_count());
        if !unblocked.is_empty() {
            debug!(streams = ?unblocked, "blocked streams became resumable");
        }
        Ok(unblocked)
    }

    fn apply_instruction(&mut self, instruction: EncoderInstruction) -> Result<()> {
        trace!(?instruction, "encoder stream instruction");
        match instruction {
            EncoderInstruction::SetCapacity { capacity } => {
                self.table.set_capacity(capacity as usize)?;
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let name = if is_static {
                    let (name, _) = static_table::get(name_index)
                        .ok_or(Error::EncoderInstruction("static name reference out of range"))?;
                    Bytes::from_static(name)
                } else {
                    self.table
                        .get_relative(name_index)
                        .map_err(|_| Error::EncoderInstruction("dynamic name reference evicted"))?
                        .name
                        .clone()
                };
                self.table
                    .insert(HeaderField { name, value })
                    .map_err(|_| Error::EncoderInstruction("insertion exceeds table capacity"))?;
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                self.table
                    .insert(HeaderField { name, value })
                    .map_err(|_| Error::EncoderInstruction("insertion exceeds table capacity"))?;
            }
            EncoderInstruction::Duplicate { index } => {
                let absolute = self
                    .table
                    .insert_count()
                    .checked_sub(index + 1)
                    .ok_or(Error::EncoderInstruction("duplicate index out of range"))?;
                self.table
                    .duplicate(absolute)
                    .map_err(|_| Error::EncoderInstruction("duplicate of evicted entry"))?;
            }
        }
        Ok(())
    }

    /// Submits the complete header block for a stream.
    ///
    /// Returns the decoder-stream bytes to transmit and the decoded fields,
    /// or signals `Blocked` after parking the block. At most one block may
    /// be pending per stream.
    pub fn feed_header(&mut self, stream_id: u64, data: &[u8]) -> Result<(Bytes, Vec<HeaderField>)> {
        if self.blocked.contains(stream_id) {
            return Err(Error::DuplicateStreamBlock(stream_id));
        }

        let (prefix, cursor) = Prefix::decode(data, &self.table)?;

        if prefix.required_insert_count > self.table.insert_count() {
            debug!(
                stream_id,
                required = prefix.required_insert_count,
                have = self.table.insert_count(),
                "header block blocked"
            );
            self.blocked.push(
                PendingBlock {
                    stream_id,
                    data: Bytes::copy_from_slice(data),
                    cursor,
                    prefix,
                    notified: false,
                },
                self.max_blocked_streams,
            )?;
            return Err(Error::Blocked(stream_id));
        }

        self.parse_block(stream_id, data, cursor, prefix)
    }

    /// Continues a previously blocked header block.
    ///
    /// Signals `Blocked` again while the table is still behind; otherwise
    /// completes the parse and removes the block, succeed or fail.
    pub fn resume_header(&mut self, stream_id: u64) -> Result<(Bytes, Vec<HeaderField>)> {
        let satisfied = self
            .blocked
            .get(stream_id)
            .ok_or(Error::NoSuchPendingBlock(stream_id))?
            .prefix
            .required_insert_count
            <= self.table.insert_count();
        if !satisfied {
            return Err(Error::Blocked(stream_id));
        }

        let Some(block) = self.blocked.remove(stream_id) else {
            return Err(Error::NoSuchPendingBlock(stream_id));
        };
        self.parse_block(stream_id, &block.data, block.cursor, block.prefix)
    }

    /// Abandons a stream's block, if any, and produces the Stream
    /// Cancellation instruction telling the encoder to release its
    /// references.
    pub fn cancel_stream(&mut self, stream_id: u64) -> Bytes {
        if self.blocked.remove(stream_id).is_some() {
            debug!(stream_id, "cancelled blocked stream");
        }
        let mut out = Vec::new();
        DecoderInstruction::StreamCancel { stream_id }.encode(&mut out);
        Bytes::from(out)
    }

    fn parse_block(
        &mut self,
        stream_id: u64,
        data: &[u8],
        mut cursor: usize,
        prefix: Prefix,
    ) -> Result<(Bytes, Vec<HeaderField>)> {
        let mut fields = Vec::new();
        while cursor < data.len() {
            let (field, consumed) =
                header_block::decode_field_line(&data[cursor..], &prefix, &self.table)?;
            fields.push(field);
            cursor += consumed;
        }

        trace!(stream_id, count = fields.len(), "header block decoded");
        Ok((self.acknowledge(stream_id, &prefix), fields))
    }

    /// Builds the decoder-stream bytes for a completed section: a Section
    /// Acknowledgment when the block referenced the table, then an Insert
    /// Count Increment for any processed insertions the acknowledgment does
    /// not already convey.
    fn acknowledge(&mut self, stream_id: u64, prefix: &Prefix) -> Bytes {
        let mut out = Vec::new();

        if prefix.required_insert_count > 0 {
            DecoderInstruction::SectionAck { stream_id }.encode(&mut out);
            if prefix.required_insert_count > self.conveyed_insert_count {
                self.conveyed_insert_count = prefix.required_insert_count;
            }
        }

        let insert_count = self.table.insert_count();
        if insert_count > self.conveyed_insert_count {
            DecoderInstruction::InsertCountIncrement {
                increment: insert_count - self.conveyed_insert_count,
            }
            .encode(&mut out);
            self.conveyed_insert_count = insert_count;
        }

        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> Decoder {
        Decoder::new(0x100, 0x10)
    }

    #[test]
    fn decode_static_indexed() {
        let mut dec = decoder();
        // RIC 0, base 0, then static index 17 (:method: GET).
        let (ack, fields) = dec.feed_header(0, &[0x00, 0x00, 0xD1]).unwrap();
        assert!(ack.is_empty());
        assert_eq!(fields.len(), 1);
        assert_eq!(&fields[0].name[..], b":method");
        assert_eq!(&fields[0].value[..], b"GET");
    }

    #[test]
    fn decode_literal_with_literal_name() {
        let mut dec = decoder();
        let data = [
            0x00, 0x00, // prefix
            0x24, b't', b'e', b's', b't', // literal name, 4 raw bytes
            0x05, b'v', b'a', b'l', b'u', b'e',
        ];
        let (_, fields) = dec.feed_header(0, &data).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(&fields[0].name[..], b"test");
        assert_eq!(&fields[0].value[..], b"value");
    }

    #[test]
    fn empty_block_is_truncated() {
        let mut dec = decoder();
        assert_eq!(dec.feed_header(0, &[]).unwrap_err(), Error::Truncated);
    }

    #[test]
    fn partial_instruction_across_feeds() {
        let mut dec = decoder();
        let mut control = Vec::new();
        EncoderInstruction::SetCapacity { capacity: 0x100 }.encode(&mut control);
        EncoderInstruction::InsertWithLiteralName {
            name: Bytes::from_static(b"alpha"),
            value: Bytes::from_static(b"beta"),
        }
        .encode(&mut control);

        // Feed byte by byte: no instruction may be applied early or twice.
        for &byte in &control[..control.len() - 1] {
            dec.feed_encoder(&[byte]).unwrap();
        }
        assert_eq!(dec.table().insert_count(), 0);
        dec.feed_encoder(&control[control.len() - 1..]).unwrap();
        assert_eq!(dec.table().insert_count(), 1);
        assert_eq!(&dec.table().get(0).unwrap().name[..], b"alpha");
    }

    #[test]
    fn malformed_encoder_stream_is_fatal() {
        let mut dec = decoder();
        // Insert With Name Ref pointing at a dynamic entry that was never
        // inserted.
        let mut control = Vec::new();
        EncoderInstruction::InsertWithNameRef {
            is_static: false,
            name_index: 0,
            value: Bytes::from_static(b"v"),
        }
        .encode(&mut control);
        let err = dec.feed_encoder(&control).unwrap_err();
        assert!(matches!(err, Error::EncoderInstruction(_)));
    }

    #[test]
    fn duplicate_instruction_applies_to_mirror() {
        let mut dec = decoder();
        let mut control = Vec::new();
        EncoderInstruction::SetCapacity { capacity: 0x100 }.encode(&mut control);
        EncoderInstruction::InsertWithLiteralName {
            name: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        }
        .encode(&mut control);
        EncoderInstruction::Duplicate { index: 0 }.encode(&mut control);
        dec.feed_encoder(&control).unwrap();
        assert_eq!(dec.table().insert_count(), 2);
        assert_eq!(dec.table().get(1).unwrap(), dec.table().get(0).unwrap());
    }

    #[test]
    fn cancel_emits_stream_cancellation() {
        let mut dec = decoder();
        let bytes = dec.cancel_stream(5);
        assert_eq!(&bytes[..], [0x45]);
    }
}
