//! The encoder engine.
//!
//! Turns header lists into dynamic-table instructions plus an indexed or
//! literal header block, while guaranteeing two invariants: no entry
//! referenced by an unacknowledged section is ever evicted (reference pins),
//! and the number of streams blocked or at risk of blocking at the decoder
//! never exceeds the negotiated limit. At the limit the encoder still
//! inserts useful entries but encodes the field itself literally instead of
//! referencing an unacknowledged insertion.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::field::HeaderField;
use crate::header_block::{FieldLine, Prefix};
use crate::instructions::{DecoderInstruction, EncoderInstruction};
use crate::static_table;
use crate::table::DynamicTable;

/// Output ceiling per encode call for each of the two buffers. A resource
/// bound, not a protocol constant.
const OUT_BUF_LIMIT: usize = 4096;

/// An emitted field section awaiting Section Acknowledgment.
struct Section {
    seqno: u64,
    required_insert_count: u64,
    /// Distinct absolute indices the section references; pinned in the
    /// table until settled.
    refs: Vec<u64>,
}

/// QPACK encoder for one connection.
pub struct Encoder {
    table: DynamicTable,
    max_blocked_streams: usize,
    /// Unacknowledged sections per stream, oldest first; Section
    /// Acknowledgment settles the front.
    unacked: HashMap<u64, Vec<Section>>,
    /// Unconsumed tail of the decoder stream.
    decoder_stream: BytesMut,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Creates an encoder with a zero-capacity table: until `configure` is
    /// called everything encodes as static references or literals.
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(0),
            max_blocked_streams: 0,
            unacked: HashMap::new(),
            decoder_stream: BytesMut::new(),
        }
    }

    /// Read-only view of the dynamic table.
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Applies the peer decoder's SETTINGS and returns the Set Dynamic Table
    /// Capacity instruction to send on the encoder stream.
    ///
    /// May be called again mid-connection; shrinking below entries pinned by
    /// unacknowledged sections fails with `CapacityReductionBlocked`.
    pub fn configure(
        &mut self,
        max_table_capacity: usize,
        max_blocked_streams: usize,
    ) -> Result<Bytes> {
        if max_table_capacity > self.table.max_capacity() {
            self.table.set_max_capacity(max_table_capacity);
        }
        self.table.set_capacity(max_table_capacity)?;
        self.table.set_max_capacity(max_table_capacity);
        self.max_blocked_streams = max_blocked_streams;

        let mut out = Vec::new();
        EncoderInstruction::SetCapacity {
            capacity: max_table_capacity as u64,
        }
        .encode(&mut out);
        debug!(max_table_capacity, max_blocked_streams, "encoder configured");
        Ok(Bytes::from(out))
    }

    /// Encodes a header list for one field section of a stream.
    ///
    /// Returns `(encoder_stream_bytes, header_block_bytes)`: any table
    /// update instructions emitted as a side effect, and the header block
    /// itself. Fields keep their original order in the block.
    pub fn encode(
        &mut self,
        stream_id: u64,
        seqno: u64,
        headers: &[(&[u8], &[u8])],
    ) -> Result<(Bytes, Bytes)> {
        // Worst-case output bound, checked before any table mutation so a
        // failed call leaves both tables in sync. Each field costs at most
        // its raw bytes plus small integer prefixes in either buffer.
        let bound: usize = headers
            .iter()
            .map(|(name, value)| name.len() + value.len() + 24)
            .sum::<usize>()
            + 16;
        if bound > OUT_BUF_LIMIT {
            return Err(Error::EncodeFailed("output buffer limit exceeded"));
        }

        let can_risk = self.stream_may_risk(stream_id);
        let mut instructions = Vec::new();
        let mut lines = Vec::with_capacity(headers.len());
        let mut refs: Vec<u64> = Vec::new();

        for &(name, value) in headers {
            let line = self.encode_field(name, value, can_risk, &mut instructions, &mut refs)?;
            lines.push(line);
        }

        let required_insert_count = refs.iter().max().map_or(0, |max| max + 1);
        let base = required_insert_count;
        let prefix = Prefix {
            required_insert_count,
            base,
        };

        let mut block = Vec::new();
        prefix.encode(self.table.max_entries(), &mut block);
        for line in &lines {
            line.encode(base, &mut block);
        }

        if required_insert_count > 0 {
            refs.sort_unstable();
            refs.dedup();
            for &index in &refs {
                self.table.pin(index);
            }
            self.unacked.entry(stream_id).or_default().push(Section {
                seqno,
                required_insert_count,
                refs,
            });
            trace!(
                stream_id,
                seqno,
                required_insert_count,
                "section references dynamic table"
            );
        }

        Ok((Bytes::from(instructions), Bytes::from(block)))
    }

    /// Encodes one field, choosing in order: static exact match, dynamic
    /// exact match, static name match, dynamic name match, insertion, plain
    /// literal.
    fn encode_field(
        &mut self,
        name: &[u8],
        value: &[u8],
        can_risk: bool,
        instructions: &mut Vec<u8>,
        refs: &mut Vec<u64>,
    ) -> Result<FieldLine> {
        if let Some(index) = static_table::find_exact(name, value) {
            return Ok(FieldLine::IndexedStatic { index });
        }

        if let Some(index) = self.table.find_exact(name, value) {
            if self.may_reference(index, can_risk) {
                refs.push(index);
                return Ok(FieldLine::IndexedDynamic { index });
            }
            if self.table.is_draining(index) && can_risk {
                if let Some(index) = self.refresh_draining(index, instructions)? {
                    refs.push(index);
                    return Ok(FieldLine::IndexedDynamic { index });
                }
            }
            // Entry unusable for this section; encode by name below.
        }

        if let Some(name_index) = static_table::find_name(name) {
            return Ok(FieldLine::LiteralStaticNameRef {
                name_index,
                value: Bytes::copy_from_slice(value),
                never_indexed: false,
            });
        }

        if let Some(name_index) = self.table.find_name(name) {
            if self.may_reference(name_index, can_risk) {
                refs.push(name_index);
                return Ok(FieldLine::LiteralDynamicNameRef {
                    name_index,
                    value: Bytes::copy_from_slice(value),
                    never_indexed: false,
                });
            }
        }

        if self.should_insert(name, value) {
            let index = self.insert(name, value, instructions)?;
            if can_risk {
                refs.push(index);
                return Ok(FieldLine::IndexedDynamic { index });
            }
            // Inserted for later sections; this one stays literal so the
            // decoder cannot block on it.
        }

        Ok(FieldLine::LiteralName {
            name: Bytes::copy_from_slice(name),
            value: Bytes::copy_from_slice(value),
            never_indexed: false,
        })
    }

    /// Whether a section of this stream may reference unacknowledged
    /// insertions: either the stream is already at risk, or the at-risk
    /// budget has headroom.
    fn stream_may_risk(&self, stream_id: u64) -> bool {
        if self.stream_at_risk(stream_id) {
            return true;
        }
        self.at_risk_streams() < self.max_blocked_streams
    }

    fn stream_at_risk(&self, stream_id: u64) -> bool {
        let known = self.table.known_received_count();
        self.unacked
            .get(&stream_id)
            .is_some_and(|sections| sections.iter().any(|s| s.required_insert_count > known))
    }

    fn at_risk_streams(&self) -> usize {
        let known = self.table.known_received_count();
        self.unacked
            .values()
            .filter(|sections| sections.iter().any(|s| s.required_insert_count > known))
            .count()
    }

    /// A reference is safe when the entry is not draining and is either
    /// acknowledged or the stream may take blocking risk.
    fn may_reference(&self, index: u64, can_risk: bool) -> bool {
        if self.table.is_draining(index) {
            return false;
        }
        index < self.table.known_received_count() || can_risk
    }

    fn should_insert(&self, name: &[u8], value: &[u8]) -> bool {
        let size = name.len() + value.len() + 32;
        if size > self.table.capacity() {
            return false;
        }
        // Already present: the exact match was simply unreferencable for
        // this section, which a second copy would not fix.
        if self.table.find_exact(name, value).is_some() {
            return false;
        }
        let room = self.table.capacity() - self.table.used_size();
        self.table.can_free(size.saturating_sub(room))
    }

    /// Inserts an entry, emitting the cheapest insert instruction for it.
    /// The instruction is written only after the table accepts the entry.
    fn insert(&mut self, name: &[u8], value: &[u8], instructions: &mut Vec<u8>) -> Result<u64> {
        let name_ref = static_table::find_name(name)
            .map(|idx| (true, idx))
            .or_else(|| {
                self.table
                    .find_name(name)
                    .filter(|&idx| !self.table.is_draining(idx))
                    .map(|idx| (false, self.table.insert_count() - idx - 1))
            });

        let field = HeaderField::new(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
        let index = self.table.insert(field)?;
        trace!(index, "encoder inserted entry");

        match name_ref {
            Some((is_static, name_index)) => EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value: Bytes::copy_from_slice(value),
            }
            .encode(instructions),
            None => EncoderInstruction::InsertWithLiteralName {
                name: Bytes::copy_from_slice(name),
                value: Bytes::copy_from_slice(value),
            }
            .encode(instructions),
        }

        Ok(index)
    }

    /// Re-inserts a draining entry via Duplicate so new sections reference
    /// the fresh copy. Returns None when the table cannot take the copy.
    fn refresh_draining(
        &mut self,
        index: u64,
        instructions: &mut Vec<u8>,
    ) -> Result<Option<u64>> {
        let size = self.table.get(index)?.size();
        let room = self.table.capacity() - self.table.used_size();
        if !self.table.can_free(size.saturating_sub(room)) {
            return Ok(None);
        }

        let relative = self.table.insert_count() - index - 1;
        let fresh = self.table.duplicate(index)?;
        EncoderInstruction::Duplicate { index: relative }.encode(instructions);
        trace!(from = index, to = fresh, "duplicated draining entry");
        Ok(Some(fresh))
    }

    /// Processes decoder-stream bytes: Section Acknowledgment, Stream
    /// Cancellation, Insert Count Increment. Partial instructions are
    /// buffered until more bytes arrive.
    pub fn acknowledge(&mut self, data: &[u8]) -> Result<()> {
        self.decoder_stream.extend_from_slice(data);

        loop {
            let (instruction, consumed) = match DecoderInstruction::decode(&self.decoder_stream) {
                Ok(decoded) => decoded,
                Err(Error::Truncated) => break,
                Err(err) => return Err(err),
            };
            let _ = self.decoder_stream.split_to(consumed);
            self.apply_acknowledgment(instruction)?;
        }

        Ok(())
    }

    fn apply_acknowledgment(&mut self, instruction: DecoderInstruction) -> Result<()> {
        trace!(?instruction, "decoder stream instruction");
        match instruction {
            DecoderInstruction::SectionAck { stream_id } => {
                let sections = self
                    .unacked
                    .get_mut(&stream_id)
                    .filter(|s| !s.is_empty())
                    .ok_or(Error::DecoderInstruction("acknowledgment for unknown section"))?;
                let section = sections.remove(0);
                if sections.is_empty() {
                    self.unacked.remove(&stream_id);
                }
                debug!(stream_id, seqno = section.seqno, "section acknowledged");
                self.table.update_known_received(section.required_insert_count)?;
                for index in section.refs {
                    self.table.unpin(index);
                }
            }
            DecoderInstruction::StreamCancel { stream_id } => {
                if let Some(sections) = self.unacked.remove(&stream_id) {
                    debug!(stream_id, "stream cancelled by decoder");
                    for section in sections {
                        for index in section.refs {
                            self.table.unpin(index);
                        }
                    }
                }
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                if increment == 0 {
                    return Err(Error::DecoderInstruction("zero insert count increment"));
                }
                let updated = self
                    .table
                    .known_received_count()
                    .checked_add(increment)
                    .ok_or(Error::DecoderInstruction("insert count increment overflows"))?;
                self.table.update_known_received(updated)?;
            }
        }
        Ok(())
    }
}
