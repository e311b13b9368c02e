//! Error types for QPACK operations.
//!
//! A single error enum covers the whole engine. Variants fall into the four
//! classes the protocol distinguishes: fatal protocol violations (connection
//! must be torn down), the `Blocked` control-flow signal, local usage errors,
//! and local capacity/size errors. `is_fatal` and `is_blocked` classify them.

use thiserror::Error;

/// Result type for QPACK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during QPACK operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Prefixed-integer continuation exceeds 2^62 - 1.
    ///
    /// Maps to HTTP/3 error code `QPACK_DECOMPRESSION_FAILED` (0x0200)
    /// when raised from a field section.
    #[error("prefixed integer overflows 62 bits")]
    IntegerOverflow,

    /// Prefixed-integer continuation does not terminate within the
    /// permitted number of bytes.
    #[error("prefixed integer continuation too long")]
    MalformedInteger,

    /// Invalid Huffman code sequence or padding.
    #[error("huffman decode failed: {0}")]
    HuffmanDecode(&'static str),

    /// Input ended before the current item was complete.
    ///
    /// Inside the engine this doubles as the need-more-bytes signal while
    /// decoding instruction streams; those paths buffer the partial bytes
    /// instead of surfacing it. When it does reach the caller it means a
    /// header block was cut short, which is fatal.
    #[error("truncated input")]
    Truncated,

    /// A field line referenced a table entry that is out of range, evicted,
    /// or not covered by the block's required insert count.
    ///
    /// Fatal: table state is no longer verifiable.
    #[error("invalid table reference: {0}")]
    InvalidReference(&'static str),

    /// Absolute index refers to an entry that was evicted or never inserted.
    #[error("unknown dynamic table index {0}")]
    UnknownIndex(u64),

    /// Entry does not fit the dynamic table even when empty.
    #[error("entry of {size} bytes exceeds table capacity {capacity}")]
    EntryTooLarge { size: usize, capacity: usize },

    /// Eviction needed for a capacity change (or insertion) is blocked by an
    /// entry still referenced by an unacknowledged field section.
    #[error("cannot evict entry {index}: referenced by an unacknowledged section")]
    CapacityReductionBlocked { index: u64 },

    /// Malformed bytes or invalid reference on the encoder stream.
    ///
    /// Maps to HTTP/3 error code `QPACK_ENCODER_STREAM_ERROR` (0x0201).
    #[error("encoder stream error: {0}")]
    EncoderInstruction(&'static str),

    /// Malformed bytes or out-of-range value on the decoder stream.
    ///
    /// Maps to HTTP/3 error code `QPACK_DECODER_STREAM_ERROR` (0x0202).
    #[error("decoder stream error: {0}")]
    DecoderInstruction(&'static str),

    /// A header block for this stream is already pending.
    #[error("a header block for stream {0} is already pending")]
    DuplicateStreamBlock(u64),

    /// `resume_header` was called for a stream with no pending block.
    #[error("no pending header block for stream {0}")]
    NoSuchPendingBlock(u64),

    /// Accepting another blocked stream would exceed the negotiated limit.
    #[error("blocked streams limit exceeded: {count} > {limit}")]
    TooManyBlockedStreams { count: usize, limit: usize },

    /// An encode call exceeded the engine's bounded output buffers.
    ///
    /// Local to the call; the caller may retry with fewer or smaller fields.
    #[error("encode failed: {0}")]
    EncodeFailed(&'static str),

    /// The stream's header block references insertions the table has not yet
    /// received. Not a failure: retry `resume_header` once `feed_encoder`
    /// reports the stream unblocked.
    #[error("stream {0} is blocked on dynamic table insertions")]
    Blocked(u64),
}

impl Error {
    /// Returns true if this is the `Blocked` control-flow signal.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked(_))
    }

    /// Returns true for protocol violations that require tearing down the
    /// connection. After one of these the engine's instruction-processing
    /// state is undefined.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IntegerOverflow
                | Error::MalformedInteger
                | Error::HuffmanDecode(_)
                | Error::Truncated
                | Error::InvalidReference(_)
                | Error::EncoderInstruction(_)
                | Error::DecoderInstruction(_)
        )
    }

    /// Returns the HTTP/3 error code to surface for this error.
    pub fn error_code(&self) -> u64 {
        match self {
            Error::EncoderInstruction(_) => 0x0201,
            Error::DecoderInstruction(_) => 0x0202,
            _ => 0x0200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_is_a_signal_not_a_failure() {
        let err = Error::Blocked(42);
        assert!(err.is_blocked());
        assert!(!err.is_fatal());
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(Error::IntegerOverflow.is_fatal());
        assert!(Error::InvalidReference("x").is_fatal());
        assert!(Error::EncoderInstruction("x").is_fatal());
        assert!(!Error::DuplicateStreamBlock(0).is_fatal());
        assert!(!Error::EntryTooLarge { size: 99, capacity: 0 }.is_fatal());
    }

    #[test]
    fn error_codes() {
        assert_eq!(Error::EncoderInstruction("x").error_code(), 0x0201);
        assert_eq!(Error::DecoderInstruction("x").error_code(), 0x0202);
        assert_eq!(Error::InvalidReference("x").error_code(), 0x0200);
    }
}
