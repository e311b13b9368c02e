//! QPACK: field compression for HTTP/3 (RFC 9204), sans I/O.
//!
//! This crate implements the QPACK codec and synchronization engine: the
//! dynamic table, the encoder and decoder state machines, the header block
//! wire format, and blocked-stream queuing and resumption. It performs no
//! I/O and owns no streams; the caller shuttles three kinds of byte buffers
//! between the two sides:
//!
//! - the **encoder stream**, carrying dynamic table updates,
//! - the **decoder stream**, carrying acknowledgments back, and
//! - per-request **header blocks**.
//!
//! The transport must deliver each instruction stream reliably and in order,
//! but nothing is assumed about ordering between streams: a header block may
//! arrive before the insertions it references. The decoder then parks it and
//! signals [`Error::Blocked`]; once `feed_encoder` reports the stream
//! resumable, the caller finishes it with `resume_header`.
//!
//! # Example
//!
//! ```rust
//! use qpack_sans_io::{Decoder, Encoder, Error};
//!
//! let mut encoder = Encoder::new();
//! let mut decoder = Decoder::new(4096, 16);
//!
//! // Negotiate the table and send the setup instruction to the decoder.
//! let setup = encoder.configure(4096, 16)?;
//! decoder.feed_encoder(&setup)?;
//!
//! let headers: &[(&[u8], &[u8])] = &[(b":method", b"GET"), (b"x-custom", b"v1")];
//! let (control, block) = encoder.encode(0, 0, headers)?;
//! decoder.feed_encoder(&control)?;
//!
//! let (acks, fields) = decoder.feed_header(0, &block)?;
//! assert_eq!(fields.len(), 2);
//! encoder.acknowledge(&acks)?;
//! # Ok::<(), Error>(())
//! ```
//!
//! Each `Encoder`/`Decoder` pair is independent per-connection state; drive
//! a single instance from one logical thread at a time.

pub mod blocked;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod field;
pub mod header_block;
pub mod huffman;
pub mod instructions;
pub mod integer;
pub mod static_table;
pub mod strings;
pub mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use field::HeaderField;
pub use table::DynamicTable;
