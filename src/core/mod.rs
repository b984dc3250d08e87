//! # Core Codec Components
//!
//! Buffer primitives, the type-code registry, and the object graph codec.
//!
//! This module is the serialization engine underneath the transport: it
//! turns registered object graphs into a compact tagged binary form and
//! back.
//!
//! ## Components
//! - **Buffer**: append-only write buffer and underflow-checked read buffer
//! - **Registry**: type-to-code table plus erased codec entries
//! - **Object**: self-describing tagged values over the buffer primitives
//!
//! ## Wire Format
//! ```text
//! [NullFlag(1)] [Tag(1)] [Code(2) | NameLen(4) + Name(N)] [Payload(...)]
//! ```
//!
//! ## Security
//! - Length prefixes are validated against the remaining input before use
//! - Pre-allocation from untrusted counts is capped
//! - Reading past the declared length is an error, never zero-filled

pub mod buffer;
pub mod object;
pub mod registry;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use object::{
    decode_with_serde, downcast_message, encode_with_serde, Message, ObjectReader, ObjectWriter,
    Wire,
};
pub use registry::{CodecEntry, CodecRegistry};
