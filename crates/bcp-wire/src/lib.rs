//! The Basic Chat Protocol (BCP) wire format: four length-prefixed frames
//! carried over a byte stream. This crate is pure: no sockets, no threads,
//! just encoding and incremental decoding.

mod decode;
mod encode;
mod frame;

pub use decode::{FrameReader, Outcome};
pub use encode::{encode, encode_into};
pub use frame::{Frame, Opcode, WireError, MAX_STR};
