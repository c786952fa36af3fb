//! Wire codec: framing, CRC, payload views, canonicalization.
//!
//! The transport is a byte stream of frames
//! `SYNC | TYPE/VER | LEN | PAYLOAD | CRC16-LE`, CRC computed over
//! TYPE/VER + LEN + PAYLOAD. [`frame::FrameCodec`] turns arbitrary byte
//! chunks into decoded frames; [`event`] turns EVENT16/EVENT24 payloads
//! into canonical records and gives the routed packet types typed views.

pub mod crc;
pub mod event;
pub mod frame;

pub use crc::crc16_ccitt_false;
pub use event::{
    CanonicalEvent, EventFlags, FilterStats, ImpulsePacket, LinkStats, RawEvent, Summary16,
    Summary24, canonicalize, decode_flags,
};
pub use frame::{DecodedFrame, FrameCodec};
