//! Frame stream decoder: SYNC scan, length gate, per-frame CRC.
//!
//! `push_bytes` accepts arbitrary chunk boundaries; `drain` yields the
//! frames completed so far. A CRC mismatch discards only the candidate
//! frame — the buffer keeps parsing, so one corrupted frame costs exactly
//! one frame. A misaligned SYNC costs at most one frame before resync.

use rotor_common::consts::{FRAME_HEADER_LEN, FRAME_OVERHEAD, SYNC};
use rotor_common::types::PacketType;
use tracing::trace;

use super::crc::crc16_ccitt_false;

/// One successfully decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Packet type from the upper nibble of TYPE/VER.
    pub packet_type: PacketType,
    /// Version from the lower nibble of TYPE/VER.
    pub version: u8,
    /// Payload bytes (length = LEN field).
    pub payload: Vec<u8>,
}

/// Decoder counters, exposed for telemetry sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodecStats {
    /// Frames decoded and emitted.
    pub frames_decoded: u64,
    /// Candidate frames discarded on CRC mismatch.
    pub crc_errors: u64,
    /// Bytes dropped while scanning for SYNC.
    pub resync_bytes_dropped: u64,
    /// CRC-valid frames with an unknown type nibble, dropped.
    pub unknown_type_frames: u64,
}

/// Streaming frame decoder.
///
/// Feed with [`FrameCodec::push_bytes`], then consume completed frames via
/// [`FrameCodec::drain`]. Non-blocking; owns a single internal byte buffer.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
    frames: Vec<DecodedFrame>,
    stats: FrameCodecStats,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder counters so far.
    #[inline]
    pub fn stats(&self) -> FrameCodecStats {
        self.stats
    }

    /// Append a chunk and parse as far as possible.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        self.parse();
    }

    /// Drain the frames completed so far, in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = DecodedFrame> + '_ {
        self.frames.drain(..)
    }

    fn parse(&mut self) {
        loop {
            // Scan for SYNC; drop leading garbage.
            match self.buf.iter().position(|&b| b == SYNC) {
                None => {
                    self.stats.resync_bytes_dropped += self.buf.len() as u64;
                    self.buf.clear();
                    return;
                }
                Some(0) => {}
                Some(k) => {
                    self.stats.resync_bytes_dropped += k as u64;
                    self.buf.drain(..k);
                }
            }

            if self.buf.len() < FRAME_HEADER_LEN + 1 {
                return;
            }
            let typever = self.buf[1];
            let payload_len = self.buf[2] as usize;
            let need = FRAME_OVERHEAD + payload_len;
            if self.buf.len() < need {
                return;
            }

            // CRC over TYPE/VER + LEN + PAYLOAD, compared little-endian.
            let crc_rx = u16::from_le_bytes([self.buf[need - 2], self.buf[need - 1]]);
            let crc_calc = crc16_ccitt_false(&self.buf[1..FRAME_HEADER_LEN + payload_len]);
            if crc_rx != crc_calc {
                self.stats.crc_errors += 1;
                trace!(crc_rx, crc_calc, payload_len, "frame dropped on crc mismatch");
                self.buf.drain(..need);
                continue;
            }

            let payload = self.buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len].to_vec();
            self.buf.drain(..need);

            match PacketType::from_nibble(typever >> 4) {
                Some(packet_type) => {
                    self.stats.frames_decoded += 1;
                    self.frames.push(DecodedFrame {
                        packet_type,
                        version: typever & 0x0F,
                        payload,
                    });
                }
                None => {
                    self.stats.unknown_type_frames += 1;
                    trace!(type_nibble = typever >> 4, "frame with unknown type dropped");
                }
            }
        }
    }
}

/// Serialize a frame: SYNC | TYPE/VER | LEN | PAYLOAD | CRC16-LE.
///
/// Payloads longer than 255 bytes cannot be framed and return `None`.
pub fn encode_frame(packet_type: PacketType, version: u8, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > u8::MAX as usize {
        return None;
    }
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.push(SYNC);
    frame.push(((packet_type as u8) << 4) | (version & 0x0F));
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt_false(&frame[1..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    Some(frame)
}

// ─── Tests ──────────────────────────────────────────────────────────
