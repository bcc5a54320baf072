//! The session sync wire format.
//!
//! Firewalls propagate session creations/updates to their peers as
//! fixed 56-byte frames, packed back to back into UDP payloads over
//! IPv6 multicast. Delivery is at-least-once; applying a frame is
//! idempotent because it lands in the table through the commutative
//! merge function.
//!
//! Frame layout (little-endian multi-byte fields, addresses as-is):
//!
//! ```text
//! off  size  field
//!   0     1  addr_type (4 = IPv4, 6 = IPv6)
//!   1     1  proto (IP protocol)
//!   2     1  fib (0 = forward, 1 = backward)
//!   3     1  flags_reserved
//!   4     2  src_port
//!   6     2  dst_port
//!   8    16  src_addr (IPv4 in the first 4 bytes)
//!  24    16  dst_addr
//!  40     8  flags (FwStateFlags bits)
//!  48     4  reserved
//!  52     4  padding
//! ```

use bytes::{Buf, BufMut};

use crate::error::{FwmapError, FwmapResult};
use crate::map::{Fwmap, PutOutcome};
use crate::state::{Fw4Key, Fw6Key, FwStateFlags, FwstateValue};
use crate::timeouts::FwTimeouts;

/// Size of one frame on the wire.
pub const SYNC_FRAME_SIZE: usize = 56;

/// Address family carried by a frame.
pub const ADDR_TYPE_V4: u8 = 4;
/// Address family carried by a frame.
pub const ADDR_TYPE_V6: u8 = 6;

/// One session sync record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFrame {
    pub addr_type: u8,
    pub proto: u8,
    /// 0 = forward direction, 1 = backward.
    pub fib: u8,
    pub flags_reserved: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// IPv4 addresses occupy the first four bytes.
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
    pub flags: FwStateFlags,
    pub reserved: u32,
}

impl SyncFrame {
    /// Encode into a buffer (appends exactly [`SYNC_FRAME_SIZE`] bytes).
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.addr_type);
        buf.put_u8(self.proto);
        buf.put_u8(self.fib);
        buf.put_u8(self.flags_reserved);
        buf.put_u16_le(self.src_port);
        buf.put_u16_le(self.dst_port);
        buf.put_slice(&self.src_addr);
        buf.put_slice(&self.dst_addr);
        buf.put_u64_le(self.flags.0);
        buf.put_u32_le(self.reserved);
        buf.put_u32_le(0);
    }

    /// Decode one frame from a buffer holding at least
    /// [`SYNC_FRAME_SIZE`] bytes.
    pub fn decode<B: Buf>(buf: &mut B) -> FwmapResult<Self> {
        debug_assert!(buf.remaining() >= SYNC_FRAME_SIZE);
        let addr_type = buf.get_u8();
        let proto = buf.get_u8();
        let fib = buf.get_u8();
        let flags_reserved = buf.get_u8();
        let src_port = buf.get_u16_le();
        let dst_port = buf.get_u16_le();
        let mut src_addr = [0u8; 16];
        buf.copy_to_slice(&mut src_addr);
        let mut dst_addr = [0u8; 16];
        buf.copy_to_slice(&mut dst_addr);
        let flags = FwStateFlags(buf.get_u64_le());
        let reserved = buf.get_u32_le();
        let _pad = buf.get_u32_le();

        if addr_type != ADDR_TYPE_V4 && addr_type != ADDR_TYPE_V6 {
            return Err(FwmapError::BadAddrType(addr_type));
        }
        Ok(Self {
            addr_type,
            proto,
            fib,
            flags_reserved,
            src_port,
            dst_port,
            src_addr,
            dst_addr,
            flags,
            reserved,
        })
    }

    /// Decode a whole UDP payload: an integral number of frames.
    pub fn decode_payload(payload: &[u8]) -> FwmapResult<Vec<Self>> {
        if payload.is_empty() || payload.len() % SYNC_FRAME_SIZE != 0 {
            return Err(FwmapError::FrameLength {
                len: payload.len(),
                frame: SYNC_FRAME_SIZE,
            });
        }
        let mut cursor = payload;
        let mut frames = Vec::with_capacity(payload.len() / SYNC_FRAME_SIZE);
        while cursor.has_remaining() {
            frames.push(Self::decode(&mut cursor)?);
        }
        Ok(frames)
    }

    /// The session key this frame addresses.
    ///
    /// Backward-direction frames describe the reverse flow; the key is
    /// normalized to the forward direction so both directions land on
    /// one session.
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        let (src, dst, sp, dp) = if self.fib == 0 {
            (self.src_addr, self.dst_addr, self.src_port, self.dst_port)
        } else {
            (self.dst_addr, self.src_addr, self.dst_port, self.src_port)
        };
        if self.addr_type == ADDR_TYPE_V4 {
            SessionKey::V4(Fw4Key {
                src: u32::from_le_bytes([src[0], src[1], src[2], src[3]]),
                dst: u32::from_le_bytes([dst[0], dst[1], dst[2], dst[3]]),
                src_port: sp,
                dst_port: dp,
                proto: self.proto,
                _pad: [0; 3],
            })
        } else {
            SessionKey::V6(Fw6Key {
                src,
                dst,
                src_port: sp,
                dst_port: dp,
                proto: self.proto,
                _pad: [0; 3],
            })
        }
    }
}

/// A decoded session key of either family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    V4(Fw4Key),
    V6(Fw6Key),
}

impl SessionKey {
    /// Byte view for table operations.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V4(k) => k.as_bytes(),
            Self::V6(k) => k.as_bytes(),
        }
    }
}

/// Apply one received frame to the session table as an external write.
///
/// The value is tagged `external`, the TTL comes from the timeout
/// policy, and the commutative merge makes re-delivery harmless.
pub fn apply_sync_frame(
    map: &Fwmap<'_>,
    frame: &SyncFrame,
    timeouts: &FwTimeouts,
    now_ns: u64,
) -> FwmapResult<PutOutcome> {
    let tcp_flags = match frame.fib {
        0 => frame.flags.forward(),
        _ => frame.flags.backward(),
    };
    let ttl = timeouts.select(frame.proto, tcp_flags);
    let value = FwstateValue {
        flags: frame.flags,
        packets_fwd: 0,
        packets_bwd: 0,
        last_update_ns: now_ns,
        proto: frame.proto,
        external: 1,
        _pad: [0; 6],
    };
    map.put(frame.session_key().as_bytes(), value.as_bytes(), ttl, now_ns)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn frame() -> SyncFrame {
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src[..4].copy_from_slice(&[10, 0, 0, 1]);
        dst[..4].copy_from_slice(&[10, 0, 0, 2]);
        SyncFrame {
            addr_type: ADDR_TYPE_V4,
            proto: 6,
            fib: 0,
            flags_reserved: 0,
            src_port: 40000,
            dst_port: 443,
            src_addr: src,
            dst_addr: dst,
            flags: FwStateFlags(0x12),
            reserved: 0,
        }
    }

    #[test]
    fn frame_size_is_wire_stable() {
        let mut buf = BytesMut::new();
        frame().encode(&mut buf);
        assert_eq!(buf.len(), SYNC_FRAME_SIZE);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = frame();
        let mut buf = BytesMut::new();
        original.encode(&mut buf);
        let decoded = SyncFrame::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn payload_must_be_integral_frames() {
        let mut buf = BytesMut::new();
        frame().encode(&mut buf);
        frame().encode(&mut buf);
        assert_eq!(SyncFrame::decode_payload(&buf).unwrap().len(), 2);

        buf.truncate(SYNC_FRAME_SIZE + 3);
        assert!(matches!(
            SyncFrame::decode_payload(&buf),
            Err(FwmapError::FrameLength { .. })
        ));
        assert!(SyncFrame::decode_payload(&[]).is_err());
    }

    #[test]
    fn unknown_addr_type_rejected() {
        let mut buf = BytesMut::new();
        let mut f = frame();
        f.addr_type = 9;
        f.encode(&mut buf);
        assert!(matches!(
            SyncFrame::decode(&mut buf.freeze()),
            Err(FwmapError::BadAddrType(9))
        ));
    }

    #[test]
    fn backward_frames_normalize_to_forward_key() {
        let fwd = frame();
        let mut bwd = frame();
        bwd.fib = 1;
        std::mem::swap(&mut bwd.src_addr, &mut bwd.dst_addr);
        std::mem::swap(&mut bwd.src_port, &mut bwd.dst_port);
        assert_eq!(fwd.session_key(), bwd.session_key());
    }
}
