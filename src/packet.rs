//! Packet view (C4): typed, byte-swapping field access over raw transport
//! frames. Mirrors `pkt_base.hpp`'s header layout — the transport's own
//! framing is big-endian on the wire.

use crate::buffer::ByteView;

pub const HEADER_LENGTH: usize = 16;

/// Control-packet type, decoded from the low 15 bits of the first 16-bit
/// header word (the top bit of byte 0 marks control vs. data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlType {
    Invalid,
    Handshake,
    Keepalive,
    Ack,
    LossReport,
    CgWarning,
    Shutdown,
    AckAck,
    DropReq,
    PeerError,
    UserDefined,
}

impl CtrlType {
    fn from_code(code: u16) -> Self {
        match code {
            0 => CtrlType::Handshake,
            1 => CtrlType::Keepalive,
            2 => CtrlType::Ack,
            3 => CtrlType::LossReport,
            4 => CtrlType::CgWarning,
            5 => CtrlType::Shutdown,
            6 => CtrlType::AckAck,
            7 => CtrlType::DropReq,
            8 => CtrlType::PeerError,
            0x7FFF => CtrlType::UserDefined,
            _ => CtrlType::Invalid,
        }
    }
}

/// The four 2-bit packet-position flags of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketPosition {
    Middle,
    First,
    Last,
    Single,
}

/// Read-only, field-typed view over one transport frame.
pub struct PacketView<'a> {
    view: ByteView<'a>,
}

impl<'a> PacketView<'a> {
    pub fn new(view: ByteView<'a>) -> Self {
        Self { view }
    }

    pub fn length(&self) -> usize {
        self.view.len()
    }

    fn u16_be(&self, offset: usize) -> u16 {
        let b = self.view.as_slice();
        u16::from_be_bytes([b[offset], b[offset + 1]])
    }

    fn u32_be(&self, offset: usize) -> u32 {
        let b = self.view.as_slice();
        u32::from_be_bytes([b[offset], b[offset + 1], b[offset + 2], b[offset + 3]])
    }

    /// True if the top bit of byte 0 is set (control packet).
    pub fn is_ctrl(&self) -> bool {
        self.view.as_slice()[0] & 0x80 != 0
    }

    pub fn is_data(&self) -> bool {
        !self.is_ctrl()
    }

    pub fn control_type(&self) -> CtrlType {
        debug_assert!(self.is_ctrl());
        let code = self.u16_be(0) & 0x7FFF;
        CtrlType::from_code(code)
    }

    pub fn subtype(&self) -> u16 {
        self.u16_be(2)
    }

    pub fn timestamp(&self) -> u32 {
        self.u32_be(8)
    }

    pub fn dst_sockid(&self) -> u32 {
        self.u32_be(12)
    }

    /// 31-bit sequence number (sign bit zero).
    pub fn data_seqno(&self) -> u32 {
        debug_assert!(self.is_data());
        self.u32_be(0) & 0x7FFF_FFFF
    }

    /// 26-bit message number, 2-bit position flags, 1-bit in-order flag.
    pub fn message_number(&self) -> u32 {
        self.u32_be(4) & 0x03FF_FFFF
    }

    pub fn position(&self) -> PacketPosition {
        let word = self.u32_be(4);
        match (word >> 30) & 0b11 {
            0b00 => PacketPosition::Middle,
            0b10 => PacketPosition::First,
            0b01 => PacketPosition::Last,
            _ => PacketPosition::Single,
        }
    }

    pub fn in_order(&self) -> bool {
        let word = self.u32_be(4);
        (word >> 29) & 0b1 != 0
    }

    pub fn key_flag(&self) -> u8 {
        let word = self.u32_be(4);
        ((word >> 27) & 0b11) as u8
    }

    pub fn retransmitted(&self) -> bool {
        let word = self.u32_be(4);
        (word >> 26) & 0b1 != 0
    }

    pub fn slice(&self, byte_offset: usize) -> ByteView<'a> {
        self.view.advance(byte_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl_frame(code: u16) -> [u8; HEADER_LENGTH] {
        let mut b = [0u8; HEADER_LENGTH];
        let word = 0x8000 | (code & 0x7FFF);
        b[0..2].copy_from_slice(&word.to_be_bytes());
        b
    }

    #[test]
    fn classifies_control_types() {
        for (code, expect) in [
            (0u16, CtrlType::Handshake),
            (1, CtrlType::Keepalive),
            (2, CtrlType::Ack),
            (3, CtrlType::LossReport),
            (4, CtrlType::CgWarning),
            (5, CtrlType::Shutdown),
            (6, CtrlType::AckAck),
            (7, CtrlType::DropReq),
            (8, CtrlType::PeerError),
            (0x7FFF, CtrlType::UserDefined),
            (9, CtrlType::Invalid),
        ] {
            let frame = ctrl_frame(code);
            let pkt = PacketView::new(ByteView::new(&frame));
            assert!(pkt.is_ctrl());
            assert_eq!(pkt.control_type(), expect);
        }
    }

    #[test]
    fn data_packet_decodes_seqno_and_position() {
        let mut b = [0u8; HEADER_LENGTH];
        b[0..4].copy_from_slice(&12345u32.to_be_bytes());
        let msg_word: u32 = (0b10 << 30) | (1 << 29) | 42;
        b[4..8].copy_from_slice(&msg_word.to_be_bytes());
        let pkt = PacketView::new(ByteView::new(&b));
        assert!(pkt.is_data());
        assert_eq!(pkt.data_seqno(), 12345);
        assert_eq!(pkt.message_number(), 42);
        assert_eq!(pkt.position(), PacketPosition::First);
        assert!(pkt.in_order());
    }
}
