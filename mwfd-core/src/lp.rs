use serde::{Deserialize, Serialize};

use crate::packets::{tlv_types as net_types, Data, Interest};
use crate::tlv::{self, TlvElement, TlvError, TlvReader};

/// TLV type constants for the link protocol layer
pub mod tlv_types {
    pub const LP_PACKET: u8 = 0x64;
    pub const FRAGMENT: u8 = 0x50;
    pub const SEQUENCE: u8 = 0x51;
    pub const FRAG_INDEX: u8 = 0x52;
    pub const FRAG_COUNT: u8 = 0x53;
    pub const PIT_TOKEN: u8 = 0x62;
    pub const NACK: u8 = 0x71;
    pub const NACK_REASON: u8 = 0x72;
}

/// Errors raised by the link protocol codec
#[derive(Debug, thiserror::Error)]
pub enum LpError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
    #[error("PitToken has invalid length {0}")]
    BadTokenLength(usize),
    #[error("Nack header without an Interest fragment")]
    NackWithoutInterest,
    #[error("Unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("Empty link protocol packet")]
    EmptyPacket,
}

/// Reason code carried by a Nack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackReason {
    None,
    Congestion,
    Duplicate,
    NoRoute,
}

impl NackReason {
    pub fn code(self) -> u64 {
        match self {
            NackReason::None => 0,
            NackReason::Congestion => 50,
            NackReason::Duplicate => 100,
            NackReason::NoRoute => 150,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            50 => NackReason::Congestion,
            100 => NackReason::Duplicate,
            150 => NackReason::NoRoute,
            _ => NackReason::None,
        }
    }

    /// `None` is treated as most severe; otherwise lower codes are less
    /// severe. Used to pick the reason to relay when several upstreams
    /// answered with different Nacks.
    pub fn is_less_severe(self, other: NackReason) -> bool {
        if self == NackReason::None {
            return false;
        }
        if other == NackReason::None {
            return true;
        }
        self.code() < other.code()
    }
}

impl std::fmt::Display for NackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NackReason::None => "None",
            NackReason::Congestion => "Congestion",
            NackReason::Duplicate => "Duplicate",
            NackReason::NoRoute => "NoRoute",
        };
        write!(f, "{label}")
    }
}

/// A Nack: a routing-level refusal of a previously forwarded Interest.
/// Carries the triggering Interest so its nonce rides along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nack {
    pub reason: NackReason,
    pub interest: Interest,
}

impl Nack {
    pub fn new(interest: Interest, reason: NackReason) -> Self {
        Self { reason, interest }
    }

    pub fn nonce(&self) -> Option<u32> {
        self.interest.nonce
    }
}

const TOKEN_FLAG_CAN_BE_PREFIX: u8 = 0b0000_0001;
const TOKEN_FLAG_HAS_HASH: u8 = 0b0000_0010;

const TOKEN_LEN_SHORT: usize = 5;
const TOKEN_LEN_FULL: usize = 13;

/// Reverse-path token stamped onto outgoing Interests and echoed on Data.
///
/// Fixed little-endian layout: `worker_id` (4 bytes), one flag byte, then
/// the optional 64-bit name hash. 5 bytes without the hash, 13 with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitToken {
    pub worker_id: u32,
    pub can_be_prefix: bool,
    pub name_hash: Option<u64>,
}

impl PitToken {
    pub fn new(worker_id: u32, can_be_prefix: bool, name_hash: Option<u64>) -> Self {
        Self {
            worker_id,
            can_be_prefix,
            name_hash,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOKEN_LEN_FULL);
        out.extend_from_slice(&self.worker_id.to_le_bytes());
        let mut flags = 0u8;
        if self.can_be_prefix {
            flags |= TOKEN_FLAG_CAN_BE_PREFIX;
        }
        if self.name_hash.is_some() {
            flags |= TOKEN_FLAG_HAS_HASH;
        }
        out.push(flags);
        if let Some(hash) = self.name_hash {
            out.extend_from_slice(&hash.to_le_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, LpError> {
        if data.len() != TOKEN_LEN_SHORT && data.len() != TOKEN_LEN_FULL {
            return Err(LpError::BadTokenLength(data.len()));
        }
        let worker_id = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let flags = data[4];
        let name_hash = if flags & TOKEN_FLAG_HAS_HASH != 0 {
            if data.len() != TOKEN_LEN_FULL {
                return Err(LpError::BadTokenLength(data.len()));
            }
            Some(u64::from_le_bytes(data[5..13].try_into().unwrap()))
        } else {
            None
        };
        Ok(Self {
            worker_id,
            can_be_prefix: flags & TOKEN_FLAG_CAN_BE_PREFIX != 0,
            name_hash,
        })
    }
}

/// A network-layer packet recovered from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum NetPacket {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}

impl NetPacket {
    pub fn name(&self) -> &crate::name::Name {
        match self {
            NetPacket::Interest(i) => &i.name,
            NetPacket::Data(d) => &d.name,
            NetPacket::Nack(n) => &n.interest.name,
        }
    }
}

/// Link protocol packet: headers plus a fragment carrying (part of) a
/// network-layer packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LpPacket {
    pub pit_token: Option<PitToken>,
    pub nack_reason: Option<NackReason>,
    pub sequence: Option<u64>,
    pub frag_index: Option<u64>,
    pub frag_count: Option<u64>,
    pub fragment: Vec<u8>,
}

impl LpPacket {
    pub fn from_interest(interest: &Interest) -> Self {
        Self {
            pit_token: interest.pit_token,
            fragment: interest.encode(),
            ..Default::default()
        }
    }

    pub fn from_data(data: &Data) -> Self {
        Self {
            pit_token: data.pit_token,
            fragment: data.encode(),
            ..Default::default()
        }
    }

    pub fn from_nack(nack: &Nack) -> Self {
        Self {
            pit_token: nack.interest.pit_token,
            nack_reason: Some(nack.reason),
            fragment: nack.interest.encode(),
            ..Default::default()
        }
    }

    /// Whether this is one piece of a fragmented network packet.
    pub fn is_fragmented(&self) -> bool {
        self.frag_count.map_or(false, |count| count > 1)
    }

    pub fn encode(&self) -> Vec<u8> {
        // A bare network packet needs no LP wrapper.
        if self.pit_token.is_none()
            && self.nack_reason.is_none()
            && self.sequence.is_none()
            && !self.is_fragmented()
        {
            return self.fragment.clone();
        }
        let mut inner = Vec::new();
        if let Some(token) = self.pit_token {
            TlvElement::new(tlv_types::PIT_TOKEN, token.encode()).encode_into(&mut inner);
        }
        if let Some(reason) = self.nack_reason {
            let reason_tlv =
                TlvElement::new(tlv_types::NACK_REASON, tlv::encode_uint(reason.code()));
            TlvElement::new(tlv_types::NACK, reason_tlv.encode()).encode_into(&mut inner);
        }
        if let Some(sequence) = self.sequence {
            TlvElement::new(tlv_types::SEQUENCE, tlv::encode_uint(sequence)).encode_into(&mut inner);
        }
        if let Some(index) = self.frag_index {
            TlvElement::new(tlv_types::FRAG_INDEX, tlv::encode_uint(index)).encode_into(&mut inner);
        }
        if let Some(count) = self.frag_count {
            TlvElement::new(tlv_types::FRAG_COUNT, tlv::encode_uint(count)).encode_into(&mut inner);
        }
        if !self.fragment.is_empty() {
            TlvElement::new(tlv_types::FRAGMENT, self.fragment.clone()).encode_into(&mut inner);
        }
        TlvElement::new(tlv_types::LP_PACKET, inner).encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, LpError> {
        let first = *data.first().ok_or(LpError::EmptyPacket)?;
        if first != tlv_types::LP_PACKET {
            // Bare network packet.
            return Ok(Self {
                fragment: data.to_vec(),
                ..Default::default()
            });
        }
        let (element, _) = TlvElement::decode(data)?;
        let mut packet = LpPacket::default();
        for field in TlvReader::new(&element.value) {
            let field = field?;
            match field.type_ {
                tlv_types::PIT_TOKEN => packet.pit_token = Some(PitToken::decode(&field.value)?),
                tlv_types::NACK => {
                    let mut reason = NackReason::None;
                    for header in TlvReader::new(&field.value) {
                        let header = header?;
                        if header.type_ == tlv_types::NACK_REASON {
                            reason = NackReason::from_code(header.as_uint()?);
                        }
                    }
                    packet.nack_reason = Some(reason);
                }
                tlv_types::SEQUENCE => packet.sequence = Some(field.as_uint()?),
                tlv_types::FRAG_INDEX => packet.frag_index = Some(field.as_uint()?),
                tlv_types::FRAG_COUNT => packet.frag_count = Some(field.as_uint()?),
                tlv_types::FRAGMENT => packet.fragment = field.value,
                _ => {}
            }
        }
        Ok(packet)
    }

    /// Recover the network-layer packet, applying the link-layer tags.
    /// Fragmented packets must be reassembled before calling this.
    pub fn parse(&self) -> Result<NetPacket, LpError> {
        let first = *self.fragment.first().ok_or(LpError::EmptyPacket)?;
        match first {
            net_types::INTEREST => {
                let (mut interest, _) = Interest::decode(&self.fragment)?;
                interest.pit_token = self.pit_token;
                match self.nack_reason {
                    Some(reason) => Ok(NetPacket::Nack(Nack::new(interest, reason))),
                    None => Ok(NetPacket::Interest(interest)),
                }
            }
            net_types::DATA => {
                if self.nack_reason.is_some() {
                    return Err(LpError::NackWithoutInterest);
                }
                let (mut data, _) = Data::decode(&self.fragment)?;
                data.pit_token = self.pit_token;
                Ok(NetPacket::Data(data))
            }
            other => Err(LpError::UnknownPacketType(other)),
        }
    }
}

/// Decode a wire buffer (bare or LP-wrapped) into a network packet.
pub fn decode_packet(data: &[u8]) -> Result<NetPacket, LpError> {
    LpPacket::decode(data)?.parse()
}

/// Split a network packet into link-layer fragments of at most `mtu` bytes
/// of payload each. Headers other than the fragment fields ride on the
/// first fragment only. A packet that fits yields itself unfragmented.
pub fn fragment(mut packet: LpPacket, sequence: u64, mtu: usize) -> Vec<LpPacket> {
    if packet.fragment.len() <= mtu {
        return vec![packet];
    }
    let payload = std::mem::take(&mut packet.fragment);
    let count = (payload.len() + mtu - 1) / mtu;
    let mut fragments = Vec::with_capacity(count);
    for (index, chunk) in payload.chunks(mtu).enumerate() {
        let mut piece = if index == 0 {
            packet.clone()
        } else {
            LpPacket::default()
        };
        piece.sequence = Some(sequence + index as u64);
        piece.frag_index = Some(index as u64);
        piece.frag_count = Some(count as u64);
        piece.fragment = chunk.to_vec();
        fragments.push(piece);
    }
    fragments
}

/// Reassembles fragmented link-layer packets per face. Fragments of one
/// network packet carry consecutive sequence numbers; the first fragment's
/// sequence minus its index identifies the group.
#[derive(Debug, Default)]
pub struct FragmentReassembler {
    partial: std::collections::HashMap<u64, Vec<Option<LpPacket>>>,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of packets being reassembled.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Accept one received LP packet; returns the whole packet once every
    /// fragment has arrived. Unfragmented packets pass straight through.
    pub fn accept(&mut self, packet: LpPacket) -> Option<LpPacket> {
        if !packet.is_fragmented() {
            return Some(packet);
        }
        let (index, count, sequence) =
            match (packet.frag_index, packet.frag_count, packet.sequence) {
                (Some(i), Some(c), Some(s)) if i < c => (i as usize, c as usize, s),
                _ => return None,
            };
        let group = sequence - index as u64;
        let slots = self
            .partial
            .entry(group)
            .or_insert_with(|| vec![None; count]);
        if slots.len() != count {
            // Inconsistent fragment count: restart the group.
            *slots = vec![None; count];
        }
        slots[index] = Some(packet);
        if !slots.iter().all(Option::is_some) {
            return None;
        }
        let slots = self.partial.remove(&group).unwrap();
        let mut fragments = slots.into_iter().map(Option::unwrap);
        let mut whole = fragments.next().unwrap();
        for piece in fragments {
            whole.fragment.extend_from_slice(&piece.fragment);
        }
        whole.frag_index = None;
        whole.frag_count = None;
        whole.sequence = None;
        Some(whole)
    }

    /// Drop every partially reassembled packet (face reset).
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn test_pit_token_roundtrip() {
        let tokens = [
            PitToken::new(0, false, None),
            PitToken::new(7, true, None),
            PitToken::new(u32::MAX, false, Some(0)),
            PitToken::new(3, true, Some(u64::MAX)),
        ];
        for token in tokens {
            let wire = token.encode();
            assert_eq!(wire.len(), if token.name_hash.is_some() { 13 } else { 5 });
            assert_eq!(PitToken::decode(&wire).unwrap(), token);
        }
    }

    #[test]
    fn test_pit_token_bad_length() {
        assert!(PitToken::decode(&[0; 4]).is_err());
        assert!(PitToken::decode(&[0; 12]).is_err());
        // Hash flag set but short layout.
        let mut wire = PitToken::new(1, false, None).encode();
        wire[4] |= 0b10;
        assert!(PitToken::decode(&wire).is_err());
    }

    #[test]
    fn test_bare_packet_passthrough() {
        let interest = Interest::new(name("/a/b")).with_nonce(42);
        let lp = LpPacket::from_interest(&interest);
        let wire = lp.encode();
        // No headers: the wire form is the Interest itself.
        assert_eq!(wire, interest.encode());
        match decode_packet(&wire).unwrap() {
            NetPacket::Interest(decoded) => assert_eq!(decoded, interest),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_tokened_interest_roundtrip() {
        let mut interest = Interest::new(name("/a/b")).with_nonce(42);
        interest.pit_token = Some(PitToken::new(5, false, Some(0x1234)));
        let wire = LpPacket::from_interest(&interest).encode();
        assert_eq!(wire[0], tlv_types::LP_PACKET);
        match decode_packet(&wire).unwrap() {
            NetPacket::Interest(decoded) => {
                assert_eq!(decoded.pit_token, interest.pit_token);
                assert_eq!(decoded.name, interest.name);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_nack_roundtrip() {
        let interest = Interest::new(name("/x")).with_nonce(99);
        let nack = Nack::new(interest, NackReason::NoRoute);
        let wire = LpPacket::from_nack(&nack).encode();
        match decode_packet(&wire).unwrap() {
            NetPacket::Nack(decoded) => {
                assert_eq!(decoded.reason, NackReason::NoRoute);
                assert_eq!(decoded.nonce(), Some(99));
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_data_with_token() {
        let mut data = Data::new(name("/a/b"), b"z".to_vec());
        data.pit_token = Some(PitToken::new(2, true, None));
        let wire = LpPacket::from_data(&data).encode();
        match decode_packet(&wire).unwrap() {
            NetPacket::Data(decoded) => assert_eq!(decoded.pit_token, data.pit_token),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(NackReason::Congestion.is_less_severe(NackReason::NoRoute));
        assert!(NackReason::Congestion.is_less_severe(NackReason::None));
        assert!(!NackReason::None.is_less_severe(NackReason::Congestion));
        assert!(!NackReason::NoRoute.is_less_severe(NackReason::Congestion));
    }

    #[test]
    fn test_fragment_fields() {
        let lp = LpPacket {
            sequence: Some(10),
            frag_index: Some(1),
            frag_count: Some(2),
            fragment: vec![0x06, 0x00],
            ..Default::default()
        };
        assert!(lp.is_fragmented());
        let decoded = LpPacket::decode(&lp.encode()).unwrap();
        assert_eq!(decoded, lp);
    }

    #[test]
    fn test_fragment_then_reassemble() {
        let data = Data::new(name("/big"), vec![0xAA; 100]);
        let whole = LpPacket::from_data(&data);
        let pieces = fragment(whole.clone(), 40, 32);
        assert!(pieces.len() > 1);
        assert_eq!(pieces[0].frag_index, Some(0));
        assert_eq!(pieces[0].sequence, Some(40));

        let mut reassembler = FragmentReassembler::new();
        let mut result = None;
        // Deliver out of order.
        for piece in pieces.into_iter().rev() {
            result = reassembler.accept(piece);
        }
        let result = result.expect("reassembled");
        assert_eq!(result.fragment, whole.fragment);
        assert_eq!(reassembler.pending(), 0);
        match result.parse().unwrap() {
            NetPacket::Data(decoded) => assert_eq!(decoded.content, data.content),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_small_packet_not_fragmented() {
        let interest = Interest::new(name("/tiny")).with_nonce(1);
        let pieces = fragment(LpPacket::from_interest(&interest), 7, 9000);
        assert_eq!(pieces.len(), 1);
        assert!(!pieces[0].is_fragmented());
    }
}
