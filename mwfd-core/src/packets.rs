use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::lp::PitToken;
use crate::name::Name;
use crate::tlv::{self, TlvElement, TlvError, TlvReader};

/// TLV type constants for network-layer packets
pub mod tlv_types {
    pub const INTEREST: u8 = 0x05;
    pub const DATA: u8 = 0x06;
    pub const NAME: u8 = 0x07;
    pub const NAME_COMPONENT: u8 = 0x08;
    pub const CAN_BE_PREFIX: u8 = 0x21;
    pub const MUST_BE_FRESH: u8 = 0x12;
    pub const FORWARDING_HINT: u8 = 0x1E;
    pub const NONCE: u8 = 0x0A;
    pub const INTEREST_LIFETIME: u8 = 0x0C;
    pub const HOP_LIMIT: u8 = 0x22;
    pub const META_INFO: u8 = 0x14;
    pub const CONTENT: u8 = 0x15;
    pub const FRESHNESS_PERIOD: u8 = 0x19;
    pub const FINAL_BLOCK_ID: u8 = 0x1A;
}

/// Default InterestLifetime when the packet does not carry one.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_secs(4);

/// Interest packet: a request for Data under a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    /// Ordered delegation list consulted instead of `name` for FIB lookup
    /// while outside the producer region.
    pub forwarding_hint: Vec<Name>,
    pub nonce: Option<u32>,
    pub lifetime: Option<Duration>,
    pub hop_limit: Option<u8>,
    /// Link-protocol tag, never part of the Interest's own TLV encoding.
    pub pit_token: Option<PitToken>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            forwarding_hint: Vec::new(),
            nonce: None,
            lifetime: None,
            hop_limit: None,
            pit_token: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn with_forwarding_hint(mut self, delegations: Vec<Name>) -> Self {
        self.forwarding_hint = delegations;
        self
    }

    pub fn lifetime_or_default(&self) -> Duration {
        self.lifetime.unwrap_or(DEFAULT_INTEREST_LIFETIME)
    }

    /// Whether `data` satisfies this Interest by name (exact, or prefix when
    /// CanBePrefix is set).
    pub fn matches_name(&self, data_name: &Name) -> bool {
        if self.can_be_prefix {
            self.name.is_prefix_of(data_name)
        } else {
            self.name == *data_name
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::new();
        self.name.encode().encode_into(&mut inner);
        if self.can_be_prefix {
            TlvElement::new(tlv_types::CAN_BE_PREFIX, Vec::new()).encode_into(&mut inner);
        }
        if self.must_be_fresh {
            TlvElement::new(tlv_types::MUST_BE_FRESH, Vec::new()).encode_into(&mut inner);
        }
        if !self.forwarding_hint.is_empty() {
            let mut hint = Vec::new();
            for delegation in &self.forwarding_hint {
                delegation.encode().encode_into(&mut hint);
            }
            TlvElement::new(tlv_types::FORWARDING_HINT, hint).encode_into(&mut inner);
        }
        if let Some(nonce) = self.nonce {
            TlvElement::new(tlv_types::NONCE, nonce.to_le_bytes().to_vec()).encode_into(&mut inner);
        }
        if let Some(lifetime) = self.lifetime {
            TlvElement::new(
                tlv_types::INTEREST_LIFETIME,
                tlv::encode_uint(lifetime.as_millis() as u64),
            )
            .encode_into(&mut inner);
        }
        if let Some(hop_limit) = self.hop_limit {
            TlvElement::new(tlv_types::HOP_LIMIT, vec![hop_limit]).encode_into(&mut inner);
        }
        TlvElement::new(tlv_types::INTEREST, inner).encode()
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (element, consumed) = TlvElement::decode(data)?;
        let element = element.expect_type(tlv_types::INTEREST)?;
        let mut reader = TlvReader::new(&element.value);
        let name_element = reader.next_expect(tlv_types::NAME)?;
        let mut interest = Interest::new(Name::decode_value(&name_element.value)?);
        for field in reader {
            let field = field?;
            match field.type_ {
                tlv_types::CAN_BE_PREFIX => interest.can_be_prefix = true,
                tlv_types::MUST_BE_FRESH => interest.must_be_fresh = true,
                tlv_types::FORWARDING_HINT => {
                    for delegation in TlvReader::new(&field.value) {
                        let delegation = delegation?.expect_type(tlv_types::NAME)?;
                        interest
                            .forwarding_hint
                            .push(Name::decode_value(&delegation.value)?);
                    }
                }
                tlv_types::NONCE => {
                    let bytes: [u8; 4] = field
                        .value
                        .as_slice()
                        .try_into()
                        .map_err(|_| TlvError::InvalidIntegerWidth(field.value.len()))?;
                    interest.nonce = Some(u32::from_le_bytes(bytes));
                }
                tlv_types::INTEREST_LIFETIME => {
                    interest.lifetime = Some(Duration::from_millis(field.as_uint()?));
                }
                tlv_types::HOP_LIMIT => {
                    let byte = field
                        .value
                        .first()
                        .ok_or(TlvError::InvalidIntegerWidth(0))?;
                    interest.hop_limit = Some(*byte);
                }
                // Unrecognized fields are skipped for forward compatibility.
                _ => {}
            }
        }
        Ok((interest, consumed))
    }
}

/// Data packet: named content with freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub freshness_period: Option<Duration>,
    pub final_block_id: Option<Vec<u8>>,
    pub content: Vec<u8>,
    /// Link-protocol tag echoed from the satisfying Interest.
    pub pit_token: Option<PitToken>,
}

impl Data {
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            freshness_period: None,
            final_block_id: None,
            content,
            pit_token: None,
        }
    }

    pub fn with_freshness(mut self, period: Duration) -> Self {
        self.freshness_period = Some(period);
        self
    }

    pub fn with_final_block_id(mut self, id: Vec<u8>) -> Self {
        self.final_block_id = Some(id);
        self
    }

    /// When this Data, received at `received_at`, stops being fresh.
    /// Data without a freshness period is never fresh.
    pub fn staleness_deadline(&self, received_at: Instant) -> Option<Instant> {
        self.freshness_period.map(|period| received_at + period)
    }

    /// Freshness at the moment of arrival, as used by MustBeFresh matching.
    pub fn is_fresh_on_arrival(&self) -> bool {
        self.freshness_period.map_or(false, |p| !p.is_zero())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::new();
        self.name.encode().encode_into(&mut inner);
        if self.freshness_period.is_some() || self.final_block_id.is_some() {
            let mut meta = Vec::new();
            if let Some(period) = self.freshness_period {
                TlvElement::new(
                    tlv_types::FRESHNESS_PERIOD,
                    tlv::encode_uint(period.as_millis() as u64),
                )
                .encode_into(&mut meta);
            }
            if let Some(ref id) = self.final_block_id {
                TlvElement::new(tlv_types::FINAL_BLOCK_ID, id.clone()).encode_into(&mut meta);
            }
            TlvElement::new(tlv_types::META_INFO, meta).encode_into(&mut inner);
        }
        TlvElement::new(tlv_types::CONTENT, self.content.clone()).encode_into(&mut inner);
        TlvElement::new(tlv_types::DATA, inner).encode()
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (element, consumed) = TlvElement::decode(data)?;
        let element = element.expect_type(tlv_types::DATA)?;
        let mut reader = TlvReader::new(&element.value);
        let name_element = reader.next_expect(tlv_types::NAME)?;
        let mut packet = Data::new(Name::decode_value(&name_element.value)?, Vec::new());
        for field in reader {
            let field = field?;
            match field.type_ {
                tlv_types::META_INFO => {
                    for meta in TlvReader::new(&field.value) {
                        let meta = meta?;
                        match meta.type_ {
                            tlv_types::FRESHNESS_PERIOD => {
                                packet.freshness_period =
                                    Some(Duration::from_millis(meta.as_uint()?));
                            }
                            tlv_types::FINAL_BLOCK_ID => {
                                packet.final_block_id = Some(meta.value);
                            }
                            _ => {}
                        }
                    }
                }
                tlv_types::CONTENT => packet.content = field.value,
                _ => {}
            }
        }
        Ok((packet, consumed))
    }
}
