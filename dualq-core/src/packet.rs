use std::fmt::{self, Debug};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::time::SimTime;

/// The two logical queues sharing one link.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    Classic,
    L4s,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Classic, Lane::L4s];

    pub fn index(&self) -> usize {
        match self {
            Lane::Classic => 0,
            Lane::L4s => 1,
        }
    }

    pub fn other(&self) -> Lane {
        match self {
            Lane::Classic => Lane::L4s,
            Lane::L4s => Lane::Classic,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Classic => f.pad("classic"),
            Lane::L4s => f.pad("l4s"),
        }
    }
}

/// ECN field of the IP header (RFC 3168 / RFC 9331 codepoints).
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EcnCodepoint {
    #[default]
    NotEct, // 00
    Ect1, // 01
    Ect0, // 10
    Ce,   // 11
}

impl EcnCodepoint {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::NotEct,
            0b01 => Self::Ect1,
            0b10 => Self::Ect0,
            _ => Self::Ce,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            Self::NotEct => 0b00,
            Self::Ect1 => 0b01,
            Self::Ect0 => 0b10,
            Self::Ce => 0b11,
        }
    }

    pub fn is_ect(&self) -> bool {
        *self != Self::NotEct
    }
}

pub trait Packet: Debug + Send + 'static {
    // Network layer length, the unit of every byte limit and credit
    fn length(&self) -> usize;
    fn as_slice(&self) -> &[u8];

    fn ecn(&self) -> EcnCodepoint;
    fn set_ecn(&mut self, ecn: EcnCodepoint);

    /// Sets CE on an ECN-capable packet. Returns `false` if the packet is Not-ECT
    /// and therefore cannot carry a congestion mark.
    fn mark_ce(&mut self) -> bool {
        match self.ecn() {
            EcnCodepoint::NotEct => false,
            EcnCodepoint::Ce => true,
            _ => {
                self.set_ecn(EcnCodepoint::Ce);
                true
            }
        }
    }

    // Timestamp
    fn get_timestamp(&self) -> SimTime;
    fn set_timestamp(&mut self, timestamp: SimTime);

    // Packet description
    fn desc(&self) -> String {
        String::new()
    }

    fn set_flow_id(&mut self, _flow_id: u32) {}
    fn get_flow_id(&self) -> u32 {
        0
    }
}

#[derive(Clone, Debug)]
pub struct StdPacket {
    buf: Vec<u8>,
    ecn: EcnCodepoint,
    // whether `buf` starts with an IPv4 header that mirrors `ecn`
    ipv4: bool,
    timestamp: SimTime,
    flow_id: u32,
}

impl StdPacket {
    /// An opaque packet of `length` bytes carrying the given ECN codepoint.
    pub fn new(length: usize, ecn: EcnCodepoint) -> Self {
        Self::with_payload(vec![0; length], ecn)
    }

    pub fn with_payload<B: Into<Vec<u8>>>(payload: B, ecn: EcnCodepoint) -> Self {
        Self {
            buf: payload.into(),
            ecn,
            ipv4: false,
            timestamp: SimTime::ZERO,
            flow_id: 0,
        }
    }

    /// Builds a packet from a raw IPv4 datagram, taking the ECN codepoint from
    /// its header. Buffers that do not parse as IPv4 are treated as Not-ECT.
    pub fn from_ipv4(buf: &[u8]) -> Self {
        match etherparse::Ipv4HeaderSlice::from_slice(buf) {
            Ok(header) => {
                let ecn = EcnCodepoint::from_bits(header.slice()[1]);
                Self {
                    buf: buf.to_vec(),
                    ecn,
                    ipv4: true,
                    timestamp: SimTime::ZERO,
                    flow_id: 0,
                }
            }
            Err(e) => {
                trace!("Not an IPv4 datagram ({}), treat as Not-ECT", e);
                Self::with_payload(buf, EcnCodepoint::NotEct)
            }
        }
    }

    pub fn with_flow_id(mut self, flow_id: u32) -> Self {
        self.flow_id = flow_id;
        self
    }

    fn rewrite_ipv4_ecn(&mut self) {
        self.buf[1] = (self.buf[1] & !0b11) | self.ecn.value();
        let checksum = match etherparse::Ipv4HeaderSlice::from_slice(&self.buf) {
            Ok(header) => header.to_header().calc_header_checksum(),
            Err(_) => return,
        };
        self.buf[10..12].copy_from_slice(&checksum.to_be_bytes());
    }
}

impl Packet for StdPacket {
    fn length(&self) -> usize {
        self.buf.len()
    }

    fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn ecn(&self) -> EcnCodepoint {
        self.ecn
    }

    fn set_ecn(&mut self, ecn: EcnCodepoint) {
        self.ecn = ecn;
        if self.ipv4 {
            self.rewrite_ipv4_ecn();
        }
    }

    fn get_timestamp(&self) -> SimTime {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: SimTime) {
        self.timestamp = timestamp;
    }

    fn desc(&self) -> String {
        format!(
            "[flow {}] len: {} ecn: {:?}{}",
            self.flow_id,
            self.buf.len(),
            self.ecn,
            if self.ipv4 { " [IPv4]" } else { "" }
        )
    }

    fn set_flow_id(&mut self, flow_id: u32) {
        self.flow_id = flow_id;
    }

    fn get_flow_id(&self) -> u32 {
        self.flow_id
    }
}
