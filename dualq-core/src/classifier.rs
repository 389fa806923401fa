#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::packet::{EcnCodepoint, Lane, Packet};
use crate::time::SimTime;

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Mask used to determine whether a packet with a specific ECN codepoint goes
/// into the L4S lane or the Classic lane.
///
/// `NoEcn` means all ECN codepoints are treated as if they are classic packets.
///
/// `L4sEct` means only ECT(1) and CE are treated as L4S traffic.
///
/// `AnyEct` means ECT(0), ECT(1) and CE all go to the L4S lane, for compatibility with DCTCP.
pub enum EcnCodePointMask {
    NoEcn, // 00
    #[default]
    L4sEct, // 01
    AnyEct, // 11
}

impl EcnCodePointMask {
    fn value(&self) -> u8 {
        match self {
            Self::NoEcn => 0b00,
            Self::L4sEct => 0b01,
            Self::AnyEct => 0b11,
        }
    }
}

/// Tags packets with a lane from the ECN codepoint they already carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    mask: EcnCodePointMask,
}

impl Classifier {
    pub fn new(mask: EcnCodePointMask) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> EcnCodePointMask {
        self.mask
    }

    pub fn classify_codepoint(&self, ecn: EcnCodepoint) -> Lane {
        if ecn.value() & self.mask.value() != 0 {
            Lane::L4s
        } else {
            Lane::Classic
        }
    }

    pub fn classify<P: Packet>(&self, packet: &P) -> Lane {
        self.classify_codepoint(packet.ecn())
    }
}

/// A packet sitting in one of the lanes, together with what was decided about
/// it at admission. Lane and ECN capability never change after classification.
#[derive(Debug, Clone)]
pub struct ClassifiedPacket<P> {
    pub(crate) packet: P,
    lane: Lane,
    ecn_capable: bool,
    enqueued_at: SimTime,
    // L4S only: the step threshold applies because a queue was building
    pub(crate) apply_step: bool,
}

impl<P> ClassifiedPacket<P>
where
    P: Packet,
{
    pub fn new(packet: P, lane: Lane) -> Self {
        let ecn_capable = packet.ecn().is_ect();
        Self {
            packet,
            lane,
            ecn_capable,
            enqueued_at: SimTime::ZERO,
            apply_step: false,
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn ecn_capable(&self) -> bool {
        self.ecn_capable
    }

    pub fn enqueued_at(&self) -> SimTime {
        self.enqueued_at
    }

    pub fn length(&self) -> usize {
        self.packet.length()
    }

    pub fn packet(&self) -> &P {
        &self.packet
    }

    pub fn into_packet(self) -> P {
        self.packet
    }

    pub(crate) fn stamp(&mut self, now: SimTime) {
        self.enqueued_at = now;
        self.packet.set_timestamp(now);
    }

    pub fn sojourn(&self, now: SimTime) -> std::time::Duration {
        now - self.enqueued_at
    }

    pub(crate) fn mark(&mut self) -> bool {
        self.ecn_capable && self.packet.mark_ce()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::StdPacket;

    #[test]
    fn l4s_mask_routes_ect1_and_ce() {
        let classifier = Classifier::new(EcnCodePointMask::L4sEct);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::NotEct), Lane::Classic);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::Ect0), Lane::Classic);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::Ect1), Lane::L4s);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::Ce), Lane::L4s);
    }

    #[test]
    fn any_ect_mask_routes_ect0() {
        let classifier = Classifier::new(EcnCodePointMask::AnyEct);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::Ect0), Lane::L4s);
        assert_eq!(classifier.classify_codepoint(EcnCodepoint::NotEct), Lane::Classic);
    }

    #[test]
    fn no_ecn_mask_is_single_queue() {
        let classifier = Classifier::new(EcnCodePointMask::NoEcn);
        for bits in 0..4 {
            assert_eq!(
                classifier.classify_codepoint(EcnCodepoint::from_bits(bits)),
                Lane::Classic
            );
        }
    }

    #[test]
    fn classification_is_immutable_across_marking() {
        let mut cb = ClassifiedPacket::new(StdPacket::new(100, EcnCodepoint::Ect1), Lane::L4s);
        assert!(cb.ecn_capable());
        assert!(cb.mark());
        assert_eq!(cb.packet().ecn(), EcnCodepoint::Ce);
        assert!(cb.ecn_capable());
        assert_eq!(cb.lane(), Lane::L4s);

        let mut cb = ClassifiedPacket::new(StdPacket::new(100, EcnCodepoint::NotEct), Lane::Classic);
        assert!(!cb.mark());
    }
}
