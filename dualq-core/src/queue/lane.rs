use std::collections::VecDeque;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{AdmissionResult, DropReason};
use crate::classifier::ClassifiedPacket;
use crate::error::{Error, Result};
use crate::packet::{Lane, Packet};
use crate::time::SimTime;

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneQueueConfig {
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::limit"))]
    pub packet_limit: Option<usize>, // None means unlimited
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::limit"))]
    pub byte_limit: Option<usize>, // None means unlimited
}

impl Default for LaneQueueConfig {
    fn default() -> Self {
        Self {
            packet_limit: Some(10_000),
            byte_limit: None,
        }
    }
}

impl LaneQueueConfig {
    pub fn new<A: Into<Option<usize>>, B: Into<Option<usize>>>(packet_limit: A, byte_limit: B) -> Self {
        Self {
            packet_limit: packet_limit.into(),
            byte_limit: byte_limit.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_limit == Some(0) {
            return Err(Error::config("packet limit must be positive"));
        }
        if self.byte_limit == Some(0) {
            return Err(Error::config("byte limit must be positive"));
        }
        Ok(())
    }
}

/// A bounded FIFO holding the packets of one lane.
#[derive(Debug)]
pub struct LaneQueue<P> {
    lane: Lane,
    queue: VecDeque<ClassifiedPacket<P>>,
    packet_limit: Option<usize>,
    byte_limit: Option<usize>,
    now_bytes: usize,
}

impl<P> LaneQueue<P>
where
    P: Packet,
{
    pub fn new(lane: Lane, config: LaneQueueConfig) -> Result<Self> {
        config.validate()?;
        debug!(%lane, ?config, "New LaneQueue");
        Ok(Self {
            lane,
            queue: VecDeque::new(),
            packet_limit: config.packet_limit,
            byte_limit: config.byte_limit,
            now_bytes: 0,
        })
    }

    /// New limits only affect later arrivals; packets already queued stay.
    pub fn configure(&mut self, config: LaneQueueConfig) -> Result<()> {
        config.validate()?;
        self.packet_limit = config.packet_limit;
        self.byte_limit = config.byte_limit;
        Ok(())
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Whether a packet of `length` bytes fits without exceeding either limit.
    pub fn has_room(&self, length: usize) -> bool {
        self.packet_limit
            .map_or(true, |limit| self.queue.len() < limit)
            && self
                .byte_limit
                .map_or(true, |limit| self.now_bytes + length <= limit)
    }

    /// Tail-drops the arrival when the lane is full; queued packets are never evicted.
    pub fn enqueue(&mut self, mut packet: ClassifiedPacket<P>, now: SimTime) -> AdmissionResult {
        if !self.has_room(packet.length()) {
            trace!(
                lane = %self.lane,
                queue_len = self.queue.len(),
                now_bytes = self.now_bytes,
                "Drop packet({}) when enqueue",
                packet.packet().desc()
            );
            return AdmissionResult::Dropped(DropReason::CapacityExceeded);
        }
        packet.stamp(now);
        self.now_bytes += packet.length();
        self.queue.push_back(packet);
        AdmissionResult::Accepted { marked: false }
    }

    pub fn dequeue(&mut self) -> Option<ClassifiedPacket<P>> {
        let packet = self.queue.pop_front()?;
        self.now_bytes -= packet.length();
        Some(packet)
    }

    pub fn peek(&self) -> Option<&ClassifiedPacket<P>> {
        self.queue.front()
    }

    pub fn head_enqueued_at(&self) -> Option<SimTime> {
        self.queue.front().map(|packet| packet.enqueued_at())
    }

    /// Sojourn time of the head packet so far, zero when the lane is empty.
    pub fn sojourn_estimate(&self, now: SimTime) -> Duration {
        self.head_enqueued_at()
            .map_or(Duration::ZERO, |enqueued_at| now - enqueued_at)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn bytes(&self) -> usize {
        self.now_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EcnCodepoint, StdPacket};

    fn packet(id: u32, length: usize) -> ClassifiedPacket<StdPacket> {
        ClassifiedPacket::new(
            StdPacket::new(length, EcnCodepoint::NotEct).with_flow_id(id),
            Lane::Classic,
        )
    }

    #[test_log::test]
    fn tail_drop_at_packet_limit() -> Result<()> {
        let mut queue = LaneQueue::new(Lane::Classic, LaneQueueConfig::new(100, None))?;
        let mut accepted = 0;
        let mut dropped = 0;
        for i in 0..150 {
            match queue.enqueue(packet(i, 1000), SimTime::ZERO) {
                AdmissionResult::Accepted { .. } => accepted += 1,
                AdmissionResult::Dropped(DropReason::CapacityExceeded) => dropped += 1,
                other => panic!("unexpected result {:?}", other),
            }
        }
        assert_eq!(accepted, 100);
        assert_eq!(dropped, 50);
        assert_eq!(queue.len(), 100);
        // the survivors are the first 100 arrivals
        assert_eq!(queue.peek().unwrap().packet().get_flow_id(), 0);
        Ok(())
    }

    #[test_log::test]
    fn tail_drop_at_byte_limit() -> Result<()> {
        let mut queue = LaneQueue::new(Lane::Classic, LaneQueueConfig::new(None, 2500))?;
        assert!(queue.enqueue(packet(0, 1000), SimTime::ZERO).is_accepted());
        assert!(queue.enqueue(packet(1, 1000), SimTime::ZERO).is_accepted());
        assert!(!queue.enqueue(packet(2, 1000), SimTime::ZERO).is_accepted());
        assert!(queue.enqueue(packet(3, 500), SimTime::ZERO).is_accepted());
        assert_eq!(queue.bytes(), 2500);
        Ok(())
    }

    #[test_log::test]
    fn fifo_order_and_sojourn() -> Result<()> {
        let mut queue = LaneQueue::new(Lane::Classic, LaneQueueConfig::default())?;
        assert_eq!(queue.sojourn_estimate(SimTime::from_millis(3)), Duration::ZERO);
        for i in 0..10 {
            queue.enqueue(packet(i, 100), SimTime::from_millis(i as u64));
        }
        assert_eq!(
            queue.sojourn_estimate(SimTime::from_millis(20)),
            Duration::from_millis(20)
        );
        for i in 0..10 {
            let head = queue.dequeue().unwrap();
            assert_eq!(head.packet().get_flow_id(), i);
            assert_eq!(head.enqueued_at(), SimTime::from_millis(i as u64));
        }
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.bytes(), 0);
        Ok(())
    }

    #[test]
    fn zero_capacity_is_invalid() {
        assert!(LaneQueue::<StdPacket>::new(Lane::L4s, LaneQueueConfig::new(0, None)).is_err());
        assert!(LaneQueue::<StdPacket>::new(Lane::L4s, LaneQueueConfig::new(None, 0)).is_err());
    }
}
