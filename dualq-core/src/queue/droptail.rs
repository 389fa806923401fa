#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AdmissionResult, LaneQueue, LaneQueueConfig, PacketQueue, QueueStats};
use crate::classifier::ClassifiedPacket;
use crate::error::{EventClock, Result};
use crate::packet::{Lane, Packet};
use crate::telemetry::TelemetrySink;
use crate::time::SimTime;

/// Single FIFO baseline. Every packet shares one lane whatever its ECN
/// codepoint, and the counters are reported under the Classic lane.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DropTailQueueConfig {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub limits: LaneQueueConfig,
}

impl DropTailQueueConfig {
    pub fn new<A: Into<Option<usize>>, B: Into<Option<usize>>>(packet_limit: A, byte_limit: B) -> Self {
        Self {
            limits: LaneQueueConfig::new(packet_limit, byte_limit),
        }
    }
}

#[derive(Debug)]
pub struct DropTailQueue<P, T = ()>
where
    P: Packet,
    T: TelemetrySink,
{
    queue: LaneQueue<P>,
    clock: EventClock,
    stats: QueueStats,
    telemetry: T,
}

impl<P> DropTailQueue<P>
where
    P: Packet,
{
    pub fn new(config: DropTailQueueConfig) -> Result<Self> {
        Self::with_telemetry(config, ())
    }
}

impl<P, T> DropTailQueue<P, T>
where
    P: Packet,
    T: TelemetrySink,
{
    pub fn with_telemetry(config: DropTailQueueConfig, telemetry: T) -> Result<Self> {
        debug!(?config, "New DropTailQueue");
        Ok(Self {
            queue: LaneQueue::new(Lane::Classic, config.limits)?,
            clock: EventClock::default(),
            stats: QueueStats::default(),
            telemetry,
        })
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }
}

impl<P, T> PacketQueue<P> for DropTailQueue<P, T>
where
    P: Packet,
    T: TelemetrySink + Send,
{
    type Config = DropTailQueueConfig;

    fn configure(&mut self, config: Self::Config) -> Result<()> {
        self.queue.configure(config.limits)
    }

    fn enqueue(&mut self, packet: P, now: SimTime) -> Result<AdmissionResult> {
        self.clock.observe(now)?;
        let length = packet.length();
        let lane = self.queue.lane();
        let result = self.queue.enqueue(ClassifiedPacket::new(packet, lane), now);
        let stats = self.stats.lane_mut(lane);
        match result {
            AdmissionResult::Accepted { .. } => {
                stats.enqueued_packets += 1;
                stats.enqueued_bytes += length as u64;
            }
            AdmissionResult::Dropped(reason) => {
                stats.capacity_drops += 1;
                self.telemetry.on_drop(now, lane, reason);
            }
        }
        Ok(result)
    }

    fn dequeue(&mut self, now: SimTime) -> Result<Option<P>> {
        self.clock.observe(now)?;
        let Some(packet) = self.queue.dequeue() else {
            return Ok(None);
        };
        let lane = self.queue.lane();
        self.telemetry.on_sojourn(now, lane, packet.sojourn(now));
        let stats = self.stats.lane_mut(lane);
        stats.dequeued_packets += 1;
        stats.dequeued_bytes += packet.length() as u64;
        Ok(Some(packet.into_packet()))
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn length(&self) -> usize {
        self.queue.len()
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
