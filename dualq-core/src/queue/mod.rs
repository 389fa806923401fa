use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::Packet;
use crate::telemetry::TelemetrySink;
use crate::time::SimTime;

mod droptail;
mod dualq;
mod lane;
mod stats;

pub use droptail::*;
pub use dualq::*;
pub use lane::*;
pub use stats::*;

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The lane was full, the arrival was tail-dropped.
    CapacityExceeded,
    /// The AQM decided to drop the packet, at admission or at dequeue.
    AqmRejected,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::CapacityExceeded => f.write_str("overlimit"),
            DropReason::AqmRejected => f.write_str("aqm"),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionResult {
    /// Queued, `marked` tells whether CE was set on the way in.
    Accepted { marked: bool },
    Dropped(DropReason),
}

impl AdmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionResult::Accepted { .. })
    }
}

pub trait PacketQueue<P>: Send
where
    P: Packet,
{
    #[cfg(feature = "serde")]
    type Config: for<'a> Deserialize<'a> + Serialize + Send + std::fmt::Debug;
    #[cfg(not(feature = "serde"))]
    type Config: Send + std::fmt::Debug;

    fn configure(&mut self, config: Self::Config) -> Result<()>;

    /// Admits an arriving packet. Drops are outcomes, only a stale `now` is
    /// an error.
    fn enqueue(&mut self, packet: P, now: SimTime) -> Result<AdmissionResult>;

    /// Called when the link can send one more packet.
    fn dequeue(&mut self, now: SimTime) -> Result<Option<P>>;

    fn is_empty(&self) -> bool;

    // The number of packets in the queue
    fn length(&self) -> usize;

    fn stats(&self) -> &QueueStats;
}

/// Queue discipline selected once from a [`QueueDiscConfig`](crate::config::QueueDiscConfig).
#[derive(Debug)]
pub enum QueueDisc<P, T = ()>
where
    P: Packet,
    T: TelemetrySink,
{
    DropTail(DropTailQueue<P, T>),
    DualPi2(DualQueue<P, T>),
}

impl<P, T> QueueDisc<P, T>
where
    P: Packet + Send,
    T: TelemetrySink + Send,
{
    pub fn enqueue(&mut self, packet: P, now: SimTime) -> Result<AdmissionResult> {
        match self {
            QueueDisc::DropTail(queue) => PacketQueue::enqueue(queue, packet, now),
            QueueDisc::DualPi2(queue) => PacketQueue::enqueue(queue, packet, now),
        }
    }

    pub fn dequeue(&mut self, now: SimTime) -> Result<Option<P>> {
        match self {
            QueueDisc::DropTail(queue) => queue.dequeue(now),
            QueueDisc::DualPi2(queue) => queue.dequeue(now),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            QueueDisc::DropTail(queue) => queue.is_empty(),
            QueueDisc::DualPi2(queue) => PacketQueue::is_empty(queue),
        }
    }

    pub fn length(&self) -> usize {
        match self {
            QueueDisc::DropTail(queue) => queue.length(),
            QueueDisc::DualPi2(queue) => queue.length(),
        }
    }

    pub fn stats(&self) -> &QueueStats {
        match self {
            QueueDisc::DropTail(queue) => PacketQueue::stats(queue),
            QueueDisc::DualPi2(queue) => PacketQueue::stats(queue),
        }
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        match self {
            QueueDisc::DropTail(queue) => queue.telemetry_mut(),
            QueueDisc::DualPi2(queue) => queue.telemetry_mut(),
        }
    }
}
