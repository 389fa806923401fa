use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::packet::Lane;

#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,
    pub capacity_drops: u64,
    pub early_drops: u64,   // AQM drops at admission
    pub dequeue_drops: u64, // AQM drops at dequeue, including the step AQM
    pub coupled_marks: u64,
    pub step_marks: u64,
}

impl LaneStats {
    pub fn drops(&self) -> u64 {
        self.capacity_drops + self.early_drops + self.dequeue_drops
    }

    pub fn marks(&self) -> u64 {
        self.coupled_marks + self.step_marks
    }
}

/// Counters of one queue discipline, the drop and mark outcomes are reported
/// here rather than as errors.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub classic: LaneStats,
    pub l4s: LaneStats,
}

impl QueueStats {
    pub fn lane(&self, lane: Lane) -> &LaneStats {
        match lane {
            Lane::Classic => &self.classic,
            Lane::L4s => &self.l4s,
        }
    }

    pub(crate) fn lane_mut(&mut self, lane: Lane) -> &mut LaneStats {
        match lane {
            Lane::Classic => &mut self.classic,
            Lane::L4s => &mut self.l4s,
        }
    }

    pub fn total_drops(&self) -> u64 {
        self.classic.drops() + self.l4s.drops()
    }

    pub fn total_marks(&self) -> u64 {
        self.classic.marks() + self.l4s.marks()
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lane in Lane::ALL {
            let stats = self.lane(lane);
            writeln!(
                f,
                "{:>7}: enqueued {} pkts ({} B), dequeued {} pkts ({} B), dropped {} (overlimit {}, early {}, dequeue {}), marked {} (coupled {}, step {})",
                lane,
                stats.enqueued_packets,
                stats.enqueued_bytes,
                stats.dequeued_packets,
                stats.dequeued_bytes,
                stats.drops(),
                stats.capacity_drops,
                stats.early_drops,
                stats.dequeue_drops,
                stats.marks(),
                stats.coupled_marks,
                stats.step_marks,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_both_lanes() {
        let stats = QueueStats {
            classic: LaneStats {
                enqueued_packets: 10,
                enqueued_bytes: 15000,
                dequeued_packets: 7,
                dequeued_bytes: 10500,
                capacity_drops: 1,
                early_drops: 2,
                ..Default::default()
            },
            l4s: LaneStats {
                enqueued_packets: 4,
                enqueued_bytes: 4000,
                dequeued_packets: 4,
                dequeued_bytes: 4000,
                coupled_marks: 3,
                step_marks: 1,
                ..Default::default()
            },
        };
        assert_eq!(stats.total_drops(), 3);
        assert_eq!(stats.total_marks(), 4);
        insta::assert_snapshot!(stats.to_string().trim_end(), @r"
classic: enqueued 10 pkts (15000 B), dequeued 7 pkts (10500 B), dropped 3 (overlimit 1, early 2, dequeue 0), marked 0 (coupled 0, step 0)
    l4s: enqueued 4 pkts (4000 B), dequeued 4 pkts (4000 B), dropped 0 (overlimit 0, early 0, dequeue 0), marked 4 (coupled 3, step 1)
");
    }
}
