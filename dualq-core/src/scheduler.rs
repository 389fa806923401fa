//! Arbitration between the two lanes on every link-ready event.
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::packet::Lane;
use crate::time::SimTime;

/// We express the weights (wc, wl) in %, i.e., wc + wl = 100
const MAX_WEIGHT: u8 = 100;

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(tag = "policy")
)]
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerPolicy {
    /// L4S first, unless Classic has waited `bound` since it was last served
    /// (or since its head arrived, if later).
    StarvationBound {
        #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
        bound: Duration,
    },
    /// Byte-credit WRR of Linux DualPI2, Classic gets `classic_weight`% under contention.
    WeightedCredit { classic_weight: u8 },
    /// Serve the older head after crediting L4S packets with `time_shift`.
    TimeShiftedFifo {
        #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
        time_shift: Duration,
    },
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        SchedulerPolicy::StarvationBound {
            bound: Duration::from_millis(10),
        }
    }
}

impl SchedulerPolicy {
    pub fn validate(&self) -> Result<()> {
        match self {
            SchedulerPolicy::StarvationBound { bound } if bound.is_zero() => {
                Err(Error::config("starvation bound must be non-zero"))
            }
            SchedulerPolicy::WeightedCredit { classic_weight }
                if *classic_weight == 0 || *classic_weight >= MAX_WEIGHT =>
            {
                Err(Error::config(format!(
                    "classic weight must be within 1..=99, got {}",
                    classic_weight
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Empty,
    ServingClassic,
    ServingL4s,
}

/// Describes which queue to dequeue from
type QueueCredit = i64;

#[derive(Debug)]
pub struct DequeueScheduler {
    policy: SchedulerPolicy,
    state: SchedulerState,
    last_service: [Option<SimTime>; 2],

    /* Classic queue starvation protection (WeightedCredit) */
    credit: QueueCredit,
    credit_init: QueueCredit,
    wc: i64,
    wl: i64,
}

impl DequeueScheduler {
    pub fn new(policy: SchedulerPolicy, mtu: u32) -> Result<Self> {
        policy.validate()?;
        let (wc, wl) = match policy {
            SchedulerPolicy::WeightedCredit { classic_weight } => {
                (classic_weight as i64, (MAX_WEIGHT - classic_weight) as i64)
            }
            _ => (0, 0),
        };
        let credit_init = mtu as i64 * (wc - wl);
        debug!(?policy, credit_init, "New DequeueScheduler");
        Ok(Self {
            policy,
            state: SchedulerState::Empty,
            last_service: [None; 2],
            credit: credit_init,
            credit_init,
            wc,
            wl,
        })
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_service(&self, lane: Lane) -> Option<SimTime> {
        self.last_service[lane.index()]
    }

    /// Picks the lane to serve given the enqueue time of each lane's head
    /// packet (`None` for an empty lane). A lane facing an empty lane is
    /// always picked.
    pub fn select(
        &mut self,
        now: SimTime,
        classic_head: Option<SimTime>,
        l4s_head: Option<SimTime>,
    ) -> Option<Lane> {
        let lane = match (classic_head, l4s_head) {
            (None, None) => {
                self.credit = self.credit_init;
                None
            }
            (Some(_), None) => Some(Lane::Classic),
            (None, Some(_)) => Some(Lane::L4s),
            (Some(c_head), Some(l_head)) => Some(self.arbitrate(now, c_head, l_head)),
        };
        self.state = match lane {
            None => SchedulerState::Empty,
            Some(Lane::Classic) => SchedulerState::ServingClassic,
            Some(Lane::L4s) => SchedulerState::ServingL4s,
        };
        trace!(%now, ?classic_head, ?l4s_head, credit = self.credit, ?lane, "Select lane");
        lane
    }

    fn arbitrate(&self, now: SimTime, c_head: SimTime, l_head: SimTime) -> Lane {
        match self.policy {
            SchedulerPolicy::StarvationBound { bound } => {
                let waiting_since = self.last_service[Lane::Classic.index()]
                    .map_or(c_head, |served| served.max(c_head));
                if now - waiting_since >= bound {
                    Lane::Classic
                } else {
                    Lane::L4s
                }
            }
            SchedulerPolicy::WeightedCredit { .. } => {
                if self.credit <= 0 {
                    Lane::L4s
                } else {
                    Lane::Classic
                }
            }
            SchedulerPolicy::TimeShiftedFifo { time_shift } => {
                if (now - l_head) + time_shift >= now - c_head {
                    Lane::L4s
                } else {
                    Lane::Classic
                }
            }
        }
    }

    /// Accounts one transmission from `lane`. `other_backlogged` tells whether
    /// the other lane still holds packets, contention is what moves the credit.
    pub fn on_served(&mut self, lane: Lane, now: SimTime, length: usize, other_backlogged: bool) {
        self.last_service[lane.index()] = Some(now);
        if other_backlogged {
            let credit_change = match lane {
                Lane::L4s => self.wc,
                Lane::Classic => -self.wl,
            };
            self.credit += credit_change * length as i64;
        }
    }
}
