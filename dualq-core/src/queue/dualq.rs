//! Dual-queue coupled AQM.
//!
//! Reference: RFC 9332 and https://github.com/L4STeam/linux/blob/testing/net/sched/sch_dualpi2.c
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{AdmissionResult, DropReason, LaneQueue, LaneQueueConfig, PacketQueue, QueueStats};
use crate::aqm::{Action, CoupledAqm, CoupledAqmConfig};
use crate::classifier::{ClassifiedPacket, Classifier, EcnCodePointMask};
use crate::error::{Error, EventClock, Result};
use crate::packet::{EcnCodepoint, Lane, Packet};
use crate::scheduler::{DequeueScheduler, SchedulerPolicy, SchedulerState};
use crate::telemetry::TelemetrySink;
use crate::time::SimTime;

/// Threshold of the step AQM on the L4S lane.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepThreshold {
    Packets(u32),
    Delay(#[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))] Duration),
}

impl Default for StepThreshold {
    fn default() -> Self {
        StepThreshold::Delay(Duration::from_millis(1))
    }
}

// `None` is written as "Disabled" so that a file can switch the step off.
#[cfg(feature = "serde")]
mod step_setting {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::StepThreshold;

    #[derive(Deserialize, Serialize)]
    enum StepSetting {
        Disabled,
        Packets(u32),
        Delay(#[serde(with = "crate::utils::serde::duration")] Duration),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<StepThreshold>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match StepSetting::deserialize(deserializer)? {
            StepSetting::Disabled => None,
            StepSetting::Packets(thresh) => Some(StepThreshold::Packets(thresh)),
            StepSetting::Delay(thresh) => Some(StepThreshold::Delay(thresh)),
        })
    }

    pub fn serialize<S>(value: &Option<StepThreshold>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *value {
            None => StepSetting::Disabled,
            Some(StepThreshold::Packets(thresh)) => StepSetting::Packets(thresh),
            Some(StepThreshold::Delay(thresh)) => StepSetting::Delay(thresh),
        }
        .serialize(serializer)
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct DualQConfig {
    pub classic: LaneQueueConfig,
    pub l4s: LaneQueueConfig,
    pub aqm: CoupledAqmConfig,
    pub scheduler: SchedulerPolicy,
    pub ecn_mask: EcnCodePointMask,
    #[cfg_attr(feature = "serde", serde(with = "step_setting"))]
    pub l4s_step: Option<StepThreshold>, // None disables the step AQM
    pub drop_early: bool,                // decide at admission rather than at dequeue
    pub mtu: u32,                        // device MTU, or minimal queue backlog in bytes
}

impl Default for DualQConfig {
    fn default() -> Self {
        Self {
            classic: LaneQueueConfig::default(),
            l4s: LaneQueueConfig::default(),
            aqm: CoupledAqmConfig::default(),
            scheduler: SchedulerPolicy::default(),
            ecn_mask: EcnCodePointMask::default(),
            l4s_step: Some(StepThreshold::default()),
            drop_early: true,
            mtu: 1500,
        }
    }
}

impl DualQConfig {
    pub fn validate(&self) -> Result<()> {
        self.classic.validate()?;
        self.l4s.validate()?;
        self.aqm.validate()?;
        self.scheduler.validate()?;
        if self.mtu == 0 {
            return Err(Error::config("mtu must be positive"));
        }
        if self.l4s_step == Some(StepThreshold::Packets(0)) {
            return Err(Error::config("step threshold must be positive"));
        }
        Ok(())
    }
}

/// Two lanes, one coupled PI2 controller and one scheduler serving a single link.
#[derive(Debug)]
pub struct DualQueue<P, T = ()>
where
    P: Packet,
    T: TelemetrySink,
{
    classic: LaneQueue<P>,
    l4s: LaneQueue<P>,
    classifier: Classifier,
    aqm: CoupledAqm,
    scheduler: DequeueScheduler,

    l4s_step: Option<StepThreshold>,
    drop_early: bool,
    mtu: u32,

    clock: EventClock,
    // a lane dequeued since the last tick feeds that sojourn to the PI loop
    sampled: [bool; 2],
    stats: QueueStats,
    telemetry: T,
}

impl<P> DualQueue<P>
where
    P: Packet,
{
    pub fn new(config: DualQConfig) -> Result<Self> {
        Self::with_telemetry(config, ())
    }
}

impl<P, T> DualQueue<P, T>
where
    P: Packet,
    T: TelemetrySink,
{
    pub fn with_telemetry(config: DualQConfig, telemetry: T) -> Result<Self> {
        config.validate()?;
        debug!(?config, "New DualQueue");
        Ok(Self {
            classic: LaneQueue::new(Lane::Classic, config.classic)?,
            l4s: LaneQueue::new(Lane::L4s, config.l4s)?,
            classifier: Classifier::new(config.ecn_mask),
            aqm: CoupledAqm::new(config.aqm)?,
            scheduler: DequeueScheduler::new(config.scheduler, config.mtu)?,
            l4s_step: config.l4s_step,
            drop_early: config.drop_early,
            mtu: config.mtu,
            clock: EventClock::default(),
            sampled: [false; 2],
            stats: QueueStats::default(),
            telemetry,
        })
    }

    /// Applies a new configuration. Queued packets, the probability and the
    /// scheduler credit are kept; the scheduler is rebuilt only if its policy
    /// changed.
    pub fn configure(&mut self, config: DualQConfig) -> Result<()> {
        config.validate()?;
        debug!(?config, "Set DualQueue config");
        self.classic.configure(config.classic)?;
        self.l4s.configure(config.l4s)?;
        self.aqm.configure(config.aqm)?;
        if *self.scheduler.policy() != config.scheduler || self.mtu != config.mtu {
            self.scheduler = DequeueScheduler::new(config.scheduler, config.mtu)?;
        }
        self.classifier = Classifier::new(config.ecn_mask);
        self.l4s_step = config.l4s_step;
        self.drop_early = config.drop_early;
        self.mtu = config.mtu;
        Ok(())
    }

    fn lane(&self, lane: Lane) -> &LaneQueue<P> {
        match lane {
            Lane::Classic => &self.classic,
            Lane::L4s => &self.l4s,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneQueue<P> {
        match lane {
            Lane::Classic => &mut self.classic,
            Lane::L4s => &mut self.l4s,
        }
    }

    /// Runs every probability update due by `now`, each at its own deadline.
    ///
    /// The PI loop sees, per lane, the sojourn of the last packet dequeued
    /// since the previous update, or the head-of-line sojourn at the deadline
    /// if nothing left that lane in between.
    pub fn advance(&mut self, now: SimTime) -> Result<()> {
        self.clock.observe(now)?;
        while self.aqm.next_update() <= now {
            let tick = self.aqm.next_update();
            for lane in Lane::ALL {
                if !self.sampled[lane.index()] {
                    let sojourn = self.lane(lane).sojourn_estimate(tick);
                    self.aqm.observe(lane, sojourn);
                }
            }
            self.sampled = [false; 2];
            let mut sample = self.aqm.on_tick(tick)?;
            let l4s_head = self.l4s.sojourn_estimate(tick);
            if self.l4s_head_over_step(l4s_head) {
                sample.l4s = 1.0;
            }
            self.telemetry.on_probability(tick, &sample);
        }
        Ok(())
    }

    /// Admits a packet into the lane chosen by the caller.
    pub fn submit(&mut self, packet: P, lane: Lane, now: SimTime) -> Result<AdmissionResult> {
        self.advance(now)?;
        let mut packet = ClassifiedPacket::new(packet, lane);
        let length = packet.length();

        if !self.lane(lane).has_room(length) {
            trace!(
                %lane,
                queue_len = self.lane(lane).len(),
                "Drop packet({}) when enqueue",
                packet.packet().desc()
            );
            self.stats.lane_mut(lane).capacity_drops += 1;
            self.telemetry
                .on_drop(now, lane, DropReason::CapacityExceeded);
            return Ok(AdmissionResult::Dropped(DropReason::CapacityExceeded));
        }

        let mut marked = false;
        if self.drop_early {
            match self.aqm_decision(&packet, now) {
                Action::Drop => {
                    self.stats.lane_mut(lane).early_drops += 1;
                    self.telemetry.on_drop(now, lane, DropReason::AqmRejected);
                    return Ok(AdmissionResult::Dropped(DropReason::AqmRejected));
                }
                Action::Mark => {
                    marked = packet.mark();
                    self.stats.lane_mut(lane).coupled_marks += 1;
                }
                Action::Pass => {}
            }
        }

        // Only apply the step if a queue is building up
        packet.apply_step = lane == Lane::L4s && self.l4s.len() > 1;

        let result = self.lane_mut(lane).enqueue(packet, now);
        if result.is_accepted() {
            let stats = self.stats.lane_mut(lane);
            stats.enqueued_packets += 1;
            stats.enqueued_bytes += length as u64;
        }
        Ok(match result {
            AdmissionResult::Accepted { .. } => AdmissionResult::Accepted { marked },
            dropped => dropped,
        })
    }

    /// Classifies by ECN codepoint, then admits.
    pub fn enqueue(&mut self, packet: P, now: SimTime) -> Result<AdmissionResult> {
        let lane = self.classifier.classify(&packet);
        self.submit(packet, lane, now)
    }

    /// Hands the next packet to the link, or `None` if both lanes are empty.
    /// Packets dropped at dequeue are skipped over.
    pub fn on_link_ready(&mut self, now: SimTime) -> Result<Option<P>> {
        self.advance(now)?;
        loop {
            let Some(lane) = self.scheduler.select(
                now,
                self.classic.head_enqueued_at(),
                self.l4s.head_enqueued_at(),
            ) else {
                return Ok(None);
            };
            let Some(mut packet) = self.lane_mut(lane).dequeue() else {
                return Ok(None);
            };
            let length = packet.length();
            let sojourn = packet.sojourn(now);
            self.aqm.observe(lane, sojourn);
            self.sampled[lane.index()] = true;
            self.telemetry.on_sojourn(now, lane, sojourn);
            trace!(%lane, ?sojourn, "Dequeue packet({})", packet.packet().desc());

            // the link slot is used even if the packet is dropped below
            let other_backlogged = !self.lane(lane.other()).is_empty();
            self.scheduler
                .on_served(lane, now, length, other_backlogged);

            if !self.drop_early {
                match self.aqm_decision(&packet, now) {
                    Action::Drop => {
                        self.stats.lane_mut(lane).dequeue_drops += 1;
                        self.telemetry.on_drop(now, lane, DropReason::AqmRejected);
                        continue;
                    }
                    Action::Mark => {
                        packet.mark();
                        self.stats.lane_mut(lane).coupled_marks += 1;
                    }
                    Action::Pass => {}
                }
            }

            if lane == Lane::L4s && self.step_exceeded(&packet, sojourn) {
                if !packet.ecn_capable() {
                    trace!("Step threshold drops non-ECT packet({})", packet.packet().desc());
                    self.stats.lane_mut(lane).dequeue_drops += 1;
                    self.telemetry.on_decision(now, lane, Action::Drop);
                    self.telemetry.on_drop(now, lane, DropReason::AqmRejected);
                    continue;
                }
                if packet.packet().ecn() != EcnCodepoint::Ce && packet.mark() {
                    self.stats.lane_mut(lane).step_marks += 1;
                    self.telemetry.on_decision(now, lane, Action::Mark);
                }
            }

            let stats = self.stats.lane_mut(lane);
            stats.dequeued_packets += 1;
            stats.dequeued_bytes += length as u64;
            return Ok(Some(packet.into_packet()));
        }
    }

    fn aqm_decision(&mut self, packet: &ClassifiedPacket<P>, now: SimTime) -> Action {
        // Never drop or mark with less than two MTUs queued
        if self.classic.bytes() + self.l4s.bytes() < 2 * self.mtu as usize {
            return Action::Pass;
        }
        let lane = packet.lane();
        let action = self.aqm.admission_decision(lane, packet.ecn_capable());
        if action != Action::Pass {
            trace!(
                %lane,
                ?action,
                prob = self.aqm.probability(),
                "AQM decision on packet({})",
                packet.packet().desc()
            );
            self.telemetry.on_decision(now, lane, action);
        }
        action
    }

    fn step_exceeded(&self, packet: &ClassifiedPacket<P>, sojourn: Duration) -> bool {
        packet.apply_step && self.l4s_head_over_step(sojourn)
    }

    fn l4s_head_over_step(&self, sojourn: Duration) -> bool {
        match self.l4s_step {
            Some(StepThreshold::Packets(thresh)) => self.l4s.len() > thresh as usize,
            Some(StepThreshold::Delay(thresh)) => sojourn > thresh,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classic.is_empty() && self.l4s.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classic.len() + self.l4s.len()
    }

    pub fn lane_len(&self, lane: Lane) -> usize {
        self.lane(lane).len()
    }

    pub fn lane_bytes(&self, lane: Lane) -> usize {
        self.lane(lane).bytes()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn aqm(&self) -> &CoupledAqm {
        &self.aqm
    }

    pub fn aqm_mut(&mut self) -> &mut CoupledAqm {
        &mut self.aqm
    }

    pub fn scheduler(&self) -> &DequeueScheduler {
        &self.scheduler
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    pub fn into_telemetry(self) -> T {
        self.telemetry
    }
}

impl<P, T> PacketQueue<P> for DualQueue<P, T>
where
    P: Packet,
    T: TelemetrySink + Send,
{
    type Config = DualQConfig;

    fn configure(&mut self, config: Self::Config) -> Result<()> {
        DualQueue::configure(self, config)
    }

    fn enqueue(&mut self, packet: P, now: SimTime) -> Result<AdmissionResult> {
        DualQueue::enqueue(self, packet, now)
    }

    fn dequeue(&mut self, now: SimTime) -> Result<Option<P>> {
        self.on_link_ready(now)
    }

    fn is_empty(&self) -> bool {
        DualQueue::is_empty(self)
    }

    fn length(&self) -> usize {
        self.len()
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
