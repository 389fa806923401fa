//! Coupled PI2 controller shared by the Classic and L4S lanes.
//!
//! Reference: RFC 9332 and https://github.com/L4STeam/linux/blob/testing/net/sched/sch_dualpi2.c
//!
//! One base probability `p` is driven by a PI loop on queuing delay. Classic
//! packets see `p^2` (applied as two independent draws against `p`), L4S
//! packets see the coupled probability `k * p`. The square compensates for the
//! `1/sqrt(p)` throughput response of Reno/Cubic against the `1/p` response of
//! scalable congestion controls, so both settle at the same operating point.
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, EventClock, Result};
use crate::packet::Lane;
use crate::time::SimTime;

/// Outcome of one AQM draw.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Pass,
    Mark,
    Drop,
}

/// Which queuing delay feeds the PI loop.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DelayReference {
    /// Sojourn time of the Classic lane only.
    #[default]
    Classic,
    /// The larger of both lanes, as Linux DualPI2 does.
    MaxOfBoth,
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledAqmConfig {
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
    pub target: Duration, // target queuing delay
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
    pub tupdate: Duration, // interval between two probability updates
    pub alpha: f64,           // integral gain, Hz
    pub beta: f64,            // proportional gain, Hz
    pub coupling_factor: f64, // k
    pub delay_reference: DelayReference,
    // Apply the classic drop to L4S packets once k * p exceeds 1
    pub drop_on_overload: bool,
    pub seed: u64,
}

impl Default for CoupledAqmConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(15),
            tupdate: Duration::from_millis(16),
            alpha: 0.16,
            beta: 3.2,
            coupling_factor: 2.0,
            delay_reference: DelayReference::Classic,
            drop_on_overload: false,
            seed: 42,
        }
    }
}

impl CoupledAqmConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(Error::config(format!("alpha must be >= 0, got {}", self.alpha)));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(Error::config(format!("beta must be >= 0, got {}", self.beta)));
        }
        if !(self.coupling_factor.is_finite() && self.coupling_factor > 0.0) {
            return Err(Error::config(format!(
                "coupling factor must be > 0, got {}",
                self.coupling_factor
            )));
        }
        if self.tupdate.is_zero() {
            return Err(Error::config("tupdate must be non-zero"));
        }
        Ok(())
    }
}

/// Probabilities published after every update.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilitySample {
    pub base: f64,
    pub classic: f64,     // p^2
    pub coupled_l4s: f64, // min(k * p, 1)
    /// Coupled L4S probability, raised to 1 while the L4S step threshold is
    /// exceeded.
    pub l4s: f64,
    pub qdelay: Duration,
}

#[derive(Debug)]
pub struct CoupledAqm {
    config: CoupledAqmConfig,

    prob: f64,
    last_qdelay: Duration, // queuing delay used at the last update
    observed: [Duration; 2],

    last_update: Option<SimTime>,
    next_update: SimTime,
    clock: EventClock,

    rng: StdRng,
}

impl CoupledAqm {
    pub fn new(config: CoupledAqmConfig) -> Result<Self> {
        config.validate()?;
        debug!(?config, "New CoupledAqm");
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            next_update: SimTime::ZERO + config.tupdate,
            config,
            prob: 0.0,
            last_qdelay: Duration::ZERO,
            observed: [Duration::ZERO; 2],
            last_update: None,
            clock: EventClock::default(),
        })
    }

    /// Replaces the control parameters, keeping `p` and the RNG stream.
    pub fn configure(&mut self, config: CoupledAqmConfig) -> Result<()> {
        config.validate()?;
        debug!(?config, "Set CoupledAqm config");
        if let Some(last) = self.last_update {
            self.next_update = last + config.tupdate;
        } else {
            self.next_update = SimTime::ZERO + config.tupdate;
        }
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &CoupledAqmConfig {
        &self.config
    }

    pub fn probability(&self) -> f64 {
        self.prob
    }

    /// Forces the base probability, clamped to `[0, 1]`.
    pub fn set_probability(&mut self, prob: f64) {
        self.prob = if prob.is_nan() { 0.0 } else { prob.clamp(0.0, 1.0) };
    }

    pub fn classic_probability(&self) -> f64 {
        self.prob * self.prob
    }

    pub fn coupled_l4s_probability(&self) -> f64 {
        (self.config.coupling_factor * self.prob).min(1.0)
    }

    pub fn is_overloaded(&self) -> bool {
        self.config.coupling_factor * self.prob > 1.0
    }

    pub fn next_update(&self) -> SimTime {
        self.next_update
    }

    pub fn last_update(&self) -> Option<SimTime> {
        self.last_update
    }

    /// Records the latest sojourn sample of a lane. Samples of one lane must
    /// arrive in the order the packets were enqueued.
    pub fn observe(&mut self, lane: Lane, sojourn: Duration) {
        self.observed[lane.index()] = sojourn;
    }

    pub fn observed(&self, lane: Lane) -> Duration {
        self.observed[lane.index()]
    }

    fn qdelay(&self) -> Duration {
        match self.config.delay_reference {
            DelayReference::Classic => self.observed(Lane::Classic),
            DelayReference::MaxOfBoth => self.observed(Lane::Classic).max(self.observed(Lane::L4s)),
        }
    }

    /// One PI update:
    /// `p += alpha * (qdelay - target) + beta * (qdelay - last_qdelay)`, clamped to `[0, 1]`.
    pub fn on_tick(&mut self, now: SimTime) -> Result<ProbabilitySample> {
        self.clock.observe(now)?;

        let qdelay = self.qdelay();
        let error = qdelay.as_secs_f64() - self.config.target.as_secs_f64();
        let trend = qdelay.as_secs_f64() - self.last_qdelay.as_secs_f64();
        let delta = self.config.alpha * error + self.config.beta * trend;
        self.set_probability(self.prob + delta);
        self.last_qdelay = qdelay;

        self.last_update = Some(now);
        self.next_update = now + self.config.tupdate;

        trace!(
            %now,
            ?qdelay,
            delta,
            prob = self.prob,
            "Update coupled probability"
        );
        Ok(self.sample())
    }

    pub fn sample(&self) -> ProbabilitySample {
        ProbabilitySample {
            base: self.prob,
            classic: self.classic_probability(),
            coupled_l4s: self.coupled_l4s_probability(),
            l4s: self.coupled_l4s_probability(),
            qdelay: self.last_qdelay,
        }
    }

    fn roll(&mut self, prob: f64) -> bool {
        prob > 0.0 && self.rng.random::<f64>() < prob
    }

    fn classic_roll(&mut self) -> bool {
        let prob = self.prob;
        self.roll(prob) && self.roll(prob)
    }

    /// Draws the fate of one arriving (or departing) packet.
    ///
    /// A `Mark` is only ever returned for ECN-capable packets: whenever the
    /// draw would mark a Not-ECT packet it is dropped instead.
    pub fn admission_decision(&mut self, lane: Lane, ecn_capable: bool) -> Action {
        let overload = self.is_overloaded();
        let action = match lane {
            Lane::Classic => {
                if !self.classic_roll() {
                    Action::Pass
                } else if overload {
                    Action::Drop
                } else {
                    Action::Mark
                }
            }
            Lane::L4s => {
                if overload && self.config.drop_on_overload && self.classic_roll() {
                    Action::Drop
                } else if self.roll(self.coupled_l4s_probability()) {
                    Action::Mark
                } else {
                    Action::Pass
                }
            }
        };
        match action {
            Action::Mark if !ecn_capable => Action::Drop,
            action => action,
        }
    }
}
