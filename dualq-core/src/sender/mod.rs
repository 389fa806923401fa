//! Minimal congestion response of a sender, enough to close the loop
//! around the queue: a window in segments that shrinks on congestion
//! signals and grows on acknowledgements.
use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::time::SimTime;

mod table;

pub use table::*;

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(transparent))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FlowId {
    fn from(id: u32) -> Self {
        FlowId(id)
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReactionPolicy {
    /// Reno/Cubic: halve on any congestion signal.
    #[default]
    ClassicLike,
    /// DCTCP/Prague: a small decrease per mark, halve on loss.
    ScalableLike,
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionSignal {
    Mark,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reaction {
    Reduced { from: f64, to: f64 },
    /// The signal arrived within the cooldown of the previous reduction.
    Suppressed,
}

const MAX_COOLDOWN_RTT_MULTIPLE: f64 = 100.0;

/// How long a reduction suppresses further ones.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cooldown {
    Fixed(#[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))] Duration),
    /// A multiple of the smoothed RTT.
    RttMultiple(f64),
}

impl Default for Cooldown {
    fn default() -> Self {
        Cooldown::RttMultiple(1.0)
    }
}

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Deserialize, Serialize),
    serde(default)
)]
#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    pub policy: ReactionPolicy,
    pub initial_window: f64, // segments
    pub min_window: f64,     // segments
    pub gain: f64,           // g, decrease per mark of a scalable sender
    pub cooldown: Cooldown,
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration"))]
    pub initial_rtt: Duration,
    // None follows the policy: only scalable senders negotiate ECN
    pub ecn_capable: Option<bool>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            policy: ReactionPolicy::default(),
            initial_window: 10.0,
            min_window: 2.0,
            gain: 1.0 / 16.0,
            cooldown: Cooldown::default(),
            initial_rtt: Duration::from_millis(15),
            ecn_capable: None,
        }
    }
}

impl SenderConfig {
    pub fn new(policy: ReactionPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gain > 0.0 && self.gain < 1.0) {
            return Err(Error::config(format!("gain must be within (0, 1), got {}", self.gain)));
        }
        if !(self.min_window.is_finite() && self.min_window > 0.0) {
            return Err(Error::config(format!(
                "window floor must be positive, got {}",
                self.min_window
            )));
        }
        if !(self.initial_window.is_finite() && self.initial_window >= self.min_window) {
            return Err(Error::config(format!(
                "initial window {} is below the floor {}",
                self.initial_window, self.min_window
            )));
        }
        if let Cooldown::RttMultiple(multiple) = self.cooldown {
            if !(0.0..=MAX_COOLDOWN_RTT_MULTIPLE).contains(&multiple) {
                return Err(Error::config(format!(
                    "cooldown multiple must be within 0..={}, got {}",
                    MAX_COOLDOWN_RTT_MULTIPLE, multiple
                )));
            }
        }
        if self.initial_rtt.is_zero() {
            return Err(Error::config("initial rtt must be non-zero"));
        }
        Ok(())
    }

    pub fn ecn_capable(&self) -> bool {
        self.ecn_capable
            .unwrap_or(self.policy == ReactionPolicy::ScalableLike)
    }
}

#[derive(Debug, Clone)]
pub struct Sender {
    flow: FlowId,
    config: SenderConfig,
    window: f64,
    srtt: Duration,
    last_reduction: Option<SimTime>,
    // fixed when the reduction happens, later RTT samples do not move it
    cooldown_until: Option<SimTime>,
}

impl Sender {
    pub fn new(flow: FlowId, config: SenderConfig) -> Result<Self> {
        config.validate()?;
        debug!(%flow, ?config, "New Sender");
        Ok(Self {
            flow,
            window: config.initial_window,
            srtt: config.initial_rtt,
            config,
            last_reduction: None,
            cooldown_until: None,
        })
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn policy(&self) -> ReactionPolicy {
        self.config.policy
    }

    pub fn ecn_capable(&self) -> bool {
        self.config.ecn_capable()
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    /// Forces the window, clamped at the floor.
    pub fn set_window(&mut self, window: f64) {
        self.window = window.max(self.config.min_window);
    }

    pub fn srtt(&self) -> Duration {
        self.srtt
    }

    pub fn last_reduction(&self) -> Option<SimTime> {
        self.last_reduction
    }

    fn cooldown(&self) -> Duration {
        match self.config.cooldown {
            Cooldown::Fixed(duration) => duration,
            Cooldown::RttMultiple(multiple) => {
                Duration::try_from_secs_f64(self.srtt.as_secs_f64() * multiple)
                    .unwrap_or(Duration::MAX)
            }
        }
    }

    /// End of the cooldown started by the last reduction.
    pub fn cooldown_deadline(&self) -> Option<SimTime> {
        self.cooldown_until
    }

    pub fn in_cooldown(&self, now: SimTime) -> bool {
        self.cooldown_deadline()
            .is_some_and(|deadline| now < deadline)
    }

    pub fn on_signal(&mut self, now: SimTime, signal: CongestionSignal) -> Reaction {
        if self.in_cooldown(now) {
            trace!(flow = %self.flow, ?signal, %now, "Reduction suppressed in cooldown");
            return Reaction::Suppressed;
        }
        let from = self.window;
        let target = match (self.config.policy, signal) {
            (ReactionPolicy::ScalableLike, CongestionSignal::Mark) => from * (1.0 - self.config.gain),
            _ => from / 2.0,
        };
        self.window = target.max(self.config.min_window);
        self.last_reduction = Some(now);
        self.cooldown_until = Some(SimTime::from_duration(
            now.as_duration().saturating_add(self.cooldown()),
        ));
        info!(
            flow = %self.flow,
            ?signal,
            from,
            to = self.window,
            "Window reduced"
        );
        Reaction::Reduced {
            from,
            to: self.window,
        }
    }

    pub fn on_mark(&mut self, now: SimTime) -> Reaction {
        self.on_signal(now, CongestionSignal::Mark)
    }

    pub fn on_drop(&mut self, now: SimTime) -> Reaction {
        self.on_signal(now, CongestionSignal::Drop)
    }

    /// Congestion avoidance, `acked / w` segments per acknowledgement.
    pub fn on_ack(&mut self, acked: u32) -> f64 {
        self.window += acked as f64 / self.window;
        self.window
    }

    pub fn on_rtt_sample(&mut self, rtt: Duration) {
        self.srtt = self.srtt.mul_f64(7.0 / 8.0) + rtt.mul_f64(1.0 / 8.0);
    }
}
