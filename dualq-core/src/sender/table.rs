use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info, trace};

use super::{CongestionSignal, FlowId, Reaction, Sender, SenderConfig};
use crate::error::{Error, EventClock, Result};
use crate::telemetry::TelemetrySink;
use crate::time::SimTime;

/// The senders of one run, keyed by flow.
///
/// Cooldown expiries are exposed as ordinary timer events through
/// [`next_timer`](Self::next_timer) and [`expire`](Self::expire), so the
/// embedding event loop schedules them like any other event.
#[derive(Debug)]
pub struct SenderTable<T = ()>
where
    T: TelemetrySink,
{
    senders: BTreeMap<FlowId, Sender>,
    timers: BTreeSet<(SimTime, FlowId)>,
    clock: EventClock,
    telemetry: T,
}

impl Default for SenderTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderTable {
    pub fn new() -> Self {
        Self::with_telemetry(())
    }
}

impl<T> SenderTable<T>
where
    T: TelemetrySink,
{
    pub fn with_telemetry(telemetry: T) -> Self {
        Self {
            senders: BTreeMap::new(),
            timers: BTreeSet::new(),
            clock: EventClock::default(),
            telemetry,
        }
    }

    pub fn open(&mut self, flow: FlowId, config: SenderConfig) -> Result<&mut Sender> {
        if self.senders.contains_key(&flow) {
            return Err(Error::DuplicateFlow(flow));
        }
        let sender = Sender::new(flow, config)?;
        info!(%flow, policy = ?sender.policy(), window = sender.window(), "Open flow");
        Ok(self.senders.entry(flow).or_insert(sender))
    }

    /// Removes the flow together with its pending cooldown expiry.
    pub fn close(&mut self, flow: FlowId) -> Result<Sender> {
        let sender = self.senders.remove(&flow).ok_or(Error::UnknownFlow(flow))?;
        self.cancel_timer(flow);
        info!(%flow, window = sender.window(), "Close flow");
        Ok(sender)
    }

    // At most one expiry is pending per flow
    fn cancel_timer(&mut self, flow: FlowId) {
        self.timers.retain(|(_, pending)| *pending != flow);
    }

    pub fn get(&self, flow: FlowId) -> Option<&Sender> {
        self.senders.get(&flow)
    }

    pub fn get_mut(&mut self, flow: FlowId) -> Option<&mut Sender> {
        self.senders.get_mut(&flow)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowId, &Sender)> {
        self.senders.iter()
    }

    /// Delivers a congestion signal to a flow.
    pub fn signal(
        &mut self,
        flow: FlowId,
        now: SimTime,
        signal: CongestionSignal,
    ) -> Result<Reaction> {
        self.clock.observe(now)?;
        let sender = self.senders.get_mut(&flow).ok_or(Error::UnknownFlow(flow))?;
        let reaction = sender.on_signal(now, signal);
        if let Reaction::Reduced { from, to } = reaction {
            let deadline = sender.cooldown_deadline();
            self.cancel_timer(flow);
            if let Some(deadline) = deadline {
                self.timers.insert((deadline, flow));
            }
            self.telemetry.on_window(now, flow, from, to);
        }
        Ok(reaction)
    }

    pub fn ack(&mut self, flow: FlowId, now: SimTime, acked: u32) -> Result<f64> {
        self.clock.observe(now)?;
        let sender = self.senders.get_mut(&flow).ok_or(Error::UnknownFlow(flow))?;
        let old = sender.window();
        let new = sender.on_ack(acked);
        self.telemetry.on_window(now, flow, old, new);
        Ok(new)
    }

    pub fn rtt_sample(&mut self, flow: FlowId, now: SimTime, rtt: Duration) -> Result<()> {
        self.clock.observe(now)?;
        let sender = self.senders.get_mut(&flow).ok_or(Error::UnknownFlow(flow))?;
        // the pending expiry stays where it was scheduled
        sender.on_rtt_sample(rtt);
        trace!(%flow, ?rtt, srtt = ?sender.srtt(), "RTT sample");
        self.telemetry.on_rtt(now, flow, rtt, sender.srtt());
        Ok(())
    }

    /// Earliest pending cooldown expiry.
    pub fn next_timer(&self) -> Option<SimTime> {
        self.timers.first().map(|(deadline, _)| *deadline)
    }

    /// Fires every cooldown expiry due by `now` and returns the flows that
    /// may react again.
    pub fn expire(&mut self, now: SimTime) -> Result<Vec<FlowId>> {
        self.clock.observe(now)?;
        let mut expired = Vec::new();
        while let Some(&(deadline, flow)) = self.timers.first() {
            if deadline > now {
                break;
            }
            self.timers.pop_first();
            debug!(%flow, %deadline, "Cooldown expired");
            expired.push(flow);
        }
        Ok(expired)
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }
}
