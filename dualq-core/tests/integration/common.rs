use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use dualq_core::{
    packet::{EcnCodepoint, Packet, StdPacket},
    queue::{AdmissionResult, DualQConfig, DualQueue},
    sender::{CongestionSignal, FlowId, SenderConfig, SenderTable},
    telemetry::{TelemetrySink, TraceRecorder},
    Result, SimTime,
};
use tracing::{debug, info};

pub const MTU: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Event {
    LinkReady,
    Ack {
        flow: FlowId,
        sent_at: SimTime,
        ce: bool,
    },
    Loss {
        flow: FlowId,
    },
    CooldownTimer,
}

/// One bottleneck link fed by window-limited senders. Senders sit right in
/// front of the queue, acknowledgements and loss notifications come back one
/// base RTT after the packet left (or was dropped).
pub struct Bottleneck<T: TelemetrySink> {
    pub queue: DualQueue<StdPacket, T>,
    pub senders: SenderTable<TraceRecorder>,
    rate_bps: u64,
    base_rtt: Duration,

    events: BinaryHeap<Reverse<(SimTime, u64, Event)>>,
    seq: u64,
    link_busy: bool,
    timer_armed: Option<SimTime>,

    in_flight: BTreeMap<FlowId, u32>,
    pub delivered: BTreeMap<FlowId, u64>,
}

impl<T: TelemetrySink> Bottleneck<T> {
    pub fn new(config: DualQConfig, telemetry: T, rate_bps: u64, base_rtt: Duration) -> Result<Self> {
        Ok(Self {
            queue: DualQueue::with_telemetry(config, telemetry)?,
            senders: SenderTable::with_telemetry(TraceRecorder::new()),
            rate_bps,
            base_rtt,
            events: BinaryHeap::new(),
            seq: 0,
            link_busy: false,
            timer_armed: None,
            in_flight: BTreeMap::new(),
            delivered: BTreeMap::new(),
        })
    }

    pub fn add_flow(&mut self, flow: FlowId, config: SenderConfig) -> Result<()> {
        self.senders.open(flow, config)?;
        self.in_flight.insert(flow, 0);
        self.delivered.insert(flow, 0);
        Ok(())
    }

    /// Packets the link can carry in `duration`.
    pub fn capacity(&self, duration: Duration) -> f64 {
        duration.as_secs_f64() * self.rate_bps as f64 / (MTU * 8) as f64
    }

    fn schedule(&mut self, at: SimTime, event: Event) {
        self.seq += 1;
        self.events.push(Reverse((at, self.seq, event)));
    }

    fn transmission_time(&self, length: usize) -> Duration {
        Duration::from_secs_f64(length as f64 * 8.0 / self.rate_bps as f64)
    }

    fn try_send(&mut self, flow: FlowId, now: SimTime) -> Result<()> {
        loop {
            let Some(sender) = self.senders.get(flow) else {
                return Ok(());
            };
            let window = sender.window().floor() as u32;
            let ecn = if sender.ecn_capable() {
                EcnCodepoint::Ect1
            } else {
                EcnCodepoint::NotEct
            };
            let in_flight = self.in_flight.entry(flow).or_default();
            if *in_flight >= window {
                return Ok(());
            }
            *in_flight += 1;

            let packet = StdPacket::new(MTU, ecn).with_flow_id(flow.0);
            match self.queue.enqueue(packet, now)? {
                AdmissionResult::Accepted { .. } => {
                    if !self.link_busy {
                        self.link_busy = true;
                        self.schedule(now, Event::LinkReady);
                    }
                }
                AdmissionResult::Dropped(reason) => {
                    debug!(%flow, %now, %reason, "Packet dropped");
                    self.schedule(now + self.base_rtt, Event::Loss { flow });
                }
            }
        }
    }

    fn link_ready(&mut self, now: SimTime) -> Result<()> {
        match self.queue.on_link_ready(now)? {
            Some(packet) => {
                let done = now + self.transmission_time(packet.length());
                let ack = Event::Ack {
                    flow: FlowId(packet.get_flow_id()),
                    sent_at: packet.get_timestamp(),
                    ce: packet.ecn() == EcnCodepoint::Ce,
                };
                self.schedule(done + self.base_rtt, ack);
                self.schedule(done, Event::LinkReady);
            }
            None => self.link_busy = false,
        }
        Ok(())
    }

    fn settle(&mut self, flow: FlowId) {
        if let Some(in_flight) = self.in_flight.get_mut(&flow) {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    fn arm_timer(&mut self) {
        let next = self.senders.next_timer();
        if next.is_some() && next != self.timer_armed {
            self.timer_armed = next;
            if let Some(at) = next {
                self.schedule(at, Event::CooldownTimer);
            }
        }
    }

    pub fn run(&mut self, until: SimTime) -> Result<()> {
        let flows: Vec<FlowId> = self.in_flight.keys().copied().collect();
        for flow in flows {
            self.try_send(flow, SimTime::ZERO)?;
        }
        while let Some(Reverse((at, _, event))) = self.events.pop() {
            if at > until {
                break;
            }
            match event {
                Event::LinkReady => self.link_ready(at)?,
                Event::Ack { flow, sent_at, ce } => {
                    self.settle(flow);
                    *self.delivered.entry(flow).or_default() += 1;
                    self.senders.rtt_sample(flow, at, at - sent_at)?;
                    if ce {
                        self.senders.signal(flow, at, CongestionSignal::Mark)?;
                    } else {
                        self.senders.ack(flow, at, 1)?;
                    }
                    self.try_send(flow, at)?;
                }
                Event::Loss { flow } => {
                    self.settle(flow);
                    self.senders.signal(flow, at, CongestionSignal::Drop)?;
                    self.try_send(flow, at)?;
                }
                Event::CooldownTimer => {
                    self.senders.expire(at)?;
                }
            }
            self.arm_timer();
        }
        self.queue.advance(until)?;
        info!(delivered = ?self.delivered, "Run finished at {}\n{}", until, self.queue.stats());
        Ok(())
    }
}

pub fn mean<I: IntoIterator<Item = Duration>>(samples: I) -> Duration {
    let (sum, count) = samples
        .into_iter()
        .fold((Duration::ZERO, 0u32), |(sum, count), sample| (sum + sample, count + 1));
    if count == 0 {
        Duration::ZERO
    } else {
        sum / count
    }
}
