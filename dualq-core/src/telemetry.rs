//! Observer taps for trace recording.
//!
//! The queue and the sender table only know the [`TelemetrySink`] trait. `()`
//! discards everything; [`TraceRecorder`] keeps events in memory and
//! [`TextTraceWriter`] writes plain "time value" trace files for plotting.
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, warn};

use crate::aqm::{Action, ProbabilitySample};
use crate::error::Result;
use crate::packet::Lane;
use crate::queue::DropReason;
use crate::sender::FlowId;
use crate::time::SimTime;

pub trait TelemetrySink {
    fn on_probability(&mut self, _at: SimTime, _sample: &ProbabilitySample) {}

    fn on_sojourn(&mut self, _at: SimTime, _lane: Lane, _sojourn: Duration) {}

    /// An AQM draw that did something other than `Pass`.
    fn on_decision(&mut self, _at: SimTime, _lane: Lane, _action: Action) {}

    fn on_drop(&mut self, _at: SimTime, _lane: Lane, _reason: DropReason) {}

    fn on_window(&mut self, _at: SimTime, _flow: FlowId, _old: f64, _new: f64) {}

    fn on_rtt(&mut self, _at: SimTime, _flow: FlowId, _rtt: Duration, _srtt: Duration) {}
}

impl TelemetrySink for () {}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &mut T {
    fn on_probability(&mut self, at: SimTime, sample: &ProbabilitySample) {
        (**self).on_probability(at, sample)
    }

    fn on_sojourn(&mut self, at: SimTime, lane: Lane, sojourn: Duration) {
        (**self).on_sojourn(at, lane, sojourn)
    }

    fn on_decision(&mut self, at: SimTime, lane: Lane, action: Action) {
        (**self).on_decision(at, lane, action)
    }

    fn on_drop(&mut self, at: SimTime, lane: Lane, reason: DropReason) {
        (**self).on_drop(at, lane, reason)
    }

    fn on_window(&mut self, at: SimTime, flow: FlowId, old: f64, new: f64) {
        (**self).on_window(at, flow, old, new)
    }

    fn on_rtt(&mut self, at: SimTime, flow: FlowId, rtt: Duration, srtt: Duration) {
        (**self).on_rtt(at, flow, rtt, srtt)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn on_probability(&mut self, at: SimTime, sample: &ProbabilitySample) {
        (**self).on_probability(at, sample)
    }

    fn on_sojourn(&mut self, at: SimTime, lane: Lane, sojourn: Duration) {
        (**self).on_sojourn(at, lane, sojourn)
    }

    fn on_decision(&mut self, at: SimTime, lane: Lane, action: Action) {
        (**self).on_decision(at, lane, action)
    }

    fn on_drop(&mut self, at: SimTime, lane: Lane, reason: DropReason) {
        (**self).on_drop(at, lane, reason)
    }

    fn on_window(&mut self, at: SimTime, flow: FlowId, old: f64, new: f64) {
        (**self).on_window(at, flow, old, new)
    }

    fn on_rtt(&mut self, at: SimTime, flow: FlowId, rtt: Duration, srtt: Duration) {
        (**self).on_rtt(at, flow, rtt, srtt)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize), serde(tag = "event", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Probability {
        at: SimTime,
        sample: ProbabilitySample,
    },
    Sojourn {
        at: SimTime,
        lane: Lane,
        sojourn: Duration,
    },
    Decision {
        at: SimTime,
        lane: Lane,
        action: Action,
    },
    Drop {
        at: SimTime,
        lane: Lane,
        reason: DropReason,
    },
    Window {
        at: SimTime,
        flow: FlowId,
        old: f64,
        new: f64,
    },
    Rtt {
        at: SimTime,
        flow: FlowId,
        rtt: Duration,
        srtt: Duration,
    },
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    events: Vec<TraceEvent>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn sojourns(&self, lane: Lane) -> impl Iterator<Item = (SimTime, Duration)> + '_ {
        self.events.iter().filter_map(move |event| match event {
            TraceEvent::Sojourn {
                at,
                lane: l,
                sojourn,
            } if *l == lane => Some((*at, *sojourn)),
            _ => None,
        })
    }

    pub fn probabilities(&self) -> impl Iterator<Item = (SimTime, ProbabilitySample)> + '_ {
        self.events.iter().filter_map(|event| match event {
            TraceEvent::Probability { at, sample } => Some((*at, *sample)),
            _ => None,
        })
    }

    pub fn decisions(&self, lane: Lane, action: Action) -> usize {
        self.events
            .iter()
            .filter(|event| {
                matches!(event, TraceEvent::Decision { lane: l, action: a, .. } if *l == lane && *a == action)
            })
            .count()
    }

    pub fn windows(&self, flow: FlowId) -> impl Iterator<Item = (SimTime, f64)> + '_ {
        self.events.iter().filter_map(move |event| match event {
            TraceEvent::Window { at, flow: f, new, .. } if *f == flow => Some((*at, *new)),
            _ => None,
        })
    }

    /// RTT samples of a flow.
    pub fn rtts(&self, flow: FlowId) -> impl Iterator<Item = (SimTime, Duration)> + '_ {
        self.events.iter().filter_map(move |event| match event {
            TraceEvent::Rtt { at, flow: f, rtt, .. } if *f == flow => Some((*at, *rtt)),
            _ => None,
        })
    }
}

impl TelemetrySink for TraceRecorder {
    fn on_probability(&mut self, at: SimTime, sample: &ProbabilitySample) {
        self.events.push(TraceEvent::Probability {
            at,
            sample: *sample,
        });
    }

    fn on_sojourn(&mut self, at: SimTime, lane: Lane, sojourn: Duration) {
        self.events.push(TraceEvent::Sojourn { at, lane, sojourn });
    }

    fn on_decision(&mut self, at: SimTime, lane: Lane, action: Action) {
        self.events.push(TraceEvent::Decision { at, lane, action });
    }

    fn on_drop(&mut self, at: SimTime, lane: Lane, reason: DropReason) {
        self.events.push(TraceEvent::Drop { at, lane, reason });
    }

    fn on_window(&mut self, at: SimTime, flow: FlowId, old: f64, new: f64) {
        self.events.push(TraceEvent::Window { at, flow, old, new });
    }

    fn on_rtt(&mut self, at: SimTime, flow: FlowId, rtt: Duration, srtt: Duration) {
        self.events.push(TraceEvent::Rtt { at, flow, rtt, srtt });
    }
}

/// One writer per trace, lines are `<seconds> <value>`. The per-flow traces
/// (`cwnd.txt`, `rtt.txt`) use `<seconds>,<flow>,<value>`.
#[derive(Debug)]
pub struct TextTraceWriter<W: Write> {
    prob: W,
    prob_c: W,
    prob_cl: W,
    prob_l: W,
    sojourn_classic: W,
    sojourn_l4s: W,
    marks: W,
    windows: W,
    rtts: W,
    // first write error, reported by `finish`
    error: Option<io::Error>,
}

impl TextTraceWriter<BufWriter<File>> {
    /// Creates the trace files under `dir`, truncating existing ones.
    pub fn create<D: AsRef<Path>>(dir: D) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(dir.join(name))?))
        };
        debug!("Writing queue traces to {}", dir.display());
        Ok(Self::new(
            open("queue-prob.txt")?,
            open("queue-prob-c.txt")?,
            open("queue-prob-cl.txt")?,
            open("queue-prob-l.txt")?,
            open("queue-sojourn-classic.txt")?,
            open("queue-sojourn-l4s.txt")?,
            open("queue-marks.txt")?,
            open("cwnd.txt")?,
            open("rtt.txt")?,
        ))
    }
}

impl<W: Write> TextTraceWriter<W> {
    // One writer per trace file
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prob: W,
        prob_c: W,
        prob_cl: W,
        prob_l: W,
        sojourn_classic: W,
        sojourn_l4s: W,
        marks: W,
        windows: W,
        rtts: W,
    ) -> Self {
        Self {
            prob,
            prob_c,
            prob_cl,
            prob_l,
            sojourn_classic,
            sojourn_l4s,
            marks,
            windows,
            rtts,
            error: None,
        }
    }

    fn record(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            if self.error.is_none() {
                warn!("Failed to write trace: {}", e);
                self.error = Some(e);
            }
        }
    }

    /// Flushes every trace and returns the first error met while writing.
    pub fn finish(mut self) -> Result<[W; 9]> {
        if let Some(e) = self.error.take() {
            return Err(e.into());
        }
        for writer in [
            &mut self.prob,
            &mut self.prob_c,
            &mut self.prob_cl,
            &mut self.prob_l,
            &mut self.sojourn_classic,
            &mut self.sojourn_l4s,
            &mut self.marks,
            &mut self.windows,
            &mut self.rtts,
        ] {
            writer.flush()?;
        }
        Ok([
            self.prob,
            self.prob_c,
            self.prob_cl,
            self.prob_l,
            self.sojourn_classic,
            self.sojourn_l4s,
            self.marks,
            self.windows,
            self.rtts,
        ])
    }
}

impl<W: Write> TelemetrySink for TextTraceWriter<W> {
    fn on_probability(&mut self, at: SimTime, sample: &ProbabilitySample) {
        let t = at.as_secs_f64();
        let result = writeln!(self.prob, "{} {}", t, sample.base)
            .and_then(|_| writeln!(self.prob_c, "{} {}", t, sample.classic))
            .and_then(|_| writeln!(self.prob_cl, "{} {}", t, sample.coupled_l4s))
            .and_then(|_| writeln!(self.prob_l, "{} {}", t, sample.l4s));
        self.record(result);
    }

    fn on_sojourn(&mut self, at: SimTime, lane: Lane, sojourn: Duration) {
        let out = match lane {
            Lane::Classic => &mut self.sojourn_classic,
            Lane::L4s => &mut self.sojourn_l4s,
        };
        let result = writeln!(out, "{} {}", at.as_secs_f64(), sojourn.as_secs_f64());
        self.record(result);
    }

    fn on_decision(&mut self, at: SimTime, lane: Lane, action: Action) {
        let reason = match action {
            Action::Pass => return,
            Action::Mark => "mark",
            Action::Drop => "drop",
        };
        let result = writeln!(self.marks, "{} {} {}", at.as_secs_f64(), lane, reason);
        self.record(result);
    }

    fn on_drop(&mut self, at: SimTime, lane: Lane, reason: DropReason) {
        // AQM drops are already traced as decisions
        if reason == DropReason::AqmRejected {
            return;
        }
        let result = writeln!(self.marks, "{} {} {}", at.as_secs_f64(), lane, reason);
        self.record(result);
    }

    fn on_window(&mut self, at: SimTime, flow: FlowId, _old: f64, new: f64) {
        let result = writeln!(self.windows, "{},{},{}", at.as_secs_f64(), flow, new);
        self.record(result);
    }

    fn on_rtt(&mut self, at: SimTime, flow: FlowId, rtt: Duration, _srtt: Duration) {
        let result = writeln!(self.rtts, "{},{},{}", at.as_secs_f64(), flow, rtt.as_secs_f64());
        self.record(result);
    }
}
