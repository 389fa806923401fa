use std::time::Duration;

use dualq_core::{
    packet::Lane,
    queue::DualQConfig,
    sender::{FlowId, ReactionPolicy, SenderConfig},
    telemetry::{TextTraceWriter, TraceRecorder},
    Result, SimTime,
};
use tracing::{info, span, Level};

use crate::common::{mean, Bottleneck};

const CLASSIC: FlowId = FlowId(1);
const SCALABLE: FlowId = FlowId(2);
const RATE_BPS: u64 = 10_000_000;

fn bottleneck<T: dualq_core::telemetry::TelemetrySink>(telemetry: T) -> Result<Bottleneck<T>> {
    let mut bottleneck = Bottleneck::new(
        DualQConfig::default(),
        telemetry,
        RATE_BPS,
        Duration::from_millis(20),
    )?;
    bottleneck.add_flow(CLASSIC, SenderConfig::new(ReactionPolicy::ClassicLike))?;
    bottleneck.add_flow(SCALABLE, SenderConfig::new(ReactionPolicy::ScalableLike))?;
    Ok(bottleneck)
}

#[test_log::test]
fn classic_and_scalable_share_bottleneck() -> Result<()> {
    let _span = span!(Level::INFO, "classic_and_scalable_share_bottleneck").entered();
    let mut bottleneck = bottleneck(TraceRecorder::new())?;
    let duration = Duration::from_secs(5);
    bottleneck.run(SimTime::from_duration(duration))?;

    let classic = bottleneck.delivered[&CLASSIC] as f64;
    let scalable = bottleneck.delivered[&SCALABLE] as f64;
    let utilization = (classic + scalable) / bottleneck.capacity(duration);
    info!(classic, scalable, utilization, "Delivered packets");
    assert!(utilization > 0.7);
    assert!(classic > 0.05 * (classic + scalable));
    assert!(scalable > 0.05 * (classic + scalable));

    // Non-ECN Classic traffic only ever sees drops, ECN L4S traffic only marks
    let stats = *bottleneck.queue.stats();
    assert!(stats.classic.drops() > 0);
    assert_eq!(stats.classic.marks(), 0);
    assert!(stats.l4s.marks() > 0);
    assert_eq!(stats.l4s.drops(), 0);

    let recorder = bottleneck.queue.telemetry();
    let classic_delay = mean(recorder.sojourns(Lane::Classic).map(|(_, sojourn)| sojourn));
    let l4s_delay = mean(recorder.sojourns(Lane::L4s).map(|(_, sojourn)| sojourn));
    info!(?classic_delay, ?l4s_delay, "Mean sojourn");
    assert!(l4s_delay < classic_delay);

    for (_, sample) in recorder.probabilities() {
        assert!((0.0..=1.0).contains(&sample.base));
        assert!((sample.classic - sample.base * sample.base).abs() < 1e-12);
    }
    assert_eq!(recorder.probabilities().count(), 312);

    // Both senders backed off at least once and never went below the floor
    for flow in [CLASSIC, SCALABLE] {
        let windows: Vec<f64> = bottleneck
            .senders
            .telemetry()
            .windows(flow)
            .map(|(_, window)| window)
            .collect();
        assert!(!windows.is_empty());
        assert!(windows.iter().all(|window| *window >= 2.0));
        let sender = bottleneck.senders.get(flow).unwrap();
        assert!(sender.last_reduction().is_some());

        // every RTT sample carries at least the base RTT
        let rtts: Vec<Duration> = bottleneck
            .senders
            .telemetry()
            .rtts(flow)
            .map(|(_, rtt)| rtt)
            .collect();
        assert!(!rtts.is_empty());
        assert!(rtts.iter().all(|rtt| *rtt >= Duration::from_millis(20)));
    }
    Ok(())
}

#[test_log::test]
fn traces_are_written_per_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let writer = TextTraceWriter::create(dir.path())?;
    let mut bottleneck = bottleneck(writer)?;
    bottleneck.run(SimTime::from_millis(1000))?;
    bottleneck.queue.into_telemetry().finish()?;

    let prob = std::fs::read_to_string(dir.path().join("queue-prob.txt"))?;
    assert_eq!(prob.lines().count(), 62);
    let first: Vec<&str> = prob.lines().next().unwrap().split(' ').collect();
    assert_eq!(first[0], "0.016");

    for name in ["queue-sojourn-classic.txt", "queue-sojourn-l4s.txt"] {
        let content = std::fs::read_to_string(dir.path().join(name))?;
        assert!(content.lines().count() > 10, "{} too short", name);
        for line in content.lines() {
            let mut fields = line.split(' ');
            let at: f64 = fields.next().unwrap().parse().unwrap();
            let sojourn: f64 = fields.next().unwrap().parse().unwrap();
            assert!((0.0..=1.0).contains(&at));
            assert!(sojourn >= 0.0);
        }
    }
    Ok(())
}
