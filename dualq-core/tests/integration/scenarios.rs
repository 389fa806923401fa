use std::time::Duration;

use dualq_core::{
    aqm::{Action, CoupledAqm, CoupledAqmConfig},
    packet::{EcnCodepoint, Lane, Packet, StdPacket},
    queue::{AdmissionResult, DropReason, DualQConfig, DualQueue, LaneQueueConfig},
    scheduler::SchedulerState,
    sender::{FlowId, Reaction, ReactionPolicy, Sender, SenderConfig},
    Error, Result, SimTime,
};
use tracing::{info, span, Level};

const PROB_ACCURACY_TOLERANCE: f64 = 0.02;

#[test_log::test]
fn full_lane_tail_drops() -> Result<()> {
    let mut queue = DualQueue::new(DualQConfig {
        classic: LaneQueueConfig::new(100, None),
        ..Default::default()
    })?;
    let results = (0..150)
        .map(|i| {
            queue.submit(
                StdPacket::new(1500, EcnCodepoint::NotEct).with_flow_id(i),
                Lane::Classic,
                SimTime::ZERO,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(results.iter().filter(|r| r.is_accepted()).count(), 100);
    assert_eq!(
        results
            .iter()
            .filter(|r| **r == AdmissionResult::Dropped(DropReason::CapacityExceeded))
            .count(),
        50
    );
    Ok(())
}

#[test_log::test]
fn coupled_probabilities_at_half() -> Result<()> {
    let mut aqm = CoupledAqm::new(CoupledAqmConfig::default())?;
    aqm.set_probability(0.5);
    let draws = 10_000;
    let l4s_marks = (0..draws)
        .filter(|_| aqm.admission_decision(Lane::L4s, true) == Action::Mark)
        .count();
    let classic_drops = (0..draws)
        .filter(|_| aqm.admission_decision(Lane::Classic, false) == Action::Drop)
        .count();
    let l4s = l4s_marks as f64 / draws as f64;
    let classic = classic_drops as f64 / draws as f64;
    info!(l4s, classic, "Decision rates");
    assert!((l4s - 1.0).abs() <= PROB_ACCURACY_TOLERANCE);
    assert!((classic - 0.25).abs() <= PROB_ACCURACY_TOLERANCE);
    Ok(())
}

#[test_log::test]
fn scalable_sender_mark() -> Result<()> {
    let mut sender = Sender::new(
        FlowId(1),
        SenderConfig {
            gain: 0.1,
            initial_window: 100.0,
            ..SenderConfig::new(ReactionPolicy::ScalableLike)
        },
    )?;
    assert_eq!(
        sender.on_mark(SimTime::from_millis(1)),
        Reaction::Reduced { from: 100.0, to: 90.0 }
    );
    Ok(())
}

#[test_log::test]
fn classic_sender_drop_then_cooldown() -> Result<()> {
    let mut sender = Sender::new(
        FlowId(1),
        SenderConfig {
            initial_window: 100.0,
            ..SenderConfig::new(ReactionPolicy::ClassicLike)
        },
    )?;
    let now = SimTime::from_millis(100);
    assert_eq!(sender.on_drop(now), Reaction::Reduced { from: 100.0, to: 50.0 });
    assert_eq!(
        sender.on_drop(now + Duration::from_millis(1)),
        Reaction::Suppressed
    );
    assert_eq!(sender.window(), 50.0);
    Ok(())
}

#[test_log::test]
fn classic_is_not_starved() -> Result<()> {
    let _span = span!(Level::INFO, "classic_is_not_starved").entered();
    let mut queue = DualQueue::new(DualQConfig::default())?;
    for i in 0..50 {
        queue.enqueue(
            StdPacket::new(1500, EcnCodepoint::NotEct).with_flow_id(i),
            SimTime::ZERO,
        )?;
    }
    let mut classic_services = Vec::new();
    for ms in 0..100 {
        let now = SimTime::from_millis(ms);
        // L4S stays backlogged throughout
        queue.enqueue(
            StdPacket::new(1500, EcnCodepoint::Ect1).with_flow_id(1000 + ms as u32),
            now,
        )?;
        let packet = queue.on_link_ready(now)?.unwrap();
        if packet.ecn() == EcnCodepoint::NotEct {
            classic_services.push(ms);
        }
    }
    info!(?classic_services, "Classic served");
    assert!(!classic_services.is_empty());
    assert!(classic_services[0] <= 11);
    for pair in classic_services.windows(2) {
        assert!(pair[1] - pair[0] <= 11);
    }
    Ok(())
}

#[test_log::test]
fn lone_lane_is_served() -> Result<()> {
    let mut queue = DualQueue::new(DualQConfig::default())?;
    queue.enqueue(StdPacket::new(1500, EcnCodepoint::NotEct), SimTime::ZERO)?;
    assert!(queue.on_link_ready(SimTime::ZERO)?.is_some());
    assert_eq!(queue.scheduler_state(), SchedulerState::ServingClassic);

    queue.enqueue(StdPacket::new(1500, EcnCodepoint::Ect1), SimTime::ZERO)?;
    assert!(queue.on_link_ready(SimTime::ZERO)?.is_some());
    assert_eq!(queue.scheduler_state(), SchedulerState::ServingL4s);

    assert!(queue.on_link_ready(SimTime::ZERO)?.is_none());
    assert_eq!(queue.scheduler_state(), SchedulerState::Empty);
    Ok(())
}

#[test_log::test]
fn fifo_within_lane() -> Result<()> {
    let mut queue = DualQueue::new(DualQConfig {
        l4s_step: None,
        ..Default::default()
    })?;
    for i in 0..20u32 {
        let ecn = if i % 3 == 0 {
            EcnCodepoint::NotEct
        } else {
            EcnCodepoint::Ect1
        };
        queue.enqueue(StdPacket::new(1500, ecn).with_flow_id(i), SimTime::from_micros(i as u64 * 100))?;
    }
    let mut order = [Vec::new(), Vec::new()];
    let mut now = SimTime::from_millis(2);
    while let Some(packet) = queue.on_link_ready(now)? {
        let lane = if packet.get_flow_id() % 3 == 0 {
            Lane::Classic
        } else {
            Lane::L4s
        };
        order[lane.index()].push(packet.get_flow_id());
        now += Duration::from_millis(1);
    }
    for lane in order {
        assert!(lane.windows(2).all(|pair| pair[0] < pair[1]));
    }
    Ok(())
}

#[test_log::test]
fn timestamps_must_not_go_back() -> Result<()> {
    let mut queue = DualQueue::<StdPacket>::new(DualQConfig::default())?;
    queue.on_link_ready(SimTime::from_millis(10))?;
    assert!(matches!(
        queue.advance(SimTime::from_millis(9)),
        Err(Error::InconsistentTimestamp { .. })
    ));
    Ok(())
}
