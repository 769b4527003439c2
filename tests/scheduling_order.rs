#![allow(missing_docs)]

//! Ordering guarantees of the seven-phase cycle: lane priority, timer
//! interleaving, the check phase and the close phase.

mod common;

use common::{Trace, virtual_loop};
use phaseloop::{Error, Lane, LoopConfig};
use std::time::Duration;

#[test]
fn tick_microtask_then_zero_delay_timer() {
    common::init_test_logging();
    phaseloop::test_phase!("tick_microtask_then_zero_delay_timer");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();

    event_loop.schedule_tick(trace.recorder("B"));
    event_loop.schedule_microtask(trace.recorder("C"));
    event_loop.add_timer(Duration::ZERO, trace.recorder("A"));
    event_loop.run().unwrap();

    let observed = trace.take();
    phaseloop::assert_with_log!(
        observed == ["B", "C", "A"],
        "urgent lanes run before the timer phase",
        ["B", "C", "A"],
        observed
    );
    phaseloop::test_complete!("tick_microtask_then_zero_delay_timer");
}

#[test]
fn timers_fire_in_deadline_order() {
    common::init_test_logging();
    phaseloop::test_phase!("timers_fire_in_deadline_order");
    let (event_loop, clock) = virtual_loop();
    let trace = Trace::new();

    event_loop.add_timer(Duration::from_millis(20), trace.recorder("B"));
    event_loop.add_timer(Duration::from_millis(10), trace.recorder("A"));
    event_loop.run().unwrap();

    assert_eq!(trace.take(), ["A", "B"]);
    assert!(clock.total_slept() >= Duration::from_millis(19));
    assert!(!event_loop.has_timers());
    phaseloop::test_complete!("timers_fire_in_deadline_order");
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
    common::init_test_logging();
    phaseloop::test_phase!("equal_deadlines_fire_in_insertion_order");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();

    for label in ["first", "second", "third"] {
        event_loop.add_timer(Duration::from_millis(5), trace.recorder(label));
    }
    event_loop.run().unwrap();

    assert_eq!(trace.take(), ["first", "second", "third"]);
    phaseloop::test_complete!("equal_deadlines_fire_in_insertion_order");
}

#[test]
fn urgent_work_from_a_timer_runs_before_the_next_timer() {
    common::init_test_logging();
    phaseloop::test_phase!("urgent_work_from_a_timer_runs_before_the_next_timer");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    let t = trace.clone();
    event_loop.add_timer(Duration::ZERO, move || {
        t.push("timer-1");
        handle.schedule_microtask(t.recorder("micro-from-1"));
        handle.schedule_tick(t.recorder("tick-from-1"));
        handle.schedule_immediate(t.recorder("immediate-from-1"));
        Ok(())
    });
    event_loop.add_timer(Duration::ZERO, trace.recorder("timer-2"));
    assert!(event_loop.run_once().unwrap());

    let expected = [
        "timer-1",
        "tick-from-1",
        "micro-from-1",
        "timer-2",
        "immediate-from-1",
    ];
    let observed = trace.take();
    phaseloop::assert_with_log!(
        observed == expected,
        "ticks and microtasks drain between timers",
        expected,
        observed
    );
    phaseloop::test_complete!("urgent_work_from_a_timer_runs_before_the_next_timer");
}

#[test]
fn one_cycle_visits_every_phase_in_order() {
    common::init_test_logging();
    phaseloop::test_phase!("one_cycle_visits_every_phase_in_order");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();

    event_loop.schedule_deferred(trace.recorder("deferred"));
    event_loop.schedule_immediate(trace.recorder("immediate"));
    let t = trace.clone();
    event_loop.add_task(async move {
        t.push("task");
        Ok(())
    });
    event_loop.add_timer(Duration::ZERO, trace.recorder("timer"));
    event_loop.schedule_microtask(trace.recorder("microtask"));
    event_loop.schedule_tick(trace.recorder("tick"));

    assert!(event_loop.run_once().unwrap());
    let expected = ["tick", "microtask", "timer", "task", "immediate", "deferred"];
    let observed = trace.take();
    phaseloop::assert_with_log!(
        observed == expected,
        "phase order within one cycle",
        expected,
        observed
    );
    assert!(!event_loop.has_work());
    phaseloop::test_complete!("one_cycle_visits_every_phase_in_order");
}

#[test]
fn self_requeueing_tick_does_not_starve_microtasks() {
    common::init_test_logging();
    phaseloop::test_phase!("self_requeueing_tick_does_not_starve_microtasks");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    fn requeue(handle: phaseloop::LoopHandle, trace: Trace, left: u32) {
        let next = handle.clone();
        handle.schedule_tick(move || {
            trace.push(format!("tick{left}"));
            if left > 0 {
                requeue(next, trace, left - 1);
            }
            Ok(())
        });
    }

    requeue(handle.clone(), trace.clone(), 2);
    handle.schedule_tick(trace.recorder("other-tick"));
    handle.schedule_microtask(trace.recorder("micro"));
    event_loop.run_once().unwrap();

    // Each tick batch is a snapshot: the re-queued tick waits for the next
    // batch, behind ticks that were already queued.
    assert_eq!(
        trace.take(),
        ["tick2", "other-tick", "tick1", "tick0", "micro"]
    );
    phaseloop::test_complete!("self_requeueing_tick_does_not_starve_microtasks");
}

#[test]
fn microtasks_added_while_draining_run_in_the_same_drain() {
    common::init_test_logging();
    phaseloop::test_phase!("microtasks_added_while_draining_run_in_the_same_drain");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    let t = trace.clone();
    event_loop.schedule_microtask(move || {
        t.push("outer");
        handle.schedule_microtask(t.recorder("inner"));
        Ok(())
    });
    event_loop.add_timer(Duration::ZERO, trace.recorder("timer"));
    event_loop.run_once().unwrap();

    assert_eq!(trace.take(), ["outer", "inner", "timer"]);
    phaseloop::test_complete!("microtasks_added_while_draining_run_in_the_same_drain");
}

#[test]
fn microtask_cap_leaves_the_remainder_for_the_next_drain() {
    common::init_test_logging();
    phaseloop::test_phase!("microtask_cap_leaves_the_remainder_for_the_next_drain");
    let config = LoopConfig {
        microtask_cap: 4,
        ..LoopConfig::default()
    };
    let (event_loop, _clock) = common::virtual_loop_with(config);
    let trace = Trace::new();
    for i in 0..6 {
        event_loop.schedule_microtask(trace.recorder(&format!("m{i}")));
    }

    event_loop.run_once().unwrap();
    // The urgent phase stops at the cap; the drain after the task phase
    // picks up the rest in the same cycle.
    assert_eq!(trace.len(), 6);
    assert_eq!(event_loop.queued(Lane::Microtask), 0);
    phaseloop::test_complete!("microtask_cap_leaves_the_remainder_for_the_next_drain");
}

#[test]
fn immediates_added_in_the_check_phase_run_in_that_phase() {
    common::init_test_logging();
    phaseloop::test_phase!("immediates_added_in_the_check_phase_run_in_that_phase");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    let t = trace.clone();
    event_loop.schedule_immediate(move || {
        t.push("immediate-1");
        handle.schedule_immediate(t.recorder("immediate-2"));
        handle.schedule_tick(t.recorder("tick"));
        Ok(())
    });
    event_loop.schedule_deferred(trace.recorder("deferred"));
    assert!(event_loop.run_once().unwrap());

    assert_eq!(
        trace.take(),
        ["immediate-1", "tick", "immediate-2", "deferred"]
    );
    phaseloop::test_complete!("immediates_added_in_the_check_phase_run_in_that_phase");
}

#[test]
fn deferred_lane_waits_for_a_quiet_cycle() {
    common::init_test_logging();
    phaseloop::test_phase!("deferred_lane_waits_for_a_quiet_cycle");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    event_loop.schedule_deferred(trace.recorder("deferred"));
    let t = trace.clone();
    event_loop.add_task(async move {
        t.push("task-start");
        phaseloop::yield_now().await;
        t.push("task-end");
        Ok(())
    });

    // The yielded task is ready again, so the close phase holds back.
    assert!(event_loop.run_once().unwrap());
    assert_eq!(trace.snapshot(), ["task-start"]);
    assert_eq!(handle.queued(Lane::Deferred), 1);

    assert!(event_loop.run_once().unwrap());
    assert_eq!(trace.take(), ["task-start", "task-end", "deferred"]);
    phaseloop::test_complete!("deferred_lane_waits_for_a_quiet_cycle");
}

#[test]
fn deferred_added_while_draining_deferred_waits_a_cycle() {
    common::init_test_logging();
    phaseloop::test_phase!("deferred_added_while_draining_deferred_waits_a_cycle");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    let t = trace.clone();
    event_loop.schedule_deferred(move || {
        t.push("first");
        handle.schedule_deferred(t.recorder("second"));
        Ok(())
    });

    event_loop.run_once().unwrap();
    assert_eq!(trace.snapshot(), ["first"]);
    event_loop.run_once().unwrap();
    assert_eq!(trace.take(), ["first", "second"]);
    phaseloop::test_complete!("deferred_added_while_draining_deferred_waits_a_cycle");
}

#[test]
fn timer_added_by_a_timer_waits_for_the_next_cycle() {
    common::init_test_logging();
    phaseloop::test_phase!("timer_added_by_a_timer_waits_for_the_next_cycle");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    let t = trace.clone();
    event_loop.add_timer(Duration::ZERO, move || {
        t.push("outer");
        handle.add_timer(Duration::ZERO, t.recorder("inner"));
        Ok(())
    });

    assert!(event_loop.run_once().unwrap());
    assert_eq!(trace.snapshot(), ["outer"]);
    assert!(event_loop.has_timers());
    assert!(event_loop.run_once().unwrap());
    assert_eq!(trace.take(), ["outer", "inner"]);
    phaseloop::test_complete!("timer_added_by_a_timer_waits_for_the_next_cycle");
}

#[test]
fn generic_schedule_matches_lane_helpers() {
    common::init_test_logging();
    phaseloop::test_phase!("generic_schedule_matches_lane_helpers");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    for lane in [Lane::Deferred, Lane::Immediate, Lane::Microtask, Lane::Tick] {
        event_loop.schedule(lane, trace.recorder(&format!("{lane}")));
    }
    event_loop.run().unwrap();
    assert_eq!(trace.take(), ["tick", "microtask", "immediate", "deferred"]);
    phaseloop::test_complete!("generic_schedule_matches_lane_helpers");
}

#[test]
fn deferred_waits_behind_a_pending_timer() {
    common::init_test_logging();
    phaseloop::test_phase!("deferred_waits_behind_a_pending_timer");
    let (event_loop, clock) = virtual_loop();
    let trace = Trace::new();

    event_loop.schedule_deferred(trace.recorder("deferred"));
    event_loop.add_timer(Duration::from_secs(1), trace.recorder("timer"));

    // The timer is not due, but it is outstanding, so the close phase holds.
    event_loop.run_once().unwrap();
    assert!(trace.snapshot().is_empty());
    assert_eq!(event_loop.queued(Lane::Deferred), 1);

    event_loop.run().unwrap();
    let observed = trace.take();
    phaseloop::assert_with_log!(
        observed == ["timer", "deferred"],
        "deferred runs once the timer is gone",
        ["timer", "deferred"],
        observed
    );
    assert!(clock.total_slept() >= Duration::from_secs(1));
    phaseloop::test_complete!("deferred_waits_behind_a_pending_timer");
}

#[test]
fn failing_immediate_stops_run_and_keeps_the_rest_queued() {
    common::init_test_logging();
    phaseloop::test_phase!("failing_immediate_stops_run_and_keeps_the_rest_queued");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();
    let handle = event_loop.handle();

    event_loop.schedule_immediate(trace.recorder("first"));
    event_loop.schedule_immediate(|| Err("immediate broke".into()));
    event_loop.schedule_immediate(trace.recorder("third"));
    event_loop.schedule_immediate(trace.recorder("fourth"));

    let err = event_loop.run().unwrap_err();
    phaseloop::assert_with_log!(
        matches!(&err, Error::Callback { lane: Lane::Immediate, .. }),
        "lane callback error leaves run()",
        "Callback { lane: Immediate }",
        err
    );
    assert_eq!(err.to_string(), "immediate callback failed: immediate broke");
    assert_eq!(trace.snapshot(), ["first"]);
    assert_eq!(handle.queued(Lane::Immediate), 2);

    event_loop.run().unwrap();
    assert_eq!(trace.take(), ["first", "third", "fourth"]);
    phaseloop::test_complete!("failing_immediate_stops_run_and_keeps_the_rest_queued");
}

#[test]
fn failing_microtask_surfaces_from_run() {
    common::init_test_logging();
    phaseloop::test_phase!("failing_microtask_surfaces_from_run");
    let (event_loop, _clock) = virtual_loop();
    let trace = Trace::new();

    event_loop.schedule_microtask(|| Err("microtask broke".into()));
    event_loop.schedule_microtask(trace.recorder("after"));
    event_loop.schedule_immediate(trace.recorder("immediate"));

    let err = event_loop.run().unwrap_err();
    assert!(matches!(&err, Error::Callback { lane: Lane::Microtask, .. }));
    assert!(trace.snapshot().is_empty(), "the failing cycle stops at the error");
    assert_eq!(event_loop.queued(Lane::Microtask), 1);
    assert!(event_loop.is_running());

    event_loop.run().unwrap();
    assert_eq!(trace.take(), ["after", "immediate"]);
    phaseloop::test_complete!("failing_microtask_surfaces_from_run");
}
