//! Tests for the rule state machine.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn windowed(limit: u32, window_secs: u64) -> RuleState {
    RuleState::new(
        "high-cpu",
        RuleStateConfig::new(limit).with_sliding_window(Duration::from_secs(window_secs)),
    )
}

fn unwindowed(limit: u32) -> RuleState {
    RuleState::new("high-cpu", RuleStateConfig::new(limit))
}

/// A transition a caller can attempt.
#[derive(Debug, Clone, Copy)]
enum Op {
    Begin,
    Succeeded,
    Failed,
    Completed(bool),
    Record(i64),
    Check(i64),
    Startup,
    Duration,
    Count,
    Failure(&'static str),
}

const ALL_OPS: &[Op] = &[
    Op::Begin,
    Op::Succeeded,
    Op::Failed,
    Op::Completed(true),
    Op::Completed(false),
    Op::Record(0),
    Op::Check(0),
    Op::Check(1_000_000),
    Op::Startup,
    Op::Duration,
    Op::Count,
    Op::Failure("late failure"),
];

fn apply(state: &RuleState, op: Op) {
    match op {
        Op::Begin => {
            state.begin_action_execution();
        }
        Op::Succeeded => state.action_execution_succeeded(),
        Op::Failed => state.action_execution_failed(),
        Op::Completed(ok) => {
            state.action_execution_completed(ok);
        }
        Op::Record(t) => state.record_execution(at(t)),
        Op::Check(t) => {
            state.check_and_update_throttle(at(t));
        }
        Op::Startup => state.startup_trigger_completed(),
        Op::Duration => state.rule_duration_reached(),
        Op::Count => state.action_count_reached(),
        Op::Failure(msg) => state.rule_failure(msg),
    }
}

// -- initial state -----------------------------------------------------

#[test]
fn new_state_is_running_with_running_reason() {
    let state = unwindowed(5);
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.state_reason(), RUNNING_REASON);
    assert!(!state.is_finished());
}

// -- state / reason consistency ----------------------------------------

#[test]
fn every_transition_sets_the_matching_reason() {
    let failure_reason =
        "The collection rule will no longer trigger because a failure occurred with message: pipe closed";
    let cases: Vec<(&str, Vec<Op>, RuleStateKind, &str)> = vec![
        ("begin", vec![Op::Begin], RuleStateKind::ActionExecuting, ACTION_EXECUTING_REASON),
        ("succeeded", vec![Op::Begin, Op::Succeeded], RuleStateKind::Running, RUNNING_REASON),
        ("failed", vec![Op::Begin, Op::Failed], RuleStateKind::Running, RUNNING_REASON),
        ("throttled", vec![Op::Record(0), Op::Check(1)], RuleStateKind::Throttled, THROTTLED_REASON),
        (
            "throttle lifted",
            vec![Op::Record(0), Op::Check(1), Op::Check(60)],
            RuleStateKind::Running,
            RUNNING_REASON,
        ),
        ("startup", vec![Op::Startup], RuleStateKind::Finished, STARTUP_FINISHED_REASON),
        ("duration", vec![Op::Duration], RuleStateKind::Finished, RULE_DURATION_FINISHED_REASON),
        ("count", vec![Op::Count], RuleStateKind::Finished, ACTION_COUNT_FINISHED_REASON),
        ("failure", vec![Op::Failure("pipe closed")], RuleStateKind::Finished, failure_reason),
    ];

    for (name, steps, expected_state, expected_reason) in cases {
        let state = windowed(1, 2);
        for op in steps {
            apply(&state, op);
            // Reason and state always move together.
            let snap = state.snapshot();
            let paired = match snap.state {
                RuleStateKind::Running => snap.state_reason == RUNNING_REASON,
                RuleStateKind::ActionExecuting => snap.state_reason == ACTION_EXECUTING_REASON,
                RuleStateKind::Throttled => snap.state_reason == THROTTLED_REASON,
                RuleStateKind::Finished => snap.state_reason.starts_with("The collection rule will no longer trigger"),
            };
            assert!(paired, "case {} after {:?}: {:?}", name, op, snap);
        }
        let snap = state.snapshot();
        assert_eq!(snap.state, expected_state, "case {}", name);
        assert_eq!(snap.state_reason, expected_reason, "case {}", name);
    }
}

// -- terminal idempotency ------------------------------------------------

#[test]
fn finished_is_terminal_for_every_later_transition() {
    let finishers = [
        (Op::Startup, STARTUP_FINISHED_REASON),
        (Op::Duration, RULE_DURATION_FINISHED_REASON),
        (Op::Count, ACTION_COUNT_FINISHED_REASON),
    ];

    for (finish, reason) in finishers {
        let state = windowed(1, 2);
        state.record_execution(at(0));
        apply(&state, finish);
        for _ in 0..2 {
            for op in ALL_OPS {
                apply(&state, *op);
                assert_eq!(state.state(), RuleStateKind::Finished);
                assert_eq!(state.state_reason(), reason, "after {:?}", op);
            }
        }
    }
}

#[test]
fn rule_failure_reason_survives_later_transitions() {
    let state = unwindowed(3);
    state.rule_failure("first");
    for op in ALL_OPS {
        apply(&state, *op);
    }
    assert_eq!(state.state(), RuleStateKind::Finished);
    assert!(state.state_reason().ends_with("message: first"));
}

#[test]
fn action_count_reached_twice_keeps_first_reason() {
    let state = unwindowed(1);
    assert!(state.finish(FinishReason::ActionCountReached));
    assert!(!state.finish(FinishReason::RuleDurationReached));
    state.action_count_reached();
    assert_eq!(state.state_reason(), ACTION_COUNT_FINISHED_REASON);
}

#[test]
fn terminal_transition_can_interrupt_an_execution() {
    let state = unwindowed(3);
    state.begin_action_execution();
    state.rule_duration_reached();
    assert_eq!(state.state(), RuleStateKind::Finished);

    // The executor reporting back afterwards must not revive the rule.
    state.action_execution_succeeded();
    assert_eq!(state.state(), RuleStateKind::Finished);
    assert_eq!(state.state_reason(), RULE_DURATION_FINISHED_REASON);
}

// -- illegal transitions -------------------------------------------------

#[test]
#[cfg_attr(feature = "strict-transitions", should_panic)]
fn ending_an_execution_that_never_began_is_ignored() {
    let state = unwindowed(3);
    state.action_execution_succeeded();
    state.action_execution_failed();
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.snapshot().action_failure_count, 0);
}

#[test]
#[cfg_attr(feature = "strict-transitions", should_panic)]
fn begin_while_throttled_is_ignored() {
    let state = windowed(1, 10);
    state.record_execution(at(0));
    assert!(!state.check_and_update_throttle(at(1)));
    state.begin_action_execution();
    assert_eq!(state.state(), RuleStateKind::Throttled);
}

#[test]
#[cfg_attr(feature = "strict-transitions", should_panic)]
fn begin_twice_stays_executing() {
    let state = unwindowed(3);
    state.begin_action_execution();
    state.begin_action_execution();
    assert_eq!(state.state(), RuleStateKind::ActionExecuting);
    state.action_execution_succeeded();
    assert_eq!(state.state(), RuleStateKind::Running);
}

// -- success / failure ---------------------------------------------------

#[test]
fn completed_passes_success_through_and_counts_failures() {
    let state = unwindowed(5);

    state.begin_action_execution();
    assert!(state.action_execution_completed(true));
    assert_eq!(state.state(), RuleStateKind::Running);

    state.begin_action_execution();
    assert!(!state.action_execution_completed(false));
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.state_reason(), RUNNING_REASON);
    assert_eq!(state.snapshot().action_failure_count, 1);
}

// -- throttling ----------------------------------------------------------

#[test]
fn throttled_at_exactly_limit_inside_window() {
    let n = 3;
    let state = windowed(n, 10);
    for i in 0..n {
        state.record_execution(at(i as i64));
    }

    assert!(!state.check_and_update_throttle(at(5)));
    assert_eq!(state.state(), RuleStateKind::Throttled);

    // All entries older than now - 10s once we pass t=12s.
    assert!(state.check_and_update_throttle(at(13)));
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.snapshot().sliding_window_occurrences(), 0);
    assert_eq!(state.snapshot().lifetime_occurrences(), n as usize);
}

#[test]
fn below_limit_is_not_throttled() {
    let state = windowed(3, 10);
    state.record_execution(at(0));
    state.record_execution(at(1));
    assert!(state.check_and_update_throttle(at(2)));
    assert_eq!(state.state(), RuleStateKind::Running);
}

#[test]
fn zero_limit_with_window_is_permanently_throttled() {
    let state = windowed(0, 2);
    for t in [0, 10, 1_000, 100_000] {
        assert!(!state.check_and_update_throttle(at(t)));
    }
    assert_eq!(state.state(), RuleStateKind::Throttled);
}

#[test]
fn no_window_never_throttles() {
    let state = unwindowed(1);
    for t in 0..5 {
        state.record_execution(at(t));
        assert!(state.check_and_update_throttle(at(t)));
    }
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.snapshot().lifetime_occurrences(), 5);
}

#[test]
fn throttle_check_does_not_disturb_an_execution() {
    let state = windowed(1, 10);
    state.record_execution(at(0));
    state.begin_action_execution();
    assert!(!state.check_and_update_throttle(at(1)));
    assert_eq!(state.state(), RuleStateKind::ActionExecuting);
}

#[test]
fn end_to_end_window_scenario() {
    // Limit 1, no window: the lifetime cap is someone else's job.
    let open = unwindowed(1);
    open.record_execution(at(0));
    assert!(open.check_and_update_throttle(at(1)));
    assert!(open.check_and_update_throttle(at(3)));

    // Limit 1, 2s window.
    let state = windowed(1, 2);
    assert!(state.check_and_update_throttle(at(0)));
    state.begin_action_execution();
    state.record_execution(at(0));
    state.action_execution_succeeded();

    assert!(!state.check_and_update_throttle(at(1)));
    assert!(state.check_and_update_throttle(at(3)));
}

#[test]
fn snapshot_predicate_has_no_side_effects() {
    let state = windowed(1, 2);
    state.record_execution(at(0));
    let snap = state.snapshot();

    assert!(snap.is_throttled_at(at(1)));
    assert!(!snap.is_throttled_at(at(3)));
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.snapshot().sliding_window_occurrences(), 1);
}

// -- startup ---------------------------------------------------------------

#[test]
fn startup_rule_finishes_once() {
    let state = unwindowed(1);
    assert_eq!(state.state(), RuleStateKind::Running);
    assert_eq!(state.state_reason(), RUNNING_REASON);

    state.startup_trigger_completed();
    assert_eq!(state.state(), RuleStateKind::Finished);
    assert_eq!(state.state_reason(), STARTUP_FINISHED_REASON);

    state.startup_trigger_completed();
    assert_eq!(state.state(), RuleStateKind::Finished);
    assert_eq!(state.state_reason(), STARTUP_FINISHED_REASON);
}

// -- snapshots ---------------------------------------------------------------

#[test]
fn snapshot_matches_source_and_is_detached() {
    let config = RuleStateConfig::new(4)
        .with_sliding_window(Duration::from_secs(30))
        .with_rule_duration(Duration::from_secs(600));
    let state = RuleState::new("gc-pressure", config.clone());
    state.record_execution(at(0));
    state.record_execution(at(5));
    state.begin_action_execution();
    state.action_execution_failed();

    let snap = RuleStateSnapshot::from(&state);
    assert_eq!(snap.rule_name, "gc-pressure");
    assert_eq!(snap.config, config);
    assert_eq!(snap.state, RuleStateKind::Running);
    assert_eq!(snap.state_reason, RUNNING_REASON);
    assert_eq!(snap.execution_timestamps, vec![at(0), at(5)]);
    assert_eq!(snap.all_execution_timestamps, vec![at(0), at(5)]);
    assert_eq!(snap.action_failure_count, 1);

    let frozen = snap.clone();
    state.record_execution(at(6));
    state.check_and_update_throttle(at(100));
    state.rule_failure("gone");

    assert_eq!(snap, frozen);
    assert_eq!(snap.execution_timestamps.len(), 2);
    assert_eq!(snap.state, RuleStateKind::Running);
}

// -- concurrency ---------------------------------------------------------------

#[test]
fn concurrent_throttle_checks_evict_exactly_once() {
    let state = Arc::new(windowed(100, 10));
    for t in 0..50 {
        state.record_execution(at(t));
    }

    // Fixed clock at t=55s: cutoff 45s keeps 45..=49.
    let now = at(55);
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert!(state.check_and_update_throttle(now));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snap = state.snapshot();
    assert_eq!(snap.execution_timestamps, (45..50).map(at).collect::<Vec<_>>());
    assert_eq!(snap.lifetime_occurrences(), 50);
    assert_eq!(snap.state, RuleStateKind::Running);
}

#[test]
fn concurrent_records_and_checks_lose_nothing() {
    let state = Arc::new(windowed(1_000_000, 3_600));
    let now = at(0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..250 {
                    state.record_execution(now);
                    state.check_and_update_throttle(now);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snap = state.snapshot();
    assert_eq!(snap.sliding_window_occurrences(), 2_000);
    assert_eq!(snap.lifetime_occurrences(), 2_000);
}

#[test]
fn concurrent_throttle_flips_keep_state_and_reason_paired() {
    let state = Arc::new(windowed(2, 2));

    let handles: Vec<_> = (0..8i64)
        .map(|i| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for j in 0..200i64 {
                    state.record_execution(at(j));
                    state.check_and_update_throttle(at(j + i % 3));
                    let snap = state.snapshot();
                    let expected = match snap.state {
                        RuleStateKind::Throttled => THROTTLED_REASON,
                        _ => RUNNING_REASON,
                    };
                    assert_eq!(snap.state_reason, expected);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(state.snapshot().lifetime_occurrences(), 1_600);
}

// -- interrupted executions ------------------------------------------------

#[test]
fn begin_on_finished_rule_is_refused() {
    let state = unwindowed(3);
    assert!(state.begin_action_execution());
    assert!(state.action_execution_completed(true));

    state.rule_failure("target exited");
    assert!(!state.begin_action_execution());
    assert_eq!(state.state(), RuleStateKind::Finished);
}

#[test]
fn abandoned_execution_counts_as_failed_cycle() {
    let state = unwindowed(3);
    assert!(!state.abandon_action_execution(at(0)));

    assert!(state.begin_action_execution());
    assert!(state.abandon_action_execution(at(5)));

    let snap = state.snapshot();
    assert_eq!(snap.state, RuleStateKind::Running);
    assert_eq!(snap.state_reason, RUNNING_REASON);
    assert_eq!(snap.action_failure_count, 1);
    assert_eq!(snap.all_execution_timestamps, vec![at(5)]);
    assert_eq!(state.lifetime_occurrences(), 1);

    // Already reported: a second abandon is a no-op.
    assert!(!state.abandon_action_execution(at(6)));
    assert_eq!(state.lifetime_occurrences(), 1);
}

#[test]
fn abandon_after_terminal_transition_changes_nothing() {
    let state = unwindowed(3);
    assert!(state.begin_action_execution());
    state.rule_duration_reached();

    assert!(!state.abandon_action_execution(at(1)));
    let snap = state.snapshot();
    assert_eq!(snap.state_reason, RULE_DURATION_FINISHED_REASON);
    assert_eq!(snap.action_failure_count, 0);
    assert_eq!(snap.lifetime_occurrences(), 0);
}
