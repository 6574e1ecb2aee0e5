//! Property-based tests for conditions, hook diffing and timer selection.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use convergent::core::{Condition, State};
use convergent::hooks::{DispatchMode, HookDispatcher};
use convergent::timer::ConditionTimerSet;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
enum Phase {
    Idle,
    Warming,
    Running,
    Draining,
}

impl State for Phase {
    fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Warming => "Warming",
            Self::Running => "Running",
            Self::Draining => "Draining",
        }
    }
}

const PHASES: [Phase; 4] = [Phase::Idle, Phase::Warming, Phase::Running, Phase::Draining];

prop_compose! {
    fn arbitrary_phase()(variant in 0..4usize) -> Phase {
        PHASES[variant]
    }
}

type Counts = Arc<Mutex<HashMap<(Phase, &'static str), usize>>>;

fn count_into(counts: &Counts, phase: Phase, kind: &'static str) -> impl Fn() + Send + Sync {
    let counts = Arc::clone(counts);
    move || *counts.lock().unwrap().entry((phase, kind)).or_default() += 1
}

proptest! {
    #[test]
    fn exact_conditions_are_equal_iff_values_are(a in arbitrary_phase(), b in arbitrary_phase()) {
        prop_assert_eq!(Condition::exact(a) == Condition::exact(b), a == b);
    }

    #[test]
    fn exact_condition_matches_only_its_value(a in arbitrary_phase(), b in arbitrary_phase()) {
        prop_assert_eq!(Condition::exact(a).matches(&b), a == b);
    }

    #[test]
    fn hooks_fire_once_per_edge(
        sequence in prop::collection::vec(arbitrary_phase(), 0..40)
    ) {
        let counts: Counts = Arc::new(Mutex::new(HashMap::new()));
        let hooks = HookDispatcher::new("phases", Phase::Idle, DispatchMode::Inline);
        for phase in PHASES {
            hooks.set_enter_hook(Condition::exact(phase), count_into(&counts, phase, "enter"));
            hooks.set_exit_hook(Condition::exact(phase), count_into(&counts, phase, "exit"));
        }

        let mut expected: HashMap<(Phase, &'static str), usize> = HashMap::new();
        let mut current = Phase::Idle;
        for next in &sequence {
            hooks.set_state(*next);
            if *next != current {
                *expected.entry((current, "exit")).or_default() += 1;
                *expected.entry((*next, "enter")).or_default() += 1;
                current = *next;
            }
        }

        prop_assert_eq!(&*counts.lock().unwrap(), &expected);
        prop_assert_eq!(hooks.active_enter(), vec![Condition::exact(current)]);
    }

    #[test]
    fn predicate_hooks_follow_membership_changes(
        sequence in prop::collection::vec(arbitrary_phase(), 0..40)
    ) {
        let busy = |p: &Phase| matches!(p, Phase::Warming | Phase::Running);
        let counts: Counts = Arc::new(Mutex::new(HashMap::new()));
        let hooks = HookDispatcher::new("phases", Phase::Idle, DispatchMode::Inline);
        let condition = Condition::predicate(busy);
        hooks.set_enter_hook(condition.clone(), count_into(&counts, Phase::Running, "enter"));
        hooks.set_exit_hook(condition, count_into(&counts, Phase::Running, "exit"));

        let (mut enters, mut exits) = (0usize, 0usize);
        let mut was_busy = false;
        for next in &sequence {
            hooks.set_state(*next);
            let is_busy = busy(next);
            match (was_busy, is_busy) {
                (false, true) => enters += 1,
                (true, false) => exits += 1,
                _ => {}
            }
            was_busy = is_busy;
        }

        let counts = counts.lock().unwrap();
        prop_assert_eq!(counts.get(&(Phase::Running, "enter")).copied().unwrap_or(0), enters);
        prop_assert_eq!(counts.get(&(Phase::Running, "exit")).copied().unwrap_or(0), exits);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn exactly_the_shortest_matching_timer_is_armed(
        durations in prop::collection::vec(10u64..20, 1..6)
    ) {
        // Register away from the matching state so nothing is armed early.
        let timers = ConditionTimerSet::new("phases", Phase::Draining);
        let gated: Vec<Condition<Phase>> = durations
            .iter()
            .map(|_| Condition::predicate(|p: &Phase| *p != Phase::Draining))
            .collect();
        for (condition, secs) in gated.iter().zip(&durations) {
            timers.set_timer(condition.clone(), Duration::from_secs(*secs), || {}).unwrap();
        }
        prop_assert!(timers.armed().is_none());

        timers.set_state(Phase::Running);

        let shortest = *durations.iter().min().unwrap();
        let first = durations.iter().position(|d| *d == shortest).unwrap();
        prop_assert_eq!(timers.armed(), Some(gated[first].clone()));
        prop_assert_eq!(timers.running_count(), 1);

        timers.stop();
    }
}
