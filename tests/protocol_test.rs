use std::thread;
use std::time::{Duration, Instant};

use bci_launcher::protocol::{ProtocolOutcome, ProtocolParams, RecordedMarkers, Timings, build_trial_plan, run_trials};
use bci_launcher::state::{RunState, SharedState};
use bci_launcher::triggers::TriggerDef;

fn params(timings: Timings, triggers: Option<TriggerDef>) -> ProtocolParams {
    ProtocolParams {
        directions: vec!["LEFT".to_string(), "RIGHT".to_string()],
        trials: 4,
        timings,
        triggers,
        seed: Some(3),
    }
}

fn instant() -> Timings {
    Timings {
        init: 0.0,
        gap: 0.0,
        ready: 0.0,
        dir: 0.0,
    }
}

#[test]
fn plan_covers_every_direction() {
    let directions = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
    let plan = build_trial_plan(&directions, 6, None);
    assert_eq!(plan.len(), 6);
    // remainder trials go to distinct directions
    for d in &directions {
        let n = plan.iter().filter(|p| *p == d).count();
        assert!((1..=2).contains(&n));
    }
}

#[test]
fn markers_follow_the_trigger_file() {
    let triggers = TriggerDef::parse("INIT 1\nGAP 2\nREADY 3\nEND 4\nLEFT 10\nRIGHT 11\n").unwrap();
    let params = params(instant(), Some(triggers));
    let plan = build_trial_plan(&params.directions, params.trials, params.seed);
    let state = SharedState::new(RunState::Started);
    let mut sink = RecordedMarkers::default();

    let outcome = run_trials(&params, &plan, &state, &mut sink).unwrap();
    assert_eq!(outcome, ProtocolOutcome::Finished { trials: 4 });

    let markers = sink.0;
    assert_eq!(markers.len(), 1 + 3 * 4 + 1);
    assert_eq!(markers.first(), Some(&1));
    assert_eq!(markers.last(), Some(&4));
    for (trial, chunk) in plan.iter().zip(markers[1..13].chunks(3)) {
        let code = if trial == "LEFT" { 10 } else { 11 };
        assert_eq!(chunk, [2, 3, code]);
    }
}

#[test]
fn without_trigger_file_only_directions_are_marked() {
    let params = params(instant(), None);
    let plan = vec!["RIGHT".to_string(), "LEFT".to_string()];
    let state = SharedState::new(RunState::Started);
    let mut sink = RecordedMarkers::default();

    run_trials(&params, &plan, &state, &mut sink).unwrap();
    assert_eq!(sink.0, [2, 1]);
}

#[test]
fn stop_cuts_the_current_phase_short() {
    let timings = Timings {
        init: 0.0,
        gap: 0.0,
        ready: 0.0,
        dir: 30.0,
    };
    let params = params(timings, None);
    let plan = build_trial_plan(&params.directions, params.trials, params.seed);
    let state = SharedState::new(RunState::Started);
    let stopper = state.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stopper.set(RunState::Stopped);
    });

    let started = Instant::now();
    let mut sink = RecordedMarkers::default();
    let outcome = run_trials(&params, &plan, &state, &mut sink).unwrap();
    assert_eq!(outcome, ProtocolOutcome::Aborted { completed: 0 });
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(sink.0.len(), 1);
}

#[test]
fn invalid_parameters_are_rejected() {
    let mut p = params(instant(), None);
    p.trials = 0;
    assert!(p.validate().is_err());

    let mut p = params(instant(), None);
    p.directions.clear();
    assert!(p.validate().is_err());

    let mut p = params(instant(), None);
    p.timings.gap = -1.0;
    assert!(p.validate().is_err());

    assert!(params(instant(), None).validate().is_ok());
}
