use std::thread;
use std::time::{Duration, Instant};

use bci_launcher::state::{Latch, RunState, SharedState};

#[test]
fn codes_round_trip_and_reject_unknown() {
    for state in [RunState::Stopped, RunState::Started, RunState::Waiting] {
        assert_eq!(RunState::from_code(state.code() as i64).unwrap(), state);
    }
    assert!(RunState::try_from(3).is_err());
    assert!(RunState::try_from(-1).is_err());
    assert_eq!(RunState::Waiting.to_string(), "waiting (2)");
}

#[test]
fn set_returns_previous_value() {
    let state = SharedState::default();
    assert_eq!(state.set(RunState::Waiting), RunState::Stopped);
    assert_eq!(state.set(RunState::Waiting), RunState::Waiting);
    assert!(state.is(RunState::Waiting));
}

#[test]
fn transition_only_from_expected_state() {
    let state = SharedState::new(RunState::Waiting);
    assert!(!state.transition(RunState::Stopped, RunState::Started));
    assert_eq!(state.get(), RunState::Waiting);
    assert!(state.transition(RunState::Waiting, RunState::Started));
    assert_eq!(state.get(), RunState::Started);
}

#[test]
fn wait_for_wakes_on_change() {
    let state = SharedState::new(RunState::Waiting);
    let setter = state.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        setter.set(RunState::Started);
    });

    let started = Instant::now();
    assert!(state.wait_for(RunState::Started, Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(5));
    handle.join().unwrap();
}

#[test]
fn wait_for_times_out_as_a_sleep() {
    let state = SharedState::new(RunState::Started);
    let started = Instant::now();
    assert!(!state.wait_for(RunState::Stopped, Duration::from_millis(80)));
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn wait_while_reports_the_new_state() {
    let state = SharedState::new(RunState::Waiting);
    let setter = state.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        setter.set(RunState::Stopped);
    });
    assert_eq!(state.wait_while(RunState::Waiting, Duration::from_secs(5)), RunState::Stopped);
}

#[test]
fn latch_releases_once() {
    let latch = Latch::new();
    assert!(!latch.wait(Duration::from_millis(10)));

    let releaser = latch.clone();
    thread::spawn(move || releaser.release());
    assert!(latch.wait(Duration::from_secs(5)));
    assert!(latch.is_released());

    latch.release();
    assert!(latch.is_released());
}
