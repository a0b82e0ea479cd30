//! Assertion helpers over notification sequences.

use tw_protocol::ipc::Event;
use tw_protocol::task_models::Phase;

pub fn terminal_count(events: &[Event]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

/// Assert exactly one terminal notification, and that it comes last.
pub fn assert_single_terminal(events: &[Event]) {
    assert_eq!(
        terminal_count(events),
        1,
        "Expected exactly one terminal notification, got: {:?}",
        events
    );
    let last = events.last().unwrap();
    assert!(last.is_terminal(), "Terminal notification should come last, got: {:?}", last);
}

/// The `to` phases of all phase-change notifications, in order.
pub fn phase_changes(events: &[Event]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

pub fn failure_message(events: &[Event]) -> Option<&str> {
    events.iter().find_map(|e| match e {
        Event::Failed { error, .. } => Some(error.as_str()),
        _ => None,
    })
}
