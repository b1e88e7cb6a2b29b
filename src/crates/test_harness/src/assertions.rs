//! Panicking assertions over a session's captured log.
//!
//! Failures print the captured events so the test output shows what the
//! service actually said.

use std::time::Duration;

use crate::log_bus::{LogEvent, LogLevel};
use crate::session::TestSession;

/// Assert that an event matching `check` has already been captured.
#[track_caller]
pub fn assert_log_event<F>(session: &TestSession, check: F, message: &str)
where
    F: Fn(&LogEvent) -> bool,
{
    if !session.check_log(check) {
        fail(session, message);
    }
}

/// Assert that an event matching `check` is captured within `timeout`.
#[track_caller]
pub fn assert_log_event_within<F>(session: &TestSession, check: F, message: &str, timeout: Duration)
where
    F: Fn(&LogEvent) -> bool,
{
    if !session.wait_for_log(check, timeout) {
        fail(
            session,
            &format!("{message} (waited {} milliseconds)", timeout.as_millis()),
        );
    }
}

/// Assert that `text` was logged verbatim at `level`.
#[track_caller]
pub fn assert_log_message(session: &TestSession, level: LogLevel, text: &str) {
    assert_log_event(
        session,
        |event| event.level == level && event.message == text,
        &format!("expected [{level}] {text:?} in service log"),
    );
}

#[track_caller]
pub fn assert_log_message_within(
    session: &TestSession,
    level: LogLevel,
    text: &str,
    timeout: Duration,
) {
    assert_log_event_within(
        session,
        |event| event.level == level && event.message == text,
        &format!("expected [{level}] {text:?} in service log"),
        timeout,
    );
}

/// Assert that no captured event matches `check`.
#[track_caller]
pub fn assert_no_log_event<F>(session: &TestSession, check: F, message: &str)
where
    F: Fn(&LogEvent) -> bool,
{
    if session.check_log(check) {
        fail(session, message);
    }
}

#[track_caller]
fn fail(session: &TestSession, message: &str) -> ! {
    let captured: Vec<String> = session
        .log_events()
        .iter()
        .map(|event| format!("  {event}"))
        .collect();
    panic!("{message}\ncaptured log:\n{}", captured.join("\n"));
}
