use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use console_harness::{ConsoleInjector, ConsoleRead};

#[test]
fn pushed_lines_are_pulled_in_fifo_order() {
    let injector = ConsoleInjector::default();
    injector.push("eng");
    injector.push("stop");
    assert_eq!(injector.pending(), 2);

    assert_eq!(injector.blocking_pull(|| true).as_deref(), Some("eng"));
    assert_eq!(injector.blocking_pull(|| true).as_deref(), Some("stop"));
    assert_eq!(injector.pending(), 0);
}

#[test]
fn blocked_reader_wakes_when_a_line_is_pushed() {
    let injector = Arc::new(ConsoleInjector::new(Duration::from_secs(5)));
    let reader = {
        let injector = injector.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let line = injector.blocking_pull(|| true);
            (line, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    injector.push("say hello");

    let (line, waited) = reader.join().expect("reader thread");
    assert_eq!(line.as_deref(), Some("say hello"));
    assert!(
        waited < Duration::from_secs(4),
        "push should wake the reader before its re-check interval, waited {waited:?}"
    );
}

#[test]
fn reader_sees_end_of_input_once_the_service_stops() {
    let injector = Arc::new(ConsoleInjector::new(Duration::from_millis(20)));
    let running = Arc::new(AtomicBool::new(true));
    let reader = {
        let injector = injector.clone();
        let running = running.clone();
        thread::spawn(move || injector.blocking_pull(|| running.load(Ordering::SeqCst)))
    };

    thread::sleep(Duration::from_millis(50));
    running.store(false, Ordering::SeqCst);

    assert_eq!(reader.join().expect("reader thread"), None);
}

#[test]
fn timed_pull_distinguishes_idle_from_closed() {
    let injector = ConsoleInjector::new(Duration::from_millis(10));

    assert_eq!(
        injector.pull_timeout(Duration::from_millis(30), || true),
        ConsoleRead::Idle
    );
    assert_eq!(
        injector.pull_timeout(Duration::from_millis(30), || false),
        ConsoleRead::Closed
    );

    injector.push("version");
    assert_eq!(
        injector.pull_timeout(Duration::from_millis(30), || false),
        ConsoleRead::Line("version".to_string()),
        "pending input is delivered even after the service stopped"
    );
}

#[test]
fn cleared_lines_are_not_replayed() {
    let injector = ConsoleInjector::default();
    injector.push("stale");
    injector.clear();
    assert_eq!(injector.blocking_pull(|| false), None);
}
