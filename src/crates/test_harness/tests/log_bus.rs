use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use console_harness::{LogEvent, LogEventBus, LogLevel};

fn info(message: &str) -> LogEvent {
    LogEvent::new(LogLevel::Info, message)
}

#[test]
fn appended_events_are_visible_to_an_immediate_check() {
    let bus = LogEventBus::default();
    assert!(!bus.check_any(|_| true), "fresh bus should be empty");

    bus.append(info("Loading world"));
    bus.append(LogEvent::new(LogLevel::Warning, "disk almost full"));

    assert!(bus.check_any(|event| event.message == "Loading world"));
    assert!(bus.check_any(|event| event.level == LogLevel::Warning));
    assert!(!bus.check_any(|event| event.level == LogLevel::Emergency));
}

#[test]
fn snapshot_preserves_arrival_order() {
    let bus = LogEventBus::default();
    for index in 0..5 {
        bus.append(info(&format!("line {index}")));
    }

    let messages: Vec<_> = bus
        .snapshot()
        .into_iter()
        .map(|event| event.message)
        .collect();
    assert_eq!(messages, ["line 0", "line 1", "line 2", "line 3", "line 4"]);
    assert_eq!(bus.len(), 5);
}

#[test]
fn wait_for_returns_immediately_on_existing_match() {
    let bus = LogEventBus::default();
    bus.append(info("Done"));

    let start = Instant::now();
    assert!(bus.wait_for(|event| event.message == "Done", Duration::from_secs(5)));
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "existing match should not wait"
    );
}

#[test]
fn wait_for_gives_up_after_the_deadline() {
    let bus = LogEventBus::new(Duration::from_millis(20));
    bus.append(info("unrelated"));

    let timeout = Duration::from_millis(150);
    let start = Instant::now();
    assert!(!bus.wait_for(|event| event.message == "never", timeout));

    let elapsed = start.elapsed();
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed < Duration::from_secs(2),
        "overshot deadline: {elapsed:?}"
    );
}

#[test]
fn wait_for_observes_events_appended_by_another_thread() {
    let bus = Arc::new(LogEventBus::default());
    let producer = {
        let bus = bus.clone();
        thread::spawn(move || {
            for index in 0..10 {
                thread::sleep(Duration::from_millis(5));
                bus.append(info(&format!("tick {index}")));
            }
        })
    };

    assert!(bus.wait_for(|event| event.message == "tick 9", Duration::from_secs(5)));
    producer.join().expect("producer thread");
    assert_eq!(bus.len(), 10);
}

#[test]
fn wait_for_survives_a_clear_during_the_wait() {
    let bus = Arc::new(LogEventBus::new(Duration::from_millis(10)));
    for _ in 0..3 {
        bus.append(info("stale"));
    }

    let writer = {
        let bus = bus.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            bus.clear();
            bus.append(info("fresh"));
        })
    };

    assert!(bus.wait_for(|event| event.message == "fresh", Duration::from_secs(5)));
    writer.join().expect("writer thread");
    assert_eq!(bus.snapshot(), vec![info("fresh")]);
}
