use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default upper bound on a single wait round in [`LogEventBus::wait_for`].
pub const DEFAULT_LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Severity of a captured log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Emergency => "EMERGENCY",
            LogLevel::Alert => "ALERT",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Notice => "NOTICE",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(name)
    }
}

/// Single log record emitted by the managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

#[derive(Debug, Default)]
struct Captured {
    events: Vec<LogEvent>,
    // bumped by every clear so waiters can tell a shorter log from a new one
    clears: u64,
}

/// Append-only, thread-safe log of everything the managed service emitted.
#[derive(Debug)]
pub struct LogEventBus {
    captured: Mutex<Captured>,
    appended: Condvar,
    poll_interval: Duration,
}

impl Default for LogEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_POLL_INTERVAL)
    }
}

impl LogEventBus {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            captured: Mutex::new(Captured::default()),
            appended: Condvar::new(),
            poll_interval,
        }
    }

    /// Append an event and wake every waiter.
    pub fn append(&self, event: LogEvent) {
        let mut captured = self.lock();
        captured.events.push(event);
        self.appended.notify_all();
    }

    /// Copy of every event captured so far, in arrival order.
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every captured event.
    pub fn clear(&self) {
        let mut captured = self.lock();
        captured.events.clear();
        captured.clears += 1;
    }

    /// Non-blocking scan of the events captured so far.
    pub fn check_any<F>(&self, check: F) -> bool
    where
        F: Fn(&LogEvent) -> bool,
    {
        self.snapshot().iter().any(check)
    }

    /// Wait until an event matching `check` is present or `timeout` elapses.
    ///
    /// Events already captured count as a match. The check is evaluated
    /// outside the lock, so it may freely call back into the bus.
    pub fn wait_for<F>(&self, check: F, timeout: Duration) -> bool
    where
        F: Fn(&LogEvent) -> bool,
    {
        // `None` means the timeout is too large to form an instant: no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut seen = 0;
        let mut clears = None;

        loop {
            let fresh = {
                let mut captured = self.lock();
                if clears.is_some() && captured.events.len() == seen {
                    let round = match next_round(deadline, self.poll_interval) {
                        Some(round) => round,
                        None => return false,
                    };
                    captured = self
                        .appended
                        .wait_timeout(captured, round)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                if clears != Some(captured.clears) {
                    clears = Some(captured.clears);
                    seen = 0;
                }
                let fresh = captured.events[seen..].to_vec();
                seen = captured.events.len();
                fresh
            };

            if fresh.iter().any(&check) {
                return true;
            }
            if next_round(deadline, self.poll_interval).is_none() {
                return false;
            }
        }
    }

    /// Render the captured events as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Length of the next wait round, or `None` once `deadline` has passed.
pub(crate) fn next_round(deadline: Option<Instant>, poll_interval: Duration) -> Option<Duration> {
    match deadline {
        Some(deadline) => {
            let now = Instant::now();
            (now < deadline).then(|| (deadline - now).min(poll_interval))
        }
        None => Some(poll_interval),
    }
}
