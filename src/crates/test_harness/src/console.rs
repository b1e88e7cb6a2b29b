use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::log_bus::next_round;
use crate::session::RunState;

/// Default re-check interval while a reader waits for injected input.
pub const DEFAULT_CONSOLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a timed console read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleRead {
    /// The next injected line.
    Line(String),
    /// Nothing arrived within the timeout; the service is still running.
    Idle,
    /// The service stopped and no input is pending.
    Closed,
}

/// FIFO of synthetic console lines waiting to be read by the managed service.
#[derive(Debug)]
pub struct ConsoleInjector {
    queue: Mutex<VecDeque<String>>,
    ready: Condvar,
    poll_interval: Duration,
}

impl Default for ConsoleInjector {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_POLL_INTERVAL)
    }
}

impl ConsoleInjector {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            poll_interval,
        }
    }

    /// Queue a line and wake one blocked reader.
    pub fn push(&self, line: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.push_back(line.into());
        self.ready.notify_one();
    }

    /// Number of lines queued but not yet read.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Pop the next line, waiting for one as long as `is_running` holds.
    ///
    /// Returns `None` once the queue is empty and the service reports it is no
    /// longer running. Liveness is re-checked at least once per poll interval.
    pub fn blocking_pull<R>(&self, is_running: R) -> Option<String>
    where
        R: Fn() -> bool,
    {
        loop {
            if let Some(line) = self.try_pop() {
                return Some(line);
            }
            if !is_running() {
                return None;
            }
            self.wait_round(self.poll_interval);
        }
    }

    /// Like [`blocking_pull`](Self::blocking_pull), bounded by `timeout`.
    pub fn pull_timeout<R>(&self, timeout: Duration, is_running: R) -> ConsoleRead
    where
        R: Fn() -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(line) = self.try_pop() {
                return ConsoleRead::Line(line);
            }
            if !is_running() {
                return ConsoleRead::Closed;
            }
            match next_round(deadline, self.poll_interval) {
                Some(round) => self.wait_round(round),
                None => return ConsoleRead::Idle,
            }
        }
    }

    fn try_pop(&self) -> Option<String> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn wait_round(&self, round: Duration) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.is_empty() {
            let _ = self
                .ready
                .wait_timeout(queue, round)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Console input handed to the managed service's input-reading loop.
///
/// Reads end once the service of the current run stops reporting itself as
/// running and every injected line has been consumed.
#[derive(Clone)]
pub struct ConsoleInput {
    injector: Arc<ConsoleInjector>,
    run: Arc<RunState>,
}

impl ConsoleInput {
    pub(crate) fn new(injector: Arc<ConsoleInjector>, run: Arc<RunState>) -> Self {
        Self { injector, run }
    }

    /// Block until the next line arrives; `None` signals end of input.
    pub fn read_line(&self) -> Option<String> {
        let line = self.injector.blocking_pull(|| self.run.service_running());
        if let Some(line) = &line {
            debug!(line = %line, "console input consumed");
        }
        line
    }

    /// Wait at most `timeout` for the next line.
    pub fn read_line_timeout(&self, timeout: Duration) -> ConsoleRead {
        let read = self
            .injector
            .pull_timeout(timeout, || self.run.service_running());
        if let ConsoleRead::Line(line) = &read {
            debug!(line = %line, "console input consumed");
        }
        read
    }
}

impl Iterator for ConsoleInput {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.read_line()
    }
}
