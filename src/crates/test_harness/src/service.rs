use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use crate::console::ConsoleInput;
use crate::log_bus::{LogEvent, LogEventBus, LogLevel};
use crate::session::RunState;

/// Result type returned by managed service code.
pub type ServiceResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

/// The long-running component under test.
///
/// A session builds the service on its background thread and then calls
/// [`run`](Self::run) on that same thread. `is_running` must report `true`
/// from construction until shutdown is requested or the run loop ends.
pub trait ManagedService: Send + Sync + 'static {
    /// Run the service until it shuts down.
    ///
    /// Console commands are read from `console`; `heartbeat` must be beaten
    /// from the recurring main loop once initialization is complete.
    fn run(&self, console: ConsoleInput, heartbeat: Heartbeat) -> ServiceResult;

    fn is_running(&self) -> bool;

    /// Ask the run loop to exit. Must not block on the loop itself.
    fn shutdown(&self);
}

/// Everything the service needs at construction time.
#[derive(Clone)]
pub struct ServiceContext {
    pub logger: SessionLogger,
    pub root_path: PathBuf,
    pub data_path: PathBuf,
    pub plugin_path: PathBuf,
}

/// Logging capability the managed service writes to.
pub trait LogSink {
    fn log(&self, level: LogLevel, message: &str);

    fn emergency(&self, message: &str) {
        self.log(LogLevel::Emergency, message);
    }

    fn alert(&self, message: &str) {
        self.log(LogLevel::Alert, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn notice(&self, message: &str) {
        self.log(LogLevel::Notice, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
}

/// Log sink wired into the session's [`LogEventBus`].
///
/// Every call is captured as a [`LogEvent`] and forwarded to `tracing`. Until
/// the service reports itself running, messages are also printed to stdout
/// when the session's fallback console is enabled.
#[derive(Clone)]
pub struct SessionLogger {
    bus: Arc<LogEventBus>,
    run: Arc<RunState>,
    fallback_console: bool,
}

impl SessionLogger {
    pub(crate) fn new(bus: Arc<LogEventBus>, run: Arc<RunState>, fallback_console: bool) -> Self {
        Self {
            bus,
            run,
            fallback_console,
        }
    }
}

impl LogSink for SessionLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.bus.append(LogEvent::new(level, message));

        match level {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                tracing::error!(%level, "{message}")
            }
            LogLevel::Warning => tracing::warn!(%level, "{message}"),
            LogLevel::Notice | LogLevel::Info => tracing::info!(%level, "{message}"),
            LogLevel::Debug => tracing::debug!(%level, "{message}"),
        }

        if self.fallback_console && !self.run.service_running() {
            println!("{message}");
        }
    }
}

/// Hook the service's main loop beats once it has reached steady state.
#[derive(Clone)]
pub struct Heartbeat {
    run: Arc<RunState>,
}

impl Heartbeat {
    pub(crate) fn new(run: Arc<RunState>) -> Self {
        Self { run }
    }

    /// Record a main-loop iteration. Only the first beat has an effect.
    pub fn beat(&self) {
        self.run.enter_main_loop();
    }
}
