//! Utilities for running a console-driven service in-process from a test and
//! observing it through its log and console channels.
//!
//! The service runs on a background thread owned by a [`TestSession`]. Every
//! message it logs lands in the session's [`LogEventBus`]; lines sent with
//! [`TestSession::send_console_string`] are read by the service as console input.
//!
//! Typical usage:
//! ```no_run
//! use std::time::Duration;
//!
//! use console_harness::criteria::select_language_and_wait_started;
//! use console_harness::{
//!     ConsoleInput, Heartbeat, ManagedService, ServiceContext, ServiceResult, TestSession,
//! };
//!
//! struct MyService;
//!
//! impl ManagedService for MyService {
//!     fn run(&self, _console: ConsoleInput, _heartbeat: Heartbeat) -> ServiceResult {
//!         Ok(())
//!     }
//!     fn is_running(&self) -> bool {
//!         false
//!     }
//!     fn shutdown(&self) {}
//! }
//!
//! fn build(_context: ServiceContext) -> ServiceResult<MyService> {
//!     Ok(MyService)
//! }
//!
//! let mut session = TestSession::new(build);
//! session
//!     .start_with(select_language_and_wait_started("eng"))
//!     .expect("service should start");
//! session
//!     .send_console_string("stop")
//!     .and_then(|session| session.wait_shutdown_complete(Duration::from_millis(5000)))
//!     .expect("service should stop");
//! ```

pub mod assertions;
mod config;
mod console;
pub mod criteria;
mod error;
mod gate;
mod log_bus;
mod service;
mod session;

pub use config::{
    ConfigResolver, EnvResolver, FixedResolver, ServicePaths, SessionConfig, StartupMarkers,
    DEFAULT_CONFIG_FILE, TEST_PATH_ENV,
};
pub use console::{ConsoleInjector, ConsoleInput, ConsoleRead, DEFAULT_CONSOLE_POLL_INTERVAL};
pub use criteria::{Criteria, Criterion};
pub use error::{HarnessError, HarnessResult};
pub use gate::LifecycleGate;
pub use log_bus::{LogEvent, LogEventBus, LogLevel, DEFAULT_LOG_POLL_INTERVAL};
pub use service::{
    Heartbeat, LogSink, ManagedService, ServiceContext, ServiceResult, SessionLogger,
};
pub use session::{SessionState, TestSession};
