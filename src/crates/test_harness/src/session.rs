use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{ConfigResolver, EnvResolver, ServicePaths, SessionConfig};
use crate::console::{ConsoleInjector, ConsoleInput};
use crate::criteria::Criteria;
use crate::error::{HarnessError, HarnessResult};
use crate::gate::LifecycleGate;
use crate::log_bus::{LogEvent, LogEventBus};
use crate::service::{Heartbeat, ManagedService, ServiceContext, ServiceResult, SessionLogger};

/// How long dropping a live session waits for the run loop to exit.
const DROP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type ServiceFactory =
    dyn Fn(ServiceContext) -> ServiceResult<Arc<dyn ManagedService>> + Send + Sync;

/// Lifecycle of one run of the managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SessionState {
    /// Whether a run is in flight (the config is frozen and `start` is refused).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::NotStarted => "not started",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State shared between the controlling thread and the service thread of one run.
pub(crate) struct RunState {
    state: Mutex<SessionState>,
    started: LifecycleGate,
    stopped: LifecycleGate,
    service: Mutex<Option<Arc<dyn ManagedService>>>,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Starting),
            started: LifecycleGate::new(),
            stopped: LifecycleGate::new(),
            service: Mutex::new(None),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `from -> to`; returns `false` if the run was not in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        debug!(%from, %to, "session state changed");
        true
    }

    fn service(&self) -> Option<Arc<dyn ManagedService>> {
        self.service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, service: Arc<dyn ManagedService>) {
        *self.service.lock().unwrap_or_else(PoisonError::into_inner) = Some(service);
    }

    pub(crate) fn service_running(&self) -> bool {
        self.service().is_some_and(|service| service.is_running())
    }

    pub(crate) fn enter_main_loop(&self) {
        if self.started.is_signaled() {
            return;
        }
        if self.transition(SessionState::Starting, SessionState::Running) {
            info!("managed service entered its main loop");
        }
        self.started.signal();
    }

    /// Walk the remaining transitions once the run loop has exited.
    fn finish(&self) {
        // A loop that never beat goes straight from starting to stopping.
        let _ = self.transition(SessionState::Starting, SessionState::Stopping)
            || self.transition(SessionState::Running, SessionState::Stopping);
        self.transition(SessionState::Stopping, SessionState::Stopped);
        self.stopped.signal();
    }
}

/// Handle to one in-process managed service plus everything captured from it.
///
/// Each call to [`start_with`](Self::start_with) begins a new run on a fresh
/// background thread; the session itself can be restarted once a run has stopped.
pub struct TestSession {
    config: SessionConfig,
    factory: Arc<ServiceFactory>,
    resolver: Box<dyn ConfigResolver>,
    log: Arc<LogEventBus>,
    console: Arc<ConsoleInjector>,
    paths: Option<ServicePaths>,
    run: Option<Arc<RunState>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TestSession {
    /// Create a session whose service is built by `factory` on the service thread.
    pub fn new<S, F>(factory: F) -> Self
    where
        S: ManagedService,
        F: Fn(ServiceContext) -> ServiceResult<S> + Send + Sync + 'static,
    {
        let factory: Arc<ServiceFactory> = Arc::new(
            move |context: ServiceContext| -> ServiceResult<Arc<dyn ManagedService>> {
                let service = factory(context)?;
                Ok(Arc::new(service))
            },
        );
        let config = SessionConfig::default();

        Self {
            log: Arc::new(LogEventBus::new(config.log_poll_interval)),
            console: Arc::new(ConsoleInjector::new(config.console_poll_interval)),
            config,
            factory,
            resolver: Box::new(EnvResolver::default()),
            paths: None,
            run: None,
            thread: Mutex::new(None),
        }
    }

    /// Replace the whole configuration of a session that has not started yet.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.log = Arc::new(LogEventBus::new(config.log_poll_interval));
        self.console = Arc::new(ConsoleInjector::new(config.console_poll_interval));
        self.config = config;
        self.paths = None;
        self
    }

    /// Override where default paths come from.
    pub fn with_resolver(mut self, resolver: impl ConfigResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Current session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Edit the configuration; fails while a run is in flight.
    pub fn configure<F>(&mut self, edit: F) -> HarnessResult<&mut Self>
    where
        F: FnOnce(&mut SessionConfig),
    {
        let state = self.state();
        if state.is_active() {
            return Err(HarnessError::ConfigFrozen(state));
        }
        edit(&mut self.config);
        self.paths = None;
        Ok(self)
    }

    /// Use a fixed server root for the next start.
    pub fn set_server_root(&mut self, path: impl Into<PathBuf>) -> HarnessResult<&mut Self> {
        let path = path.into();
        self.configure(|config| config.server_root = Some(path))
    }

    /// Create the next fresh server root inside `path`.
    pub fn set_server_root_parent(&mut self, path: impl Into<PathBuf>) -> HarnessResult<&mut Self> {
        let path = path.into();
        self.configure(|config| config.server_root_parent = Some(path))
    }

    /// Override the data directory for the next start.
    pub fn set_data_path(&mut self, path: impl Into<PathBuf>) -> HarnessResult<&mut Self> {
        let path = path.into();
        self.configure(|config| config.data_path = Some(path))
    }

    /// Override the plugin directory for the next start.
    pub fn set_plugin_path(&mut self, path: impl Into<PathBuf>) -> HarnessResult<&mut Self> {
        let path = path.into();
        self.configure(|config| config.plugin_path = Some(path))
    }

    /// Remove the server root once the next run loop exits.
    pub fn set_delete_on_finish(&mut self, delete: bool) -> HarnessResult<&mut Self> {
        self.configure(|config| config.delete_on_finish = delete)
    }

    /// Remove the server root when the session is dropped.
    pub fn set_delete_on_exit(&mut self, delete: bool) -> HarnessResult<&mut Self> {
        self.configure(|config| config.delete_on_exit = delete)
    }

    /// Lifecycle state of the current run.
    pub fn state(&self) -> SessionState {
        self.run
            .as_ref()
            .map_or(SessionState::NotStarted, |run| run.state())
    }

    /// Whether the service exists and reports itself running.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| {
            matches!(run.state(), SessionState::Starting | SessionState::Running)
                && run.service_running()
        })
    }

    /// The service instance of the current run, once it has been constructed.
    pub fn service(&self) -> Option<Arc<dyn ManagedService>> {
        self.run.as_ref().and_then(|run| run.service())
    }

    /// Paths resolved by the most recent start.
    pub fn paths(&self) -> Option<&ServicePaths> {
        self.paths.as_ref()
    }

    /// Event log of the current run.
    pub fn log_bus(&self) -> &LogEventBus {
        &self.log
    }

    /// Console queue of the current run.
    pub fn console(&self) -> &ConsoleInjector {
        &self.console
    }

    /// Start the service without criteria.
    pub fn start(&mut self) -> HarnessResult<&mut Self> {
        self.start_with(Criteria::new())
    }

    /// Start the service, applying `criteria` around startup.
    ///
    /// Returns once the startup marker has been logged and every after-start
    /// criterion has run. Events captured by a previous run are discarded.
    pub fn start_with(&mut self, criteria: impl Into<Criteria>) -> HarnessResult<&mut Self> {
        let state = self.state();
        if state.is_active() {
            return Err(HarnessError::AlreadyStarted(state));
        }
        self.join_finished_thread()?;

        let (before, after) = criteria.into().split();
        for apply in before {
            apply(&mut self.config)?;
        }

        let paths = self.config.resolve_paths(self.resolver.as_ref())?;
        self.paths = Some(paths.clone());
        self.log = Arc::new(LogEventBus::new(self.config.log_poll_interval));
        self.console = Arc::new(ConsoleInjector::new(self.config.console_poll_interval));

        let marker = if self.is_configured() {
            self.config.startup_markers.configured.clone()
        } else {
            self.config.startup_markers.unconfigured.clone()
        };

        let run = Arc::new(RunState::new());
        self.run = Some(run.clone());
        info!(root = %paths.root.display(), %marker, "starting managed service");

        let worker = ServiceWorker {
            factory: self.factory.clone(),
            context: ServiceContext {
                logger: SessionLogger::new(
                    self.log.clone(),
                    run.clone(),
                    self.config.fallback_console,
                ),
                root_path: paths.root.clone(),
                data_path: paths.data.clone(),
                plugin_path: paths.plugins.clone(),
            },
            console: ConsoleInput::new(self.console.clone(), run.clone()),
            run: run.clone(),
            delete_root: self.config.delete_on_finish.then(|| paths.root.clone()),
        };
        let handle = match thread::Builder::new()
            .name("managed-service".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                run.finish();
                return Err(err.into());
            }
        };
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let timeout = self.config.startup_timeout;
        if !self
            .log
            .wait_for(|event| event.message.starts_with(&marker), timeout)
        {
            warn!(%marker, ?timeout, "startup marker not observed");
            if let Some(service) = run.service() {
                service.shutdown();
            }
            return Err(HarnessError::StartupTimeout { marker, timeout });
        }
        if run.service().is_none() {
            return Err(HarnessError::ServiceUnavailable);
        }

        for apply in after {
            apply(&*self)?;
        }
        Ok(self)
    }

    /// Ask the running service to shut down. Does not wait for it.
    pub fn stop(&self) -> HarnessResult<&Self> {
        let run = self
            .run
            .as_ref()
            .ok_or(HarnessError::NotRunning(SessionState::NotStarted))?;
        let state = run.state();
        let service = match run.service() {
            Some(service) if state == SessionState::Running && service.is_running() => service,
            _ => return Err(HarnessError::NotRunning(state)),
        };
        if !run.transition(SessionState::Running, SessionState::Stopping) {
            return Err(HarnessError::NotRunning(run.state()));
        }
        info!("stopping managed service");
        service.shutdown();
        Ok(self)
    }

    /// Wait until the service has beaten its heartbeat at least once.
    pub fn wait_main_loop(&self, timeout: Duration) -> HarnessResult<&Self> {
        let run = self.run.as_ref().ok_or(HarnessError::NotStarted)?;
        if run.started.wait(timeout) {
            Ok(self)
        } else {
            Err(HarnessError::MainLoopTimeout(timeout))
        }
    }

    /// Wait until the service's run loop has exited, then join its thread.
    pub fn wait_shutdown_complete(&self, timeout: Duration) -> HarnessResult<&Self> {
        let run = self.run.as_ref().ok_or(HarnessError::NotStarted)?;
        if !run.stopped.wait(timeout) {
            return Err(HarnessError::ShutdownTimeout(timeout));
        }
        self.join_finished_thread()?;
        Ok(self)
    }

    /// Type `line` into the service's console.
    pub fn send_console_string(&self, line: impl Into<String>) -> HarnessResult<&Self> {
        let state = self.state();
        if !self.is_running() {
            return Err(HarnessError::NotRunning(state));
        }
        self.console.push(line);
        Ok(self)
    }

    /// Whether the service's configuration file exists under the data path.
    ///
    /// Checks the filesystem on every call.
    pub fn is_configured(&self) -> bool {
        let data = self
            .paths
            .as_ref()
            .map(|paths| paths.data.clone())
            .or_else(|| self.config.declared_data_path());
        data.is_some_and(|data| data.join(&self.config.config_file_name).exists())
    }

    /// Events captured since the current run started or the last clear.
    pub fn log_events(&self) -> Vec<LogEvent> {
        self.log.snapshot()
    }

    /// Drop every event captured so far.
    pub fn clear_log_events(&self) {
        self.log.clear();
    }

    /// Whether any captured event matches `check`, without waiting.
    pub fn check_log<F>(&self, check: F) -> bool
    where
        F: Fn(&LogEvent) -> bool,
    {
        self.log.check_any(check)
    }

    /// Wait up to `timeout` for an event matching `check`.
    pub fn wait_for_log<F>(&self, check: F, timeout: Duration) -> bool
    where
        F: Fn(&LogEvent) -> bool,
    {
        self.log.wait_for(check, timeout)
    }

    /// Like [`wait_for_log`](Self::wait_for_log), but a miss is an error carrying `message`.
    pub fn expect_log<F>(&self, check: F, message: &str, timeout: Duration) -> HarnessResult<&Self>
    where
        F: Fn(&LogEvent) -> bool,
    {
        if self.log.wait_for(check, timeout) {
            Ok(self)
        } else {
            Err(HarnessError::log_timeout(message, timeout))
        }
    }

    fn join_finished_thread(&self) -> HarnessResult<()> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| HarnessError::unexpected("managed service thread panicked")),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("paths", &self.paths)
            .field("captured_events", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            if run.state().is_active() {
                if let Some(service) = run.service() {
                    run.transition(SessionState::Running, SessionState::Stopping);
                    service.shutdown();
                }
                if run.stopped.wait(DROP_SHUTDOWN_TIMEOUT) {
                    let _ = self.join_finished_thread();
                } else {
                    warn!("managed service did not stop; detaching its thread");
                }
            } else {
                let _ = self.join_finished_thread();
            }
        }

        if self.config.delete_on_exit {
            if let Some(root) = &self.config.server_root {
                remove_root(root);
            }
        }
    }
}

/// Everything the service thread owns for one run.
struct ServiceWorker {
    factory: Arc<ServiceFactory>,
    context: ServiceContext,
    console: ConsoleInput,
    run: Arc<RunState>,
    delete_root: Option<PathBuf>,
}

impl ServiceWorker {
    fn run(self) {
        let _exit = ExitGuard {
            run: self.run.clone(),
            delete_root: self.delete_root,
        };

        let service = match (self.factory)(self.context) {
            Ok(service) => service,
            Err(err) => {
                report_failure("failed to construct managed service", err.as_ref());
                return;
            }
        };
        self.run.install(service.clone());

        debug!("managed service run loop starting");
        if let Err(err) = service.run(self.console, Heartbeat::new(self.run.clone())) {
            report_failure("managed service failed", err.as_ref());
        }
        debug!("managed service run loop exited");
    }
}

/// Signals the stopped gate however the service thread ends, panics included.
struct ExitGuard {
    run: Arc<RunState>,
    delete_root: Option<PathBuf>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(root) = &self.delete_root {
            remove_root(root);
        }
        self.run.finish();
        info!("managed service stopped");
    }
}

fn report_failure(context: &str, err: &(dyn Error + Send + Sync)) {
    eprintln!("{context}: {err}");
    error!(error = %err, "{context}");
}

fn remove_root(root: &Path) {
    if !root.exists() {
        return;
    }
    match fs::remove_dir_all(root) {
        Ok(()) => debug!(root = %root.display(), "removed server root"),
        Err(err) => warn!(root = %root.display(), error = %err, "failed to remove server root"),
    }
}
