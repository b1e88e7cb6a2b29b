#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use console_harness::{
    ConsoleInput, ConsoleRead, FixedResolver, Heartbeat, LogSink, ManagedService, ServiceContext,
    ServiceResult, SessionConfig, SessionLogger, TestSession, DEFAULT_CONFIG_FILE,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

pub const LANGUAGES: &[(&str, &str)] =
    &[("eng", "English"), ("deu", "Deutsch"), ("fra", "Français")];

/// Interval between main-loop ticks of the fake service.
pub const TICK: Duration = Duration::from_millis(10);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Contents of the fake service's configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeServiceSettings {
    pub language: String,
}

/// Console server stand-in: asks for a language on first run, then ticks
/// until a `stop` command or a shutdown request arrives.
pub struct FakeService {
    log: SessionLogger,
    root_path: PathBuf,
    data_path: PathBuf,
    running: AtomicBool,
    ticks: AtomicU64,
}

impl FakeService {
    pub fn new(context: ServiceContext) -> Self {
        Self {
            log: context.logger,
            root_path: context.root_path,
            data_path: context.data_path,
            running: AtomicBool::new(true),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn config_file(&self) -> PathBuf {
        self.data_path.join(DEFAULT_CONFIG_FILE)
    }

    /// Returns `false` if the console closed before a language was chosen.
    fn select_language(&self, console: &ConsoleInput) -> ServiceResult<bool> {
        self.log.info("Welcome! Please choose a language first");
        for (code, name) in LANGUAGES {
            self.log.info(&format!("{name} => {code}"));
        }

        loop {
            let line = match console.read_line() {
                Some(line) => line,
                None => return Ok(false),
            };
            let code = line.trim();
            if LANGUAGES.iter().any(|(known, _)| *known == code) {
                let settings = FakeServiceSettings {
                    language: code.to_string(),
                };
                fs::write(self.config_file(), serde_json::to_string_pretty(&settings)?)?;
                self.log.info(&format!("Language set to {code}"));
                return Ok(true);
            }
            self.log.warning(&format!("Unknown language {code:?}"));
        }
    }

    fn dispatch(&self, command: &str) {
        let mut parts = command.trim().splitn(2, ' ');
        match (parts.next().unwrap_or(""), parts.next()) {
            ("stop", _) => {
                self.log.info("Stopping the server");
                self.shutdown();
            }
            ("say", Some(text)) => self.log.info(&format!("[CONSOLE] {text}")),
            ("version", _) => self.log.info("This server is running fake-service 1.0"),
            ("", _) => {}
            (other, _) => self.log.warning(&format!("Unknown command {other:?}")),
        }
    }
}

impl ManagedService for FakeService {
    fn run(&self, console: ConsoleInput, heartbeat: Heartbeat) -> ServiceResult {
        if !self.config_file().exists() && !self.select_language(&console)? {
            return Ok(());
        }

        let settings: FakeServiceSettings =
            serde_json::from_str(&fs::read_to_string(self.config_file())?)?;
        self.log.info(&format!("Loading {DEFAULT_CONFIG_FILE}..."));
        self.log.info(&format!("Selected language: {}", settings.language));
        self.log
            .debug(&format!("Server root is {}", self.root_path.display()));
        self.log.notice("Done! For help, type \"help\"");

        while self.running.load(Ordering::SeqCst) {
            heartbeat.beat();
            self.ticks.fetch_add(1, Ordering::SeqCst);
            match console.read_line_timeout(TICK) {
                ConsoleRead::Line(command) => self.dispatch(&command),
                ConsoleRead::Idle => {}
                ConsoleRead::Closed => break,
            }
        }

        self.log.info("Server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Shares the last constructed service with the test body.
#[derive(Clone, Default)]
pub struct ServiceSlot {
    last: Arc<Mutex<Option<Arc<FakeService>>>>,
}

impl ServiceSlot {
    pub fn last(&self) -> Option<Arc<FakeService>> {
        self.last.lock().unwrap().clone()
    }
}

/// Thin wrapper so the slot can keep a handle to the instance the session runs.
pub struct SharedService(pub Arc<FakeService>);

impl ManagedService for SharedService {
    fn run(&self, console: ConsoleInput, heartbeat: Heartbeat) -> ServiceResult {
        self.0.run(console, heartbeat)
    }

    fn is_running(&self) -> bool {
        self.0.is_running()
    }

    fn shutdown(&self) {
        self.0.shutdown()
    }
}

/// Quick-failing timings so tests spend little time in poll rounds.
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_log_poll_interval(Duration::from_millis(20))
        .with_console_poll_interval(Duration::from_millis(20))
        .with_fallback_console(false)
}

/// Session around a [`FakeService`], rooted in a per-test temporary directory.
pub fn fake_session() -> (TestSession, TempDir) {
    fake_config_session(fast_config())
}

pub fn fake_config_session(config: SessionConfig) -> (TestSession, TempDir) {
    init_tracing();
    let workdir = TempDir::new().expect("temp workdir");
    let session = TestSession::new(|context| Ok(FakeService::new(context)))
        .with_config(config)
        .with_resolver(FixedResolver(Some(workdir.path().to_path_buf())));
    (session, workdir)
}

/// Like [`fake_session`], also exposing the service instance.
pub fn shared_session() -> (TestSession, ServiceSlot, TempDir) {
    init_tracing();
    let workdir = TempDir::new().expect("temp workdir");
    let slots = ServiceSlot::default();
    let slot = slots.clone();
    let session = TestSession::new(move |context| {
        let service = Arc::new(FakeService::new(context));
        *slot.last.lock().unwrap() = Some(service.clone());
        Ok(SharedService(service))
    })
    .with_config(fast_config())
    .with_resolver(FixedResolver(Some(workdir.path().to_path_buf())));
    (session, slots, workdir)
}

/// Write a configuration file so the fake service skips its language prompt.
pub fn preconfigure(data_dir: &std::path::Path, language: &str) {
    fs::create_dir_all(data_dir).expect("create data dir");
    let settings = FakeServiceSettings {
        language: language.to_string(),
    };
    fs::write(
        data_dir.join(DEFAULT_CONFIG_FILE),
        serde_json::to_string(&settings).expect("serialize settings"),
    )
    .expect("write settings");
}
