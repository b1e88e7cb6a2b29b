use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::console::DEFAULT_CONSOLE_POLL_INTERVAL;
use crate::error::HarnessResult;
use crate::log_bus::DEFAULT_LOG_POLL_INTERVAL;

/// Environment variable naming the directory fresh server roots are created in.
pub const TEST_PATH_ENV: &str = "CONSOLE_HARNESS_TEST_PATH";

/// Configuration file whose presence marks the service as already configured.
pub const DEFAULT_CONFIG_FILE: &str = "service.json";

/// Session-level configuration for one managed service.
///
/// Path fields left as `None` are derived when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root directory of the service. Derived as a fresh temporary directory when unset.
    pub server_root: Option<PathBuf>,
    /// Directory a fresh server root is created in.
    pub server_root_parent: Option<PathBuf>,
    /// Data directory; defaults to `<root>/data`.
    pub data_path: Option<PathBuf>,
    /// Plugin directory; defaults to `<root>/plugins`.
    pub plugin_path: Option<PathBuf>,
    /// Remove the server root once the service's run loop exits.
    pub delete_on_finish: bool,
    /// Remove the server root when the session is dropped.
    pub delete_on_exit: bool,
    /// File checked under the data path by `TestSession::is_configured`.
    pub config_file_name: String,
    /// Log lines the session waits for while starting.
    pub startup_markers: StartupMarkers,
    /// Upper bound on how long `start` waits for the startup marker.
    pub startup_timeout: Duration,
    /// Wait granularity of log-bus waits.
    pub log_poll_interval: Duration,
    /// Re-check interval of console reads.
    pub console_poll_interval: Duration,
    /// Mirror log messages to stdout while the service is not yet running.
    pub fallback_console: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_root: None,
            server_root_parent: None,
            data_path: None,
            plugin_path: None,
            delete_on_finish: false,
            delete_on_exit: false,
            config_file_name: DEFAULT_CONFIG_FILE.to_string(),
            startup_markers: StartupMarkers::default(),
            startup_timeout: Duration::from_millis(1000),
            log_poll_interval: DEFAULT_LOG_POLL_INTERVAL,
            console_poll_interval: DEFAULT_CONSOLE_POLL_INTERVAL,
            fallback_console: true,
        }
    }
}

impl SessionConfig {
    /// Create a config with every default in place.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> HarnessResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Use a fixed server root instead of a fresh temporary directory.
    pub fn with_server_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_root = Some(path.into());
        self
    }

    /// Create fresh server roots inside `path`.
    pub fn with_server_root_parent(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_root_parent = Some(path.into());
        self
    }

    /// Override the data directory.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Override the plugin directory.
    pub fn with_plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_path = Some(path.into());
        self
    }

    /// Remove the server root once the run loop exits.
    pub fn with_delete_on_finish(mut self, delete: bool) -> Self {
        self.delete_on_finish = delete;
        self
    }

    /// Remove the server root when the session is dropped.
    pub fn with_delete_on_exit(mut self, delete: bool) -> Self {
        self.delete_on_exit = delete;
        self
    }

    /// Override the file checked to decide whether the service is configured.
    pub fn with_config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// Override the log prefixes awaited during startup.
    pub fn with_startup_markers(mut self, markers: StartupMarkers) -> Self {
        self.startup_markers = markers;
        self
    }

    /// Override how long `start` waits for the startup marker.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Override the wait granularity of log-bus waits.
    pub fn with_log_poll_interval(mut self, interval: Duration) -> Self {
        self.log_poll_interval = interval;
        self
    }

    /// Override the re-check interval of console reads.
    pub fn with_console_poll_interval(mut self, interval: Duration) -> Self {
        self.console_poll_interval = interval;
        self
    }

    /// Enable or disable the stdout mirror used before the service runs.
    pub fn with_fallback_console(mut self, enabled: bool) -> Self {
        self.fallback_console = enabled;
        self
    }

    /// Data path as known before the session resolved anything.
    pub(crate) fn declared_data_path(&self) -> Option<PathBuf> {
        self.data_path
            .clone()
            .or_else(|| self.server_root.as_ref().map(|root| root.join("data")))
    }

    /// Resolve the effective paths, creating derived directories.
    ///
    /// A derived server root is written back into the config so a restart
    /// reuses it.
    pub(crate) fn resolve_paths(
        &mut self,
        resolver: &dyn ConfigResolver,
    ) -> HarnessResult<ServicePaths> {
        let root = match &self.server_root {
            Some(root) => root.clone(),
            None => {
                let parent = self
                    .server_root_parent
                    .clone()
                    .or_else(|| resolver.default_root_parent())
                    .unwrap_or_else(std::env::temp_dir);
                fs::create_dir_all(&parent)?;
                let root = tempfile::Builder::new()
                    .prefix("harness")
                    .tempdir_in(&parent)?
                    .keep();
                self.server_root = Some(root.clone());
                root
            }
        };

        let data = derived_dir(&self.data_path, &root, "data")?;
        let plugins = derived_dir(&self.plugin_path, &root, "plugins")?;

        Ok(ServicePaths {
            root,
            data,
            plugins,
        })
    }
}

fn derived_dir(explicit: &Option<PathBuf>, root: &Path, name: &str) -> HarnessResult<PathBuf> {
    match explicit {
        Some(path) => Ok(path.clone()),
        None => {
            let dir = root.join(name);
            fs::create_dir_all(&dir)?;
            Ok(dir)
        }
    }
}

/// Message prefixes that mark the end of the startup phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupMarkers {
    /// Awaited when the service finds its configuration file and loads directly.
    pub configured: String,
    /// Awaited when the service has to run its first-time setup prompt.
    pub unconfigured: String,
}

impl Default for StartupMarkers {
    fn default() -> Self {
        Self {
            configured: "Loading".to_string(),
            unconfigured: "Welcome!".to_string(),
        }
    }
}

/// Directories handed to the managed service for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub plugins: PathBuf,
}

/// Source of default paths consumed while resolving a session's directories.
pub trait ConfigResolver: Send + Sync {
    /// Directory fresh server roots are created in when none is configured.
    fn default_root_parent(&self) -> Option<PathBuf>;
}

/// Resolves defaults from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvResolver {
    var: String,
}

impl EnvResolver {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(TEST_PATH_ENV)
    }
}

impl ConfigResolver for EnvResolver {
    fn default_root_parent(&self) -> Option<PathBuf> {
        std::env::var_os(&self.var)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}

/// Resolver with a fixed answer, handy for tests that must not read the environment.
#[derive(Debug, Clone, Default)]
pub struct FixedResolver(pub Option<PathBuf>);

impl ConfigResolver for FixedResolver {
    fn default_root_parent(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}
