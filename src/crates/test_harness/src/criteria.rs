//! Configuration callbacks applied around service startup.
//!
//! A [`Criterion`] either edits the [`SessionConfig`] before the background
//! thread is spawned, or interacts with the live session once the startup
//! marker has been observed. [`Criteria`] keeps them in caller order.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::session::TestSession;

type BeforeStartFn = Box<dyn FnOnce(&mut SessionConfig) -> HarnessResult<()>>;
type AfterStartFn = Box<dyn FnOnce(&TestSession) -> HarnessResult<()>>;

/// A single startup callback.
pub enum Criterion {
    /// Runs on the controlling thread before the service thread exists.
    BeforeStart(BeforeStartFn),
    /// Runs on the controlling thread after the startup marker appeared.
    AfterStart(AfterStartFn),
}

impl Criterion {
    /// Wrap a callback that edits the config before the spawn.
    pub fn before_start<F>(apply: F) -> Self
    where
        F: FnOnce(&mut SessionConfig) -> HarnessResult<()> + 'static,
    {
        Criterion::BeforeStart(Box::new(apply))
    }

    /// Wrap a callback that runs against the started session.
    pub fn after_start<F>(apply: F) -> Self
    where
        F: FnOnce(&TestSession) -> HarnessResult<()> + 'static,
    {
        Criterion::AfterStart(Box::new(apply))
    }

    /// Whether this criterion runs before the service thread is spawned.
    pub fn is_before_start(&self) -> bool {
        matches!(self, Criterion::BeforeStart(_))
    }
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::BeforeStart(_) => f.write_str("Criterion::BeforeStart"),
            Criterion::AfterStart(_) => f.write_str("Criterion::AfterStart"),
        }
    }
}

/// Ordered list of criteria handed to `TestSession::start_with`.
#[derive(Debug, Default)]
pub struct Criteria {
    items: Vec<Criterion>,
}

impl Criteria {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a criterion.
    pub fn with(mut self, criterion: Criterion) -> Self {
        self.items.push(criterion);
        self
    }

    /// Number of criteria in the list.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split into before-start and after-start callbacks, each keeping caller order.
    pub(crate) fn split(self) -> (Vec<BeforeStartFn>, Vec<AfterStartFn>) {
        let mut before = Vec::new();
        let mut after = Vec::new();
        for criterion in self.items {
            match criterion {
                Criterion::BeforeStart(apply) => before.push(apply),
                Criterion::AfterStart(apply) => after.push(apply),
            }
        }
        (before, after)
    }
}

impl From<Criterion> for Criteria {
    fn from(criterion: Criterion) -> Self {
        Criteria::new().with(criterion)
    }
}

impl From<Vec<Criterion>> for Criteria {
    fn from(items: Vec<Criterion>) -> Self {
        Self { items }
    }
}

impl FromIterator<Criterion> for Criteria {
    fn from_iter<I: IntoIterator<Item = Criterion>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Use `path` as the server root.
pub fn server_root(path: impl Into<PathBuf>) -> Criterion {
    let path = path.into();
    Criterion::before_start(move |config| {
        config.server_root = Some(path);
        Ok(())
    })
}

/// Create the fresh server root inside `path`.
pub fn server_root_parent(path: impl Into<PathBuf>) -> Criterion {
    let path = path.into();
    Criterion::before_start(move |config| {
        config.server_root_parent = Some(path);
        Ok(())
    })
}

/// Override the data directory.
pub fn data_path(path: impl Into<PathBuf>) -> Criterion {
    let path = path.into();
    Criterion::before_start(move |config| {
        config.data_path = Some(path);
        Ok(())
    })
}

/// Override the plugin directory.
pub fn plugin_path(path: impl Into<PathBuf>) -> Criterion {
    let path = path.into();
    Criterion::before_start(move |config| {
        config.plugin_path = Some(path);
        Ok(())
    })
}

/// Remove the server root once the run loop exits.
pub fn delete_on_finish(delete: bool) -> Criterion {
    Criterion::before_start(move |config| {
        config.delete_on_finish = delete;
        Ok(())
    })
}

/// Remove the server root when the session is dropped.
pub fn delete_on_exit(delete: bool) -> Criterion {
    Criterion::before_start(move |config| {
        config.delete_on_exit = delete;
        Ok(())
    })
}

/// Type a console line once the service is up.
pub fn send_console(line: impl Into<String>) -> Criterion {
    let line = line.into();
    Criterion::after_start(move |session| session.send_console_string(line).map(|_| ()))
}

/// Wait for the service's main loop once the service is up.
pub fn wait_main_loop(timeout: Duration) -> Criterion {
    Criterion::after_start(move |session| session.wait_main_loop(timeout).map(|_| ()))
}

/// How long [`select_language_and_wait_started`] waits for the main loop.
pub const LANGUAGE_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Answer the first-run language prompt with `language` and wait for the main loop.
///
/// Fails if the service was already configured, since it would never ask.
pub fn select_language_and_wait_started(language: impl Into<String>) -> Criterion {
    let language = language.into();
    Criterion::after_start(move |session| {
        if session.is_configured() {
            return Err(HarnessError::unexpected(
                "service is already configured; no language prompt expected",
            ));
        }
        session
            .send_console_string(language)?
            .wait_main_loop(LANGUAGE_SELECTION_TIMEOUT)?;
        Ok(())
    })
}
