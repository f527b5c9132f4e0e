//! Runtime-mutable engine configuration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// A single writable boolean that enables verbose logging and controls
/// whether a rewritten class's [`crate::model::InstrumentationPlan`] gets
/// rendered and written under `dump_dir` (see `Config::dump_file_name` and
/// `crate::runtime::AgentRuntime::dump_plan`). This crate has no real class
/// bytes behind the `ClassModel` seam, so the plan's text rendering stands
/// in for the bytes a real backend would dump.
pub struct Config {
    debug: AtomicBool,
    dump_dir: RwLock<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: AtomicBool::new(false),
            dump_dir: RwLock::new(PathBuf::from(".")),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn dump_dir(&self) -> PathBuf {
        self.dump_dir.read().clone()
    }

    pub fn set_dump_dir(&self, dir: impl AsRef<Path>) {
        *self.dump_dir.write() = dir.as_ref().to_owned();
    }

    /// The file name a dumped, rewritten class is written under:
    /// `instrumented_<slashes-to-underscores>.class`.
    pub fn dump_file_name(class_name: &str) -> String {
        format!("instrumented_{}.class", class_name.replace('/', "_"))
    }
}
