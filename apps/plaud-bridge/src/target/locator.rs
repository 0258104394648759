use std::path::{Path, PathBuf};

use sysinfo::{RefreshKind, System};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub exe: Option<PathBuf>,
}

pub trait ProcessLocator: Send + Sync {
    /// First running process that looks like the desktop app. Absence is not an error.
    fn locate(&self) -> Option<ProcessHandle>;
}

/// Scans the host process table.
#[derive(Debug, Clone)]
pub struct SystemLocator {
    pattern: String,
}

impl SystemLocator {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl ProcessLocator for SystemLocator {
    fn locate(&self) -> Option<ProcessHandle> {
        let sys =
            System::new_with_specifics(RefreshKind::everything().without_cpu().without_memory());

        let mut matches: Vec<ProcessHandle> = sys
            .processes()
            .iter()
            .filter(|(_, process)| matches_pattern(process.exe(), process.name(), &self.pattern))
            .map(|(pid, process)| ProcessHandle {
                pid: pid.as_u32(),
                exe: process.exe().map(Path::to_path_buf),
            })
            .collect();

        // the process table is a hash map; pid order keeps the pick stable
        matches.sort_by_key(|handle| handle.pid);
        let found = matches.into_iter().next();
        match &found {
            Some(handle) => {
                tracing::debug!(pid = handle.pid, exe = ?handle.exe, "located target process")
            }
            None => tracing::debug!(pattern = %self.pattern, "target process not running"),
        }
        found
    }
}

/// Matches on the executable path, or on the process name when the path is unreadable.
pub fn matches_pattern(exe: Option<&Path>, name: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match exe {
        Some(path) => path.to_string_lossy().contains(pattern),
        None => !name.is_empty() && pattern.ends_with(name),
    }
}
