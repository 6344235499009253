//! Capability probes for the external tools.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// What the host's external tools can do.
///
/// Probed once per process; stages receive a copy so tests can pin the
/// capabilities instead of depending on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCapabilities {
    /// Whether `tar` is GNU tar.
    pub gnu_tar: bool,
    /// Search path used for parallel codec lookup; `None` reads `PATH`.
    pub search_path: Option<OsString>,
}

static DETECTED: OnceLock<ToolCapabilities> = OnceLock::new();

impl ToolCapabilities {
    /// Capabilities probed from the host on first use.
    #[must_use]
    pub fn detected() -> Self {
        DETECTED.get_or_init(Self::probe).clone()
    }

    /// Capabilities with an explicit GNU flag and search path.
    #[must_use]
    pub fn new(gnu_tar: bool, search_path: Option<OsString>) -> Self {
        Self {
            gnu_tar,
            search_path,
        }
    }

    fn probe() -> Self {
        let gnu_tar = match std::process::Command::new("tar").arg("--version").output() {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains("GNU tar"),
            Err(e) => {
                warn!(error = %e, "tar is not available");
                false
            }
        };
        debug!(gnu_tar, "Probed archival tool");

        Self {
            gnu_tar,
            search_path: None,
        }
    }

    /// Resolves `program` on this capability set's search path.
    #[must_use]
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(path) => find_program_in(program, path),
            None => find_program(program),
        }
    }
}

/// Resolves `program` on the process `PATH`.
#[must_use]
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_program_in(program, &path)
}

/// Resolves `program` on an explicit search path.
#[must_use]
pub fn find_program_in(program: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
