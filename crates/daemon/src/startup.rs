//! Startup checks module for ripline
//!
//! Preflight checks run before any background loop starts:
//! - makemkvcon must resolve to an executable
//! - HandBrakeCLI must resolve to an executable

use crate::config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not found: '{binary}' is not an executable file or on PATH")]
    ToolMissing { tool: &'static str, binary: String },
}

/// Resolve an external tool the way a shell would.
///
/// Anything containing a path separator is taken as a path; a bare name is
/// searched for in `PATH`.
pub fn resolve_tool(tool: &'static str, binary: &Path) -> Result<PathBuf, StartupError> {
    which::which(binary).map_err(|_| StartupError::ToolMissing {
        tool,
        binary: binary.display().to_string(),
    })
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. makemkvcon availability
/// 2. HandBrakeCLI availability
///
/// A missing optical drive is only warned about; the monitor keeps polling.
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let makemkv = resolve_tool("makemkvcon", &cfg.makemkv.binary_path)?;
    info!(path = %makemkv.display(), "Found makemkvcon");

    let handbrake = resolve_tool("HandBrakeCLI", &cfg.handbrake.binary_path)?;
    info!(path = %handbrake.display(), "Found HandBrakeCLI");

    if !cfg.drive.path.exists() {
        warn!(device = %cfg.drive.path.display(), "Optical drive not present");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_bare_name_is_searched_on_path() {
        let found = resolve_tool("shell", Path::new("sh")).expect("sh should be on PATH");
        assert!(found.is_absolute());
        assert!(found.ends_with("sh"));
    }

    #[test]
    fn test_unknown_bare_name_is_missing() {
        let err = resolve_tool("makemkvcon", Path::new("definitely-not-a-ripline-tool")).unwrap_err();
        assert!(matches!(
            err,
            StartupError::ToolMissing { tool: "makemkvcon", ref binary } if binary == "definitely-not-a-ripline-tool"
        ));
    }

    #[test]
    fn test_explicit_path_must_be_executable() {
        let dir = TempDir::new().unwrap();
        let exec = write_file(dir.path(), "tool", 0o755);
        let plain = write_file(dir.path(), "data", 0o644);

        assert_eq!(resolve_tool("tool", &exec).unwrap(), exec);
        assert!(resolve_tool("data", &plain).is_err());
        assert!(resolve_tool("dir", dir.path()).is_err());
    }

    #[test]
    fn test_startup_checks_report_missing_tool() {
        let dir = TempDir::new().unwrap();
        let handbrake = write_file(dir.path(), "HandBrakeCLI", 0o755);

        let mut cfg = Config::default();
        cfg.makemkv.binary_path = dir.path().join("makemkvcon");
        cfg.handbrake.binary_path = handbrake;

        let err = run_startup_checks(&cfg).unwrap_err();
        assert!(matches!(err, StartupError::ToolMissing { tool: "makemkvcon", .. }));
        assert!(err.to_string().contains("makemkvcon"));
    }

    #[test]
    fn test_startup_checks_pass_with_both_tools() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.makemkv.binary_path = write_file(dir.path(), "makemkvcon", 0o755);
        cfg.handbrake.binary_path = write_file(dir.path(), "HandBrakeCLI", 0o700);

        assert!(run_startup_checks(&cfg).is_ok());
    }
}
