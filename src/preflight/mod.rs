//! Preflight checks for host tools.
//!
//! The symbol stage shells out to `nm` and a demangler. Checking for them
//! up front turns a late "failed to start" into one message that names
//! every missing tool and the package that provides it.
//!
//! # Example
//!
//! ```rust
//! use rfs_builder::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("c++filt") {
//!     println!("binutils not installed");
//! }
//!
//! let tools = &[("nm", "binutils"), ("c++filt", "binutils")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

/// Check if a command exists on the host system.
///
/// Absolute or relative paths are checked directly; bare names are looked
/// up in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name).
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(command_exists("/bin/sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "dash"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_lists_every_missing_tool() {
        let tools = &[
            ("nonexistent_nm_xyz", "fake-binutils"),
            ("cat", "coreutils"),
            ("nonexistent_filt_xyz", "fake-binutils"),
        ];
        let msg = check_required_tools(tools).unwrap_err().to_string();
        assert!(msg.contains("nonexistent_nm_xyz (install: fake-binutils)"));
        assert!(msg.contains("nonexistent_filt_xyz"));
        assert!(!msg.contains("cat"));
    }
}
