use crate::error::{DevboxError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "doit.yaml";
pub const VAGRANTFILE: &str = "Vagrantfile";
pub const PROVISIONING_DIR: &str = "provisioning";
pub const PLAYBOOK_FILE: &str = "provisioning/playbook.yml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn vagrantfile_path(root: &Path) -> PathBuf {
    root.join(VAGRANTFILE)
}

pub fn playbook_path(root: &Path) -> PathBuf {
    root.join(PLAYBOOK_FILE)
}

/// Playbook path as written into the Vagrantfile, relative to its directory.
pub fn playbook_relative() -> &'static str {
    PLAYBOOK_FILE
}

// ---------------------------------------------------------------------------
// Account name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]*\$?$").unwrap())
}

/// Validate a POSIX user or group name (lowercase, max 32 chars).
pub fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 32 || !name_re().is_match(name) {
        return Err(DevboxError::InvalidConfig(format!(
            "invalid user or group name '{name}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["devops", "_svc", "docker", "build-agent", "a1"] {
            validate_account_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_names() {
        let too_long = "x".repeat(33);
        for name in ["", "1abc", "Dev", "has space", too_long.as_str()] {
            assert!(validate_account_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(config_path(root), PathBuf::from("/tmp/proj/doit.yaml"));
        assert_eq!(vagrantfile_path(root), PathBuf::from("/tmp/proj/Vagrantfile"));
        assert_eq!(
            playbook_path(root),
            PathBuf::from("/tmp/proj/provisioning/playbook.yml")
        );
    }
}
