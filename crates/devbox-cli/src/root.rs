use devbox_core::paths::{CONFIG_FILE, VAGRANTFILE};
use std::path::{Path, PathBuf};

/// Resolve the project root directory.
///
/// Priority:
/// 1. `--root` flag / `DOIT_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `doit.yaml`
/// 3. Walk upward from `cwd` looking for a `Vagrantfile`
/// 4. Walk upward from `cwd` looking for `.git/`
/// 5. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    find_upward(&cwd, |d| d.join(CONFIG_FILE).is_file())
        .or_else(|| find_upward(&cwd, |d| d.join(VAGRANTFILE).is_file()))
        .or_else(|| find_upward(&cwd, |d| d.join(".git").is_dir()))
        .unwrap_or(cwd)
}

fn find_upward(start: &Path, found: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|d| found(d)).map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_config_above_start() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("doit.yaml"), "").unwrap();
        let nested = dir.path().join("provisioning/roles");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_upward(&nested, |d| d.join(CONFIG_FILE).is_file()).unwrap();
        assert_eq!(found, dir.path());
    }

    #[test]
    fn vagrantfile_marks_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Vagrantfile"), "").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_upward(&nested, |d| d.join(VAGRANTFILE).is_file()).unwrap();
        assert_eq!(found, dir.path());
    }
}
