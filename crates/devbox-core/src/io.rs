use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents a half-written Vagrantfile or playbook if the process dies.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write a file only if it does not already exist. Returns true if written.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

/// Write a file unless its current content already equals `data`.
/// Returns true if the file changed.
pub fn write_if_changed(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() && std::fs::read(path)? == data {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provisioning/playbook.yml");
        atomic_write(&path, b"- hosts: all").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "- hosts: all");
    }

    #[test]
    fn write_if_missing_skips_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Vagrantfile");
        std::fs::write(&path, b"original").unwrap();
        let written = write_if_missing(&path, b"new").unwrap();
        assert!(!written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn write_if_changed_reports_no_change_on_same_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doit.yaml");
        assert!(write_if_changed(&path, b"version: 1\n").unwrap());
        assert!(!write_if_changed(&path, b"version: 1\n").unwrap());
        assert!(write_if_changed(&path, b"version: 2\n").unwrap());
    }
}
