//! The target machine as seen by the step engine.
//!
//! [`Host`] exposes the primitive probes and mutations the engine composes
//! into idempotent steps. [`ShellHost`] implements it by running shell
//! snippets over a [`Transport`] (`vagrant ssh -c` or a local `sh -c`).

mod shell;

#[cfg(test)]
pub(crate) mod fake;

pub use shell::{LocalTransport, ShellHost, Transport, VagrantTransport};
pub(crate) use shell::normalize_mode;

use crate::error::Result;
use crate::step::PackageSpec;
use serde::{Deserialize, Serialize};

/// The fields of `/etc/os-release` the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub id: String,
    #[serde(default)]
    pub id_like: Vec<String>,
    #[serde(default)]
    pub version_codename: Option<String>,
}

impl OsRelease {
    pub fn parse(content: &str) -> Self {
        let mut out = OsRelease::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => out.id = value.to_string(),
                "ID_LIKE" => {
                    out.id_like = value.split_whitespace().map(str::to_string).collect()
                }
                "VERSION_CODENAME" if !value.is_empty() => {
                    out.version_codename = Some(value.to_string())
                }
                _ => {}
            }
        }
        out
    }

    pub fn matches_any(&self, ids: &[String]) -> bool {
        ids.iter()
            .any(|want| want.eq_ignore_ascii_case(&self.id))
    }

    /// `ubuntu (like debian) noble`, for reports and precondition errors.
    pub fn describe(&self) -> String {
        let mut out = self.id.clone();
        if !self.id_like.is_empty() {
            out.push_str(&format!(" (like {})", self.id_like.join(" ")));
        }
        if let Some(codename) = &self.version_codename {
            out.push(' ');
            out.push_str(codename);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathState {
    pub kind: PathKind,
    /// Octal permission bits, four digits (`0755`).
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub name: String,
    pub primary_group: String,
    pub shell: String,
    /// Supplementary groups, excluding the primary group.
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChange {
    pub name: String,
    pub group: String,
    pub shell: String,
    pub password_hash: Option<String>,
    /// Supplementary groups to append (never removes memberships).
    pub add_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Primitive operations on the provisioned machine.
///
/// Mutating methods take `escalate` to request root on the host.
pub trait Host {
    fn os_release(&mut self) -> Result<OsRelease>;

    /// Installed version of `name`, or `None` when not installed.
    fn package_version(&mut self, name: &str) -> Result<Option<String>>;
    fn refresh_package_index(&mut self, escalate: bool) -> Result<()>;
    fn install_packages(&mut self, packages: &[PackageSpec], escalate: bool) -> Result<()>;
    fn remove_packages(&mut self, names: &[String], escalate: bool) -> Result<()>;

    fn path_state(&mut self, path: &str) -> Result<Option<PathState>>;
    fn create_directory(&mut self, path: &str, mode: &str, escalate: bool) -> Result<()>;
    fn set_mode(&mut self, path: &str, mode: &str, escalate: bool) -> Result<()>;
    fn read_file(&mut self, path: &str, escalate: bool) -> Result<Option<String>>;
    fn write_file(&mut self, path: &str, content: &str, mode: &str, escalate: bool) -> Result<()>;
    fn download(&mut self, url: &str, dest: &str, mode: &str, escalate: bool) -> Result<()>;

    fn group_exists(&mut self, name: &str) -> Result<bool>;
    fn create_group(&mut self, name: &str, system: bool, escalate: bool) -> Result<()>;
    fn user(&mut self, name: &str) -> Result<Option<UserState>>;
    fn create_user(&mut self, change: &UserChange, escalate: bool) -> Result<()>;
    fn modify_user(&mut self, change: &UserChange, escalate: bool) -> Result<()>;

    /// Whether `content` is a syntactically valid sudoers fragment.
    fn sudoers_valid(&mut self, content: &str) -> Result<bool>;

    fn run(&mut self, command: &str, escalate: bool) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_debian_os_release() {
        let content = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION_CODENAME=bookworm
ID=debian
"#;
        let os = OsRelease::parse(content);
        assert_eq!(os.id, "debian");
        assert_eq!(os.version_codename.as_deref(), Some("bookworm"));
        assert!(os.id_like.is_empty());
    }

    #[test]
    fn parse_ubuntu_id_like() {
        let os = OsRelease::parse("ID=ubuntu\nID_LIKE=debian\nVERSION_CODENAME=noble\n");
        assert_eq!(os.id_like, vec!["debian".to_string()]);
        assert!(os.matches_any(&["Ubuntu".to_string()]));
        assert!(!os.matches_any(&["debian".to_string()]));
        assert_eq!(os.describe(), "ubuntu (like debian) noble");
    }
}
