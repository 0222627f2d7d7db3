//! In-memory [`Host`] for engine tests.

use super::{ExecOutput, Host, OsRelease, PathKind, PathState, UserChange, UserState};
use crate::error::{DevboxError, Result};
use crate::step::PackageSpec;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct FakeHost {
    pub os: OsRelease,
    pub packages: BTreeMap<String, String>,
    /// Versions the fake "repository" offers; unlisted packages install as "1.0".
    pub available: BTreeMap<String, String>,
    pub paths: BTreeMap<String, PathState>,
    pub files: BTreeMap<String, String>,
    pub groups: BTreeSet<String>,
    pub users: BTreeMap<String, UserState>,
    /// Command → exit code. Unlisted commands exit 0.
    pub command_codes: BTreeMap<String, i32>,
    pub unreachable_urls: BTreeSet<String>,
    /// Make the fake `visudo -c` reject every fragment.
    pub reject_sudoers: bool,
    /// Names of mutating calls, in order.
    pub mutations: Vec<String>,
    pub commands_run: Vec<String>,
}

impl FakeHost {
    pub fn debian() -> Self {
        Self {
            os: OsRelease {
                id: "debian".into(),
                id_like: vec![],
                version_codename: Some("bookworm".into()),
            },
            ..Self::default()
        }
    }

    pub fn with_os(id: &str) -> Self {
        Self {
            os: OsRelease {
                id: id.into(),
                ..OsRelease::default()
            },
            ..Self::default()
        }
    }

    fn record(&mut self, what: impl Into<String>) {
        self.mutations.push(what.into());
    }

    fn ensure_parent(&self, path: &str) -> Result<()> {
        let parent = match path.rsplit_once('/') {
            Some(("", _)) | None => return Ok(()),
            Some((p, _)) => p,
        };
        // only directories the test created or well-known system roots count
        let known = self
            .paths
            .get(parent)
            .map(|s| s.kind == PathKind::Directory)
            .unwrap_or(false)
            || parent.starts_with("/etc")
            || parent.starts_with("/usr");
        if known {
            Ok(())
        } else {
            Err(DevboxError::Transport(format!("no such directory: {parent}")))
        }
    }
}

impl Host for FakeHost {
    fn os_release(&mut self) -> Result<OsRelease> {
        Ok(self.os.clone())
    }

    fn package_version(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.packages.get(name).cloned())
    }

    fn refresh_package_index(&mut self, _escalate: bool) -> Result<()> {
        self.record("apt-update");
        Ok(())
    }

    fn install_packages(&mut self, packages: &[PackageSpec], _escalate: bool) -> Result<()> {
        for p in packages {
            let offered = self.available.get(&p.name).cloned();
            let version = match (&p.version, offered) {
                (Some(want), Some(have)) if *want != have => {
                    return Err(DevboxError::Package(format!(
                        "version '{want}' for '{}' was not found",
                        p.name
                    )))
                }
                (Some(want), _) => want.clone(),
                (None, Some(have)) => have,
                (None, None) => "1.0".to_string(),
            };
            self.packages.insert(p.name.clone(), version);
        }
        self.record("apt-install");
        Ok(())
    }

    fn remove_packages(&mut self, names: &[String], _escalate: bool) -> Result<()> {
        for n in names {
            self.packages.remove(n);
        }
        self.record("apt-remove");
        Ok(())
    }

    fn path_state(&mut self, path: &str) -> Result<Option<PathState>> {
        Ok(self.paths.get(path).cloned())
    }

    fn create_directory(&mut self, path: &str, mode: &str, _escalate: bool) -> Result<()> {
        self.paths.insert(
            path.to_string(),
            PathState {
                kind: PathKind::Directory,
                mode: mode.to_string(),
            },
        );
        self.record(format!("mkdir {path}"));
        Ok(())
    }

    fn set_mode(&mut self, path: &str, mode: &str, _escalate: bool) -> Result<()> {
        if let Some(state) = self.paths.get_mut(path) {
            state.mode = mode.to_string();
        }
        self.record(format!("chmod {path}"));
        Ok(())
    }

    fn read_file(&mut self, path: &str, _escalate: bool) -> Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    fn write_file(&mut self, path: &str, content: &str, mode: &str, _escalate: bool) -> Result<()> {
        self.ensure_parent(path)?;
        self.files.insert(path.to_string(), content.to_string());
        self.paths.insert(
            path.to_string(),
            PathState {
                kind: PathKind::File,
                mode: mode.to_string(),
            },
        );
        self.record(format!("write {path}"));
        Ok(())
    }

    fn download(&mut self, url: &str, dest: &str, mode: &str, escalate: bool) -> Result<()> {
        if self.unreachable_urls.contains(url) {
            return Err(DevboxError::Download {
                url: url.to_string(),
                reason: "Could not resolve host".into(),
            });
        }
        self.write_file(dest, &format!("<contents of {url}>"), mode, escalate)
    }

    fn group_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.groups.contains(name))
    }

    fn create_group(&mut self, name: &str, _system: bool, _escalate: bool) -> Result<()> {
        self.groups.insert(name.to_string());
        self.record(format!("groupadd {name}"));
        Ok(())
    }

    fn user(&mut self, name: &str) -> Result<Option<UserState>> {
        Ok(self.users.get(name).cloned())
    }

    fn create_user(&mut self, change: &UserChange, _escalate: bool) -> Result<()> {
        if !self.groups.contains(&change.group) {
            return Err(DevboxError::Transport(format!(
                "useradd: group '{}' does not exist",
                change.group
            )));
        }
        for g in &change.add_groups {
            if !self.groups.contains(g) {
                return Err(DevboxError::Transport(format!("useradd: group '{g}' does not exist")));
            }
        }
        self.users.insert(
            change.name.clone(),
            UserState {
                name: change.name.clone(),
                primary_group: change.group.clone(),
                shell: change.shell.clone(),
                groups: change.add_groups.clone(),
            },
        );
        self.record(format!("useradd {}", change.name));
        Ok(())
    }

    fn modify_user(&mut self, change: &UserChange, _escalate: bool) -> Result<()> {
        let user = self
            .users
            .get_mut(&change.name)
            .ok_or_else(|| DevboxError::Transport(format!("usermod: no user {}", change.name)))?;
        user.primary_group = change.group.clone();
        user.shell = change.shell.clone();
        for g in &change.add_groups {
            if !user.groups.contains(g) {
                user.groups.push(g.clone());
            }
        }
        self.record(format!("usermod {}", change.name));
        Ok(())
    }

    fn sudoers_valid(&mut self, content: &str) -> Result<bool> {
        Ok(!self.reject_sudoers && content.contains("ALL="))
    }

    fn run(&mut self, command: &str, _escalate: bool) -> Result<ExecOutput> {
        self.commands_run.push(command.to_string());
        let code = self.command_codes.get(command).copied().unwrap_or(0);
        Ok(ExecOutput {
            code,
            stdout: if code == 0 { "Hello from Docker!\n".into() } else { String::new() },
            stderr: if code == 0 { String::new() } else { "permission denied".into() },
        })
    }
}
