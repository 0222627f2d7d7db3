use crate::error::Result;
use crate::vars::Vars;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Desired state / small value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    /// Exact version pin (`apt-get install name=version`). `None` accepts any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageSpec {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// `name` or `name=version`, as apt takes it.
    pub fn apt_arg(&self) -> String {
        match &self.version {
            Some(v) => format!("{}={}", self.name, v),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SudoScope {
    None,
    All {
        #[serde(default)]
        nopasswd: bool,
    },
    Commands {
        commands: Vec<String>,
        #[serde(default)]
        nopasswd: bool,
    },
}

impl SudoScope {
    /// The sudoers line for `user`, or `None` when no rule is wanted.
    pub fn sudoers_line(&self, user: &str) -> Option<String> {
        let (cmds, nopasswd) = match self {
            SudoScope::None => return None,
            SudoScope::All { nopasswd } => ("ALL".to_string(), *nopasswd),
            SudoScope::Commands { commands, nopasswd } => (commands.join(", "), *nopasswd),
        };
        let tag = if nopasswd { "NOPASSWD: " } else { "" };
        Some(format!("{user} ALL=(ALL:ALL) {tag}{cmds}"))
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One declarative operation against the target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    /// Abort unless `/etc/os-release` reports one of these `ID`s.
    AssertOs { ids: Vec<String> },
    PackageEnsure {
        packages: Vec<PackageSpec>,
        #[serde(default)]
        state: Presence,
        /// Refresh the package index before installing.
        #[serde(default)]
        update_cache: bool,
    },
    DirectoryEnsure {
        path: String,
        #[serde(default = "default_dir_mode")]
        mode: String,
    },
    FileFetch {
        url: String,
        dest: String,
        #[serde(default = "default_file_mode")]
        mode: String,
    },
    RepositoryRegister {
        /// Basename under `/etc/apt/sources.list.d/`, without `.list`.
        filename: String,
        line: String,
    },
    GroupEnsure {
        name: String,
        #[serde(default)]
        system: bool,
    },
    UserEnsure {
        name: String,
        group: String,
        #[serde(default = "default_shell")]
        shell: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password_hash: Option<String>,
        #[serde(default)]
        groups: Vec<String>,
    },
    SudoRuleEnsure {
        /// Basename under `/etc/sudoers.d/`.
        name: String,
        user: String,
        scope: SudoScope,
    },
    CommandRun { command: String },
}

fn default_dir_mode() -> String {
    "0755".to_string()
}

fn default_file_mode() -> String {
    "0644".to_string()
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::AssertOs { .. } => ActionKind::AssertOs,
            Action::PackageEnsure { .. } => ActionKind::PackageEnsure,
            Action::DirectoryEnsure { .. } => ActionKind::DirectoryEnsure,
            Action::FileFetch { .. } => ActionKind::FileFetch,
            Action::RepositoryRegister { .. } => ActionKind::RepositoryRegister,
            Action::GroupEnsure { .. } => ActionKind::GroupEnsure,
            Action::UserEnsure { .. } => ActionKind::UserEnsure,
            Action::SudoRuleEnsure { .. } => ActionKind::SudoRuleEnsure,
            Action::CommandRun { .. } => ActionKind::CommandRun,
        }
    }

    /// Short description of what the action operates on.
    pub fn target(&self) -> String {
        match self {
            Action::AssertOs { ids } => ids.join("|"),
            Action::PackageEnsure { packages, .. } => packages
                .iter()
                .map(PackageSpec::apt_arg)
                .collect::<Vec<_>>()
                .join(" "),
            Action::DirectoryEnsure { path, .. } => path.clone(),
            Action::FileFetch { dest, .. } => dest.clone(),
            Action::RepositoryRegister { filename, .. } => {
                format!("/etc/apt/sources.list.d/{filename}.list")
            }
            Action::GroupEnsure { name, .. } => name.clone(),
            Action::UserEnsure { name, .. } => name.clone(),
            Action::SudoRuleEnsure { name, .. } => format!("/etc/sudoers.d/{name}"),
            Action::CommandRun { command } => command.clone(),
        }
    }

    /// Copy of the action with every string field expanded against `vars`.
    pub fn resolve(&self, vars: &Vars) -> Result<Action> {
        let x = |s: &String| vars.expand(s);
        let xs = |v: &Vec<String>| v.iter().map(|s| vars.expand(s)).collect::<Result<Vec<_>>>();
        Ok(match self {
            Action::AssertOs { ids } => Action::AssertOs { ids: xs(ids)? },
            Action::PackageEnsure {
                packages,
                state,
                update_cache,
            } => Action::PackageEnsure {
                packages: packages
                    .iter()
                    .map(|p| {
                        Ok(PackageSpec {
                            name: x(&p.name)?,
                            version: p.version.as_ref().map(x).transpose()?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                state: *state,
                update_cache: *update_cache,
            },
            Action::DirectoryEnsure { path, mode } => Action::DirectoryEnsure {
                path: x(path)?,
                mode: mode.clone(),
            },
            Action::FileFetch { url, dest, mode } => Action::FileFetch {
                url: x(url)?,
                dest: x(dest)?,
                mode: mode.clone(),
            },
            Action::RepositoryRegister { filename, line } => Action::RepositoryRegister {
                filename: x(filename)?,
                line: x(line)?,
            },
            Action::GroupEnsure { name, system } => Action::GroupEnsure {
                name: x(name)?,
                system: *system,
            },
            Action::UserEnsure {
                name,
                group,
                shell,
                password_hash,
                groups,
            } => Action::UserEnsure {
                name: x(name)?,
                group: x(group)?,
                shell: x(shell)?,
                // hashes contain '$' sequences, never placeholders
                password_hash: password_hash.clone(),
                groups: xs(groups)?,
            },
            Action::SudoRuleEnsure { name, user, scope } => Action::SudoRuleEnsure {
                name: x(name)?,
                user: x(user)?,
                scope: scope.clone(),
            },
            Action::CommandRun { command } => Action::CommandRun {
                command: x(command)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    AssertOs,
    PackageEnsure,
    DirectoryEnsure,
    FileFetch,
    RepositoryRegister,
    GroupEnsure,
    UserEnsure,
    SudoRuleEnsure,
    CommandRun,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::AssertOs => "assert-os",
            ActionKind::PackageEnsure => "package-ensure",
            ActionKind::DirectoryEnsure => "directory-ensure",
            ActionKind::FileFetch => "file-fetch",
            ActionKind::RepositoryRegister => "repository-register",
            ActionKind::GroupEnsure => "group-ensure",
            ActionKind::UserEnsure => "user-ensure",
            ActionKind::SudoRuleEnsure => "sudo-rule-ensure",
            ActionKind::CommandRun => "command-run",
        }
    }

    pub fn is_idempotent(self) -> bool {
        self != ActionKind::CommandRun
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(flatten)]
    pub action: Action,
    /// Run with privilege escalation on the host.
    #[serde(default = "default_become", rename = "become")]
    pub escalate: bool,
}

fn default_become() -> bool {
    true
}

impl Step {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
            escalate: true,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_yaml_is_kind_tagged() {
        let step = Step::new(
            "Create docker group",
            Action::GroupEnsure {
                name: "docker".into(),
                system: true,
            },
        );
        let yaml = serde_yaml::to_string(&step).unwrap();
        assert!(yaml.contains("kind: group-ensure"));
        assert!(yaml.contains("become: true"));
        let parsed: Step = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn step_defaults_apply() {
        let yaml = "name: keyrings\nkind: directory-ensure\npath: /etc/apt/keyrings\n";
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert!(step.escalate);
        assert_eq!(
            step.action,
            Action::DirectoryEnsure {
                path: "/etc/apt/keyrings".into(),
                mode: "0755".into()
            }
        );
    }

    #[test]
    fn sudoers_line_forms() {
        assert_eq!(SudoScope::None.sudoers_line("devops"), None);
        assert_eq!(
            SudoScope::All { nopasswd: true }.sudoers_line("devops").unwrap(),
            "devops ALL=(ALL:ALL) NOPASSWD: ALL"
        );
        let scope = SudoScope::Commands {
            commands: vec!["/usr/bin/docker".into(), "/usr/bin/systemctl".into()],
            nopasswd: false,
        };
        assert_eq!(
            scope.sudoers_line("devops").unwrap(),
            "devops ALL=(ALL:ALL) /usr/bin/docker, /usr/bin/systemctl"
        );
    }

    #[test]
    fn resolve_expands_repository_line() {
        let vars = Vars::new().with("arch", "arm64").with("codename", "bookworm");
        let action = Action::RepositoryRegister {
            filename: "docker".into(),
            line: "deb [arch={{ arch }}] https://download.docker.com/linux/debian {{ codename }} stable".into(),
        };
        match action.resolve(&vars).unwrap() {
            Action::RepositoryRegister { line, .. } => {
                assert_eq!(line, "deb [arch=arm64] https://download.docker.com/linux/debian bookworm stable")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn only_command_run_is_not_idempotent() {
        assert!(!ActionKind::CommandRun.is_idempotent());
        assert!(ActionKind::UserEnsure.is_idempotent());
    }
}
