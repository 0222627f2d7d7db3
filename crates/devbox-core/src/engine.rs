//! Sequential, fail-fast step engine.
//!
//! Each step probes the host first and only mutates when the desired state
//! does not already hold, so a second run over a provisioned host reports no
//! changes. The first failing step stops the run; later steps are reported
//! as skipped and nothing is rolled back.

use crate::error::{DevboxError, Result};
use crate::host::{Host, PathKind, UserChange};
use crate::sequence::Sequence;
use crate::step::{Action, ActionKind, PackageSpec, Presence, Step, SudoScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Mode / status types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Probe only; report what would change.
    DryRun,
    #[default]
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Changed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Ok => "ok",
            StepStatus::Changed => "changed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Precondition,
    Download,
    Package,
    Command,
    SudoRule,
    Config,
    Transport,
}

impl FailureKind {
    pub fn of(err: &DevboxError) -> Self {
        match err {
            DevboxError::Precondition { .. } => FailureKind::Precondition,
            DevboxError::Download { .. } => FailureKind::Download,
            DevboxError::Package(_) => FailureKind::Package,
            DevboxError::CommandFailed { .. } => FailureKind::Command,
            DevboxError::InvalidSudoRule(_) => FailureKind::SudoRule,
            DevboxError::InvalidConfig(_)
            | DevboxError::InvalidSequence(_)
            | DevboxError::UndefinedVariable(_) => FailureKind::Config,
            _ => FailureKind::Transport,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub kind: ActionKind,
    pub target: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub step: String,
    pub index: usize,
    pub kind: FailureKind,
    pub message: String,
    /// Exit code of a failed verification command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: ApplyMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn changed(&self) -> usize {
        self.count(StepStatus::Changed)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Outcome {
    status: StepStatus,
    detail: Option<String>,
}

impl Outcome {
    fn ok() -> Self {
        Self {
            status: StepStatus::Ok,
            detail: None,
        }
    }

    fn changed(detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Changed,
            detail: Some(detail.into()),
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Engine {
    pub mode: ApplyMode,
}

impl Engine {
    pub fn new(mode: ApplyMode) -> Self {
        Self { mode }
    }

    fn dry(&self) -> bool {
        self.mode == ApplyMode::DryRun
    }

    /// Run an already-resolved sequence top to bottom.
    pub fn run(&self, host: &mut dyn Host, sequence: &Sequence) -> RunReport {
        let started_at = Utc::now();
        let mut steps = Vec::with_capacity(sequence.len());
        let mut failure = None;

        for (index, step) in sequence.steps.iter().enumerate() {
            let kind = step.kind();
            let target = step.action.target();

            if failure.is_some() {
                steps.push(StepReport {
                    name: step.name.clone(),
                    kind,
                    target,
                    status: StepStatus::Skipped,
                    detail: None,
                    duration_ms: 0,
                });
                continue;
            }

            let t0 = Instant::now();
            let result = self.apply_step(host, step);
            let duration_ms = t0.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) => {
                    info!(step = %step.name, status = outcome.status.as_str(), "step finished");
                    steps.push(StepReport {
                        name: step.name.clone(),
                        kind,
                        target,
                        status: outcome.status,
                        detail: outcome.detail,
                        duration_ms,
                    });
                }
                Err(err) => {
                    warn!(step = %step.name, error = %err, "step failed, aborting run");
                    let exit_code = match &err {
                        DevboxError::CommandFailed { code, .. } => Some(*code),
                        _ => None,
                    };
                    let detail = match &err {
                        DevboxError::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => {
                            Some(stderr.trim().to_string())
                        }
                        _ => None,
                    };
                    failure = Some(Failure {
                        step: step.name.clone(),
                        index,
                        kind: FailureKind::of(&err),
                        message: err.to_string(),
                        exit_code,
                    });
                    steps.push(StepReport {
                        name: step.name.clone(),
                        kind,
                        target,
                        status: StepStatus::Failed,
                        detail,
                        duration_ms,
                    });
                }
            }
        }

        RunReport {
            mode: self.mode,
            started_at,
            finished_at: Utc::now(),
            steps,
            failure,
        }
    }

    fn apply_step(&self, host: &mut dyn Host, step: &Step) -> Result<Outcome> {
        let esc = step.escalate;
        if self.dry() && !step.kind().is_idempotent() {
            return Ok(Outcome {
                status: StepStatus::Skipped,
                detail: Some("not run in check mode".into()),
            });
        }
        match &step.action {
            Action::AssertOs { ids } => {
                let os = host.os_release()?;
                if !os.matches_any(ids) {
                    return Err(DevboxError::Precondition {
                        expected: ids.join("|"),
                        found: os.describe(),
                    });
                }
                Ok(Outcome::ok().with_detail(os.describe()))
            }
            Action::PackageEnsure {
                packages,
                state,
                update_cache,
            } => self.ensure_packages(host, packages, *state, *update_cache, esc),
            Action::DirectoryEnsure { path, mode } => self.ensure_directory(host, path, mode, esc),
            Action::FileFetch { url, dest, mode } => {
                match host.path_state(dest)? {
                    Some(s) if s.kind == PathKind::File => {
                        if same_mode(&s.mode, mode) {
                            return Ok(Outcome::ok());
                        }
                        if !self.dry() {
                            host.set_mode(dest, mode, esc)?;
                        }
                        Ok(Outcome::changed(format!("mode {} -> {mode}", s.mode)))
                    }
                    Some(_) => Err(DevboxError::Transport(format!(
                        "{dest} exists and is not a regular file"
                    ))),
                    None => {
                        if !self.dry() {
                            host.download(url, dest, mode, esc)?;
                        }
                        Ok(Outcome::changed(format!("fetched {url}")))
                    }
                }
            }
            Action::RepositoryRegister { filename, line } => {
                let path = format!("/etc/apt/sources.list.d/{filename}.list");
                let desired = format!("{line}\n");
                if host.read_file(&path, esc)?.as_deref() == Some(desired.as_str()) {
                    return Ok(Outcome::ok());
                }
                if !self.dry() {
                    host.write_file(&path, &desired, "0644", esc)?;
                    host.refresh_package_index(esc)?;
                }
                Ok(Outcome::changed(format!("registered {path}")))
            }
            Action::GroupEnsure { name, system } => {
                if host.group_exists(name)? {
                    return Ok(Outcome::ok());
                }
                if !self.dry() {
                    host.create_group(name, *system, esc)?;
                }
                Ok(Outcome::changed(format!("created group {name}")))
            }
            Action::UserEnsure {
                name,
                group,
                shell,
                password_hash,
                groups,
            } => self.ensure_user(host, name, group, shell, password_hash.as_deref(), groups, esc),
            Action::SudoRuleEnsure { name, user, scope } => {
                self.ensure_sudo_rule(host, name, user, scope, esc)
            }
            Action::CommandRun { command } => {
                let out = host.run(command, esc)?;
                if !out.success() {
                    return Err(DevboxError::CommandFailed {
                        command: command.clone(),
                        code: out.code,
                        stderr: out.stderr,
                    });
                }
                let last = out.stdout.trim().lines().last().unwrap_or("").to_string();
                Ok(Outcome::ok().with_detail(format!("exit 0 {last}").trim_end().to_string()))
            }
        }
    }

    fn ensure_packages(
        &self,
        host: &mut dyn Host,
        packages: &[PackageSpec],
        state: Presence,
        update_cache: bool,
        esc: bool,
    ) -> Result<Outcome> {
        match state {
            Presence::Present => {
                let mut missing = Vec::new();
                for p in packages {
                    let installed = host.package_version(&p.name)?;
                    let satisfied = match (&installed, &p.version) {
                        (None, _) => false,
                        (Some(_), None) => true,
                        (Some(have), Some(want)) => have == want,
                    };
                    if !satisfied {
                        missing.push(p.clone());
                    }
                }
                if missing.is_empty() {
                    return Ok(Outcome::ok());
                }
                if !self.dry() {
                    if update_cache {
                        host.refresh_package_index(esc)?;
                    }
                    host.install_packages(&missing, esc)?;
                }
                let names: Vec<String> = missing.iter().map(PackageSpec::apt_arg).collect();
                Ok(Outcome::changed(format!("installed {}", names.join(" "))))
            }
            Presence::Absent => {
                let mut present = Vec::new();
                for p in packages {
                    if host.package_version(&p.name)?.is_some() {
                        present.push(p.name.clone());
                    }
                }
                if present.is_empty() {
                    return Ok(Outcome::ok());
                }
                if !self.dry() {
                    host.remove_packages(&present, esc)?;
                }
                Ok(Outcome::changed(format!("removed {}", present.join(" "))))
            }
        }
    }

    fn ensure_directory(
        &self,
        host: &mut dyn Host,
        path: &str,
        mode: &str,
        esc: bool,
    ) -> Result<Outcome> {
        match host.path_state(path)? {
            None => {
                if !self.dry() {
                    host.create_directory(path, mode, esc)?;
                }
                Ok(Outcome::changed(format!("created {path}")))
            }
            Some(s) if s.kind != PathKind::Directory => Err(DevboxError::Transport(format!(
                "{path} exists and is not a directory"
            ))),
            Some(s) if !same_mode(&s.mode, mode) => {
                if !self.dry() {
                    host.set_mode(path, mode, esc)?;
                }
                Ok(Outcome::changed(format!("mode {} -> {mode}", s.mode)))
            }
            Some(_) => Ok(Outcome::ok()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ensure_user(
        &self,
        host: &mut dyn Host,
        name: &str,
        group: &str,
        shell: &str,
        password_hash: Option<&str>,
        groups: &[String],
        esc: bool,
    ) -> Result<Outcome> {
        match host.user(name)? {
            None => {
                if !self.dry() {
                    host.create_user(
                        &UserChange {
                            name: name.to_string(),
                            group: group.to_string(),
                            shell: shell.to_string(),
                            password_hash: password_hash.map(str::to_string),
                            add_groups: groups.to_vec(),
                        },
                        esc,
                    )?;
                }
                Ok(Outcome::changed(format!("created user {name}")))
            }
            Some(existing) => {
                let missing: Vec<String> = groups
                    .iter()
                    .filter(|g| **g != existing.primary_group && !existing.groups.contains(*g))
                    .cloned()
                    .collect();
                if existing.primary_group == group && existing.shell == shell && missing.is_empty()
                {
                    return Ok(Outcome::ok());
                }
                if !self.dry() {
                    // password is only set on creation
                    host.modify_user(
                        &UserChange {
                            name: name.to_string(),
                            group: group.to_string(),
                            shell: shell.to_string(),
                            password_hash: None,
                            add_groups: missing.clone(),
                        },
                        esc,
                    )?;
                }
                let mut what = Vec::new();
                if existing.primary_group != group {
                    what.push(format!("group {}", group));
                }
                if existing.shell != shell {
                    what.push(format!("shell {}", shell));
                }
                if !missing.is_empty() {
                    what.push(format!("groups +{}", missing.join(",")));
                }
                Ok(Outcome::changed(format!("updated user {name}: {}", what.join(", "))))
            }
        }
    }

    fn ensure_sudo_rule(
        &self,
        host: &mut dyn Host,
        name: &str,
        user: &str,
        scope: &SudoScope,
        esc: bool,
    ) -> Result<Outcome> {
        let Some(line) = scope.sudoers_line(user) else {
            return Ok(Outcome::ok().with_detail("no sudo scope"));
        };
        let path = format!("/etc/sudoers.d/{name}");
        let desired = format!("{line}\n");
        if host.read_file(&path, esc)?.as_deref() == Some(desired.as_str()) {
            return Ok(Outcome::ok());
        }
        if !host.sudoers_valid(&desired)? {
            return Err(DevboxError::InvalidSudoRule(user.to_string()));
        }
        if !self.dry() {
            host.write_file(&path, &desired, "0440", esc)?;
        }
        Ok(Outcome::changed(format!("wrote {path}")))
    }
}

fn same_mode(have: &str, want: &str) -> bool {
    crate::host::normalize_mode(have) == crate::host::normalize_mode(want)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
