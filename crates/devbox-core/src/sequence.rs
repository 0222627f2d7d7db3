//! The ordered provisioning sequence and the standard container-runtime
//! sequence built from `doit.yaml`.

use crate::config::Config;
use crate::error::{DevboxError, Result};
use crate::step::{Action, ActionKind, PackageSpec, Presence, Step, SudoScope};
use crate::vars::Vars;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const KEYRINGS_DIR: &str = "/etc/apt/keyrings";
pub const RUNTIME_KEY_PATH: &str = "/etc/apt/keyrings/docker.asc";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    pub steps: Vec<Step>,
}

impl Sequence {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// The explicit `steps:` list from config, or the standard sequence.
    pub fn for_config(config: &Config) -> Self {
        match &config.steps {
            Some(steps) => Self::new(steps.clone()),
            None => Self::standard(config),
        }
    }

    /// Container runtime from the vendor apt repository, OS packages, and a
    /// service account, finished by a container smoke test.
    pub fn standard(config: &Config) -> Self {
        let rt = &config.runtime;
        let acct = &config.account;
        let mut steps = vec![
            Step::new(
                "Check operating system",
                Action::AssertOs {
                    ids: config.expected_os.clone(),
                },
            ),
            Step::new(
                "Install repository prerequisites",
                Action::PackageEnsure {
                    packages: rt.prerequisites.iter().map(PackageSpec::any).collect(),
                    state: Presence::Present,
                    update_cache: true,
                },
            ),
            Step::new(
                "Create apt keyrings directory",
                Action::DirectoryEnsure {
                    path: KEYRINGS_DIR.into(),
                    mode: "0755".into(),
                },
            ),
            Step::new(
                "Download container runtime signing key",
                Action::FileFetch {
                    url: "{{ repo_url }}/gpg".into(),
                    dest: RUNTIME_KEY_PATH.into(),
                    mode: "0644".into(),
                },
            ),
            Step::new(
                "Register container runtime repository",
                Action::RepositoryRegister {
                    filename: "docker".into(),
                    line: format!(
                        "deb [arch={{{{ arch }}}} signed-by={RUNTIME_KEY_PATH}] {{{{ repo_url }}}} {{{{ codename }}}} stable"
                    ),
                },
            ),
            Step::new(
                "Install container runtime",
                Action::PackageEnsure {
                    packages: rt
                        .packages
                        .iter()
                        .map(|name| {
                            if rt.version.is_some() && rt.pinned.contains(name) {
                                PackageSpec::pinned(name.clone(), "{{ runtime_version }}")
                            } else {
                                PackageSpec::any(name.clone())
                            }
                        })
                        .collect(),
                    state: Presence::Present,
                    update_cache: true,
                },
            ),
        ];

        if !config.extra_packages.is_empty() {
            steps.push(Step::new(
                "Install additional OS packages",
                Action::PackageEnsure {
                    packages: config.extra_packages.iter().map(PackageSpec::any).collect(),
                    state: Presence::Present,
                    update_cache: false,
                },
            ));
        }

        steps.push(Step::new(
            "Ensure container runtime group",
            Action::GroupEnsure {
                name: rt.group.clone(),
                system: true,
            },
        ));
        if acct.group != rt.group {
            steps.push(Step::new(
                "Ensure service account group",
                Action::GroupEnsure {
                    name: acct.group.clone(),
                    system: false,
                },
            ));
        }
        let mut extra_groups: Vec<&String> = Vec::new();
        for g in &acct.supplementary_groups {
            if *g != rt.group && *g != acct.group && !extra_groups.contains(&g) {
                extra_groups.push(g);
            }
        }
        for g in extra_groups {
            steps.push(Step::new(
                format!("Ensure group {g}"),
                Action::GroupEnsure {
                    name: g.clone(),
                    system: false,
                },
            ));
        }
        steps.push(Step::new(
            "Create service account",
            Action::UserEnsure {
                name: acct.username.clone(),
                group: acct.group.clone(),
                shell: acct.shell.clone(),
                password_hash: acct.password_hash.clone(),
                groups: acct.supplementary_groups.clone(),
            },
        ));
        if acct.sudo != SudoScope::None {
            steps.push(Step::new(
                "Grant service account sudo",
                Action::SudoRuleEnsure {
                    name: acct.username.clone(),
                    user: acct.username.clone(),
                    scope: acct.sudo.clone(),
                },
            ));
        }
        steps.push(Step::new(
            "Run container smoke test",
            Action::CommandRun {
                command: rt.smoke_test.clone(),
            },
        ));

        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Structural checks that do not need variables.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(DevboxError::InvalidSequence("sequence has no steps".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(DevboxError::InvalidSequence("step with empty name".into()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(DevboxError::InvalidSequence(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        let first_package = self
            .steps
            .iter()
            .position(|s| s.kind() == ActionKind::PackageEnsure);
        let last_assert = self
            .steps
            .iter()
            .rposition(|s| s.kind() == ActionKind::AssertOs);
        if let (Some(pkg), Some(assert)) = (first_package, last_assert) {
            if assert > pkg {
                return Err(DevboxError::InvalidSequence(format!(
                    "OS check '{}' must come before package step '{}'",
                    self.steps[assert].name, self.steps[pkg].name
                )));
            }
        }

        match self.steps.last() {
            Some(last) if last.kind() == ActionKind::CommandRun => {}
            _ => {
                return Err(DevboxError::InvalidSequence(
                    "the final step must be a verification command".into(),
                ))
            }
        }

        for step in &self.steps {
            if let Action::PackageEnsure { packages, .. } = &step.action {
                if packages.is_empty() {
                    return Err(DevboxError::InvalidSequence(format!(
                        "package step '{}' lists no packages",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate, then expand every placeholder.
    pub fn resolve(&self, vars: &Vars) -> Result<Sequence> {
        self.validate()?;
        let steps = self
            .steps
            .iter()
            .map(|s| {
                Ok(Step {
                    name: vars.expand(&s.name)?,
                    action: s.action.resolve(vars)?,
                    escalate: s.escalate,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Sequence { steps })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
