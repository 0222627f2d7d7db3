use crate::error::{DevboxError, Result};
use crate::machine::{ImageRef, MachineDefinition, ProviderSettings};
use crate::paths;
use crate::sequence::Sequence;
use crate::step::SudoScope;
use crate::vars::Vars;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Package version to pin the `pinned` packages to. `None` installs the
    /// repository's current version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "default_runtime_packages")]
    pub packages: Vec<String>,
    #[serde(default = "default_pinned")]
    pub pinned: Vec<String>,
    #[serde(default = "default_prerequisites")]
    pub prerequisites: Vec<String>,
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    /// Group that grants access to the runtime socket.
    #[serde(default = "default_runtime_group")]
    pub group: String,
    #[serde(default = "default_smoke_test")]
    pub smoke_test: String,
}

fn default_runtime_packages() -> Vec<String> {
    [
        "docker-ce",
        "docker-ce-cli",
        "containerd.io",
        "docker-buildx-plugin",
        "docker-compose-plugin",
    ]
    .map(String::from)
    .to_vec()
}

fn default_pinned() -> Vec<String> {
    vec!["docker-ce".to_string(), "docker-ce-cli".to_string()]
}

fn default_prerequisites() -> Vec<String> {
    ["ca-certificates", "curl", "gnupg"].map(String::from).to_vec()
}

fn default_repo_url() -> String {
    "https://download.docker.com/linux/debian".to_string()
}

fn default_runtime_group() -> String {
    "docker".to_string()
}

fn default_smoke_test() -> String {
    "docker run --rm hello-world".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: None,
            packages: default_runtime_packages(),
            pinned: default_pinned(),
            prerequisites: default_prerequisites(),
            repo_url: default_repo_url(),
            group: default_runtime_group(),
            smoke_test: default_smoke_test(),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    /// Primary group; defaults to the username.
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// crypt(3) hash; overridden by `DOIT_PASSWORD_HASH` at apply time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default = "default_supplementary")]
    pub supplementary_groups: Vec<String>,
    #[serde(default = "default_sudo")]
    pub sudo: SudoScope,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_supplementary() -> Vec<String> {
    vec![default_runtime_group()]
}

fn default_sudo() -> SudoScope {
    SudoScope::All { nopasswd: true }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            username: "devops".to_string(),
            group: "devops".to_string(),
            shell: default_shell(),
            password_hash: None,
            supplementary_groups: default_supplementary(),
            sudo: default_sudo(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub machine: MachineDefinition,
    #[serde(default = "default_expected_os")]
    pub expected_os: Vec<String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub account: AccountConfig,
    /// Substitution variables; `arch` and `codename` are required.
    #[serde(default = "default_vars")]
    pub vars: Vars,
    /// Replaces the standard sequence when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<crate::step::Step>>,
}

fn default_version() -> u32 {
    1
}

fn default_expected_os() -> Vec<String> {
    vec!["debian".to_string()]
}

fn default_vars() -> Vars {
    Vars::new().with("arch", "amd64").with("codename", "bookworm")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            machine: MachineDefinition {
                image: ImageRef::new("debian/bookworm64", "12.20240503.1"),
                provider: ProviderSettings::new("devbox"),
            },
            expected_os: default_expected_os(),
            runtime: RuntimeConfig::default(),
            extra_packages: ["git", "vim", "htop"].map(String::from).to_vec(),
            account: AccountConfig::default(),
            vars: default_vars(),
            steps: None,
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(DevboxError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        if cfg.account.group.is_empty() {
            cfg.account.group = cfg.account.username.clone();
        }
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// User vars plus the values derived from the rest of the config.
    /// Explicit entries in `vars:` win.
    pub fn vars(&self) -> Vars {
        let mut derived = Vars::new()
            .with("repo_url", self.runtime.repo_url.clone())
            .with("runtime_group", self.runtime.group.clone())
            .with("username", self.account.username.clone())
            .with("box", self.machine.image.name.clone())
            .with("box_version", self.machine.image.version.clone());
        if let Some(v) = &self.runtime.version {
            derived.set("runtime_version", v.clone());
        }
        derived.merged(&self.vars)
    }

    pub fn sequence(&self) -> Sequence {
        Sequence::for_config(self)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning::error(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        if let Err(e) = self.machine.validate() {
            warnings.push(ConfigWarning::error(e.to_string()));
        }

        for key in ["arch", "codename"] {
            if self.vars.get(key).is_none() {
                warnings.push(ConfigWarning::error(format!("vars.{key} is not set")));
            }
        }

        if self.expected_os.is_empty() {
            warnings.push(ConfigWarning::warning(
                "expected_os is empty: the OS check will reject every host",
            ));
        }

        let mut names: Vec<&String> = Vec::new();
        for name in std::iter::once(&self.account.username)
            .chain(std::iter::once(&self.account.group))
            .chain(self.account.supplementary_groups.iter())
            .chain(std::iter::once(&self.runtime.group))
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in names {
            if let Err(e) = paths::validate_account_name(name) {
                warnings.push(ConfigWarning::error(e.to_string()));
            }
        }

        if !self
            .account
            .supplementary_groups
            .contains(&self.runtime.group)
        {
            warnings.push(ConfigWarning::warning(format!(
                "account '{}' is not in the '{}' group and cannot use the container runtime",
                self.account.username, self.runtime.group
            )));
        }

        if self.account.password_hash.is_none() {
            warnings.push(ConfigWarning::warning(
                "no password hash set: the account will be created with a locked password",
            ));
        } else if let Some(hash) = &self.account.password_hash {
            if !hash.starts_with('$') {
                warnings.push(ConfigWarning::error(
                    "account.password_hash must be a crypt(3) hash, not a plain password",
                ));
            }
        }

        if self.runtime.version.is_none() {
            warnings.push(ConfigWarning::warning(
                "runtime.version is not pinned: re-provisioning may upgrade the runtime",
            ));
        }
        for p in &self.runtime.pinned {
            if !self.runtime.packages.contains(p) {
                warnings.push(ConfigWarning::warning(format!(
                    "runtime.pinned lists '{p}' which is not in runtime.packages"
                )));
            }
        }

        // Sequence structure and placeholder coverage
        if let Err(e) = self.sequence().resolve(&self.vars()) {
            warnings.push(ConfigWarning::error(e.to_string()));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
