use anyhow::Context;
use clap::Args;
use devbox_core::config::Config;
use devbox_core::machine::ImageRef;
use devbox_core::paths;
use devbox_core::DevboxError;
use devbox_core::tools::{check_provider, ToolInvocation, VagrantCommand};
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct VagrantArgs {
    /// Directory holding the Vagrantfile (default: project root)
    #[arg(long = "vagrantfile-path", short = 'f', value_name = "DIR")]
    pub vagrantfile_path: Option<PathBuf>,
}

impl VagrantArgs {
    pub fn dir(&self, root: &Path) -> PathBuf {
        self.vagrantfile_path
            .clone()
            .unwrap_or_else(|| root.to_path_buf())
    }
}

#[derive(Args, Debug)]
pub struct PlaybookArgs {
    /// Path to the playbook (default: <root>/provisioning/playbook.yml)
    #[arg(long = "playbook-path", short = 'p', value_name = "FILE")]
    pub playbook_path: Option<PathBuf>,
}

impl PlaybookArgs {
    pub fn path(&self, root: &Path) -> PathBuf {
        self.playbook_path
            .clone()
            .unwrap_or_else(|| paths::playbook_path(root))
    }
}

/// doit.yaml, when the project has one. A file that exists but does not
/// load is an error.
fn configured(root: &Path) -> anyhow::Result<Option<Config>> {
    match Config::load(root) {
        Ok(config) => Ok(Some(config)),
        Err(DevboxError::NotInitialized) => Ok(None),
        Err(e) => Err(e).context("failed to load config"),
    }
}

fn image_of(config: Option<&Config>) -> Option<&ImageRef> {
    config.map(|c| &c.machine.image)
}

pub fn validate_vagrant(root: &Path, vagrant: &VagrantArgs) -> anyhow::Result<()> {
    let dir = vagrant.dir(root);
    ToolInvocation::vagrant(VagrantCommand::Validate, &dir)
        .run(None)
        .with_context(|| format!("Vagrantfile in {} is not valid", dir.display()))
}

pub fn validate_playbook(root: &Path, playbook: &PlaybookArgs) -> anyhow::Result<()> {
    let path = playbook.path(root);
    if !path.exists() {
        anyhow::bail!(
            "playbook not found: {}\nRun: doit render",
            path.display()
        );
    }
    ToolInvocation::ansible_lint(&path)
        .run(None)
        .with_context(|| format!("playbook {} failed linting", path.display()))
}

pub fn validate(root: &Path, vagrant: &VagrantArgs, playbook: &PlaybookArgs) -> anyhow::Result<()> {
    validate_vagrant(root, vagrant)?;
    validate_playbook(root, playbook)
}

pub fn setup(root: &Path, vagrant: &VagrantArgs, playbook: &PlaybookArgs) -> anyhow::Result<()> {
    let config = configured(root)?;
    validate(root, vagrant, playbook)?;
    if let Some(cfg) = &config {
        cfg.machine.validate().context("invalid machine definition")?;
        check_provider(cfg.machine.provider.kind)?;
    }
    ToolInvocation::vagrant(VagrantCommand::Up, &vagrant.dir(root))
        .run(image_of(config.as_ref()))
        .context("failed to bring the machine up")
}

pub fn reprovision(
    root: &Path,
    vagrant: &VagrantArgs,
    playbook: &PlaybookArgs,
) -> anyhow::Result<()> {
    let config = configured(root)?;
    validate(root, vagrant, playbook)?;
    ToolInvocation::vagrant(VagrantCommand::Provision, &vagrant.dir(root))
        .run(image_of(config.as_ref()))
        .context("provisioning failed")
}

/// Commands that need nothing but the Vagrantfile directory.
pub fn simple(root: &Path, vagrant: &VagrantArgs, command: VagrantCommand) -> anyhow::Result<()> {
    ToolInvocation::vagrant(command, &vagrant.dir(root))
        .run(None)
        .with_context(|| format!("vagrant {} failed", command.as_str()))
}
