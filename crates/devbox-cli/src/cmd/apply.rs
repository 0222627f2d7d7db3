use crate::output::{print_json, print_report};
use anyhow::Context;
use clap::{Args, ValueEnum};
use devbox_core::config::{Config, WarnLevel};
use devbox_core::engine::{ApplyMode, Engine, RunReport};
use devbox_core::host::{LocalTransport, ShellHost, Transport, VagrantTransport};
use devbox_core::sequence::Sequence;
use std::path::{Path, PathBuf};

/// Command-line overrides for values normally taken from doit.yaml.
#[derive(Args, Debug, Default)]
pub struct VarOverrides {
    /// Package architecture for the runtime repository (e.g. amd64, arm64)
    #[arg(long)]
    pub arch: Option<String>,

    /// Distribution codename for the runtime repository (e.g. bookworm)
    #[arg(long)]
    pub codename: Option<String>,

    /// Pin the container runtime to this package version
    #[arg(long = "runtime-version")]
    pub runtime_version: Option<String>,
}

impl VarOverrides {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(arch) = &self.arch {
            config.vars.set("arch", arch.clone());
        }
        if let Some(codename) = &self.codename {
            config.vars.set("codename", codename.clone());
        }
        if let Some(version) = &self.runtime_version {
            config.runtime.version = Some(version.clone());
            config.vars.set("runtime_version", version.clone());
        }
        config
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// Run step commands inside the machine over `vagrant ssh`
    Vagrant,
    /// Run step commands on this host
    Local,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Probe the host and report what would change without changing it
    #[arg(long)]
    pub check: bool,

    /// Where the steps run
    #[arg(long, value_enum, default_value_t = TransportArg::Vagrant)]
    pub transport: TransportArg,

    /// Directory holding the Vagrantfile (default: project root)
    #[arg(long = "vagrantfile-path", short = 'f', value_name = "DIR")]
    pub vagrantfile_path: Option<PathBuf>,

    /// Machine name in a multi-machine Vagrantfile
    #[arg(long)]
    pub machine: Option<String>,

    /// crypt(3) hash for the service account, overriding doit.yaml
    #[arg(long, env = "DOIT_PASSWORD_HASH", hide_env_values = true)]
    pub password_hash: Option<String>,

    #[command(flatten)]
    pub overrides: VarOverrides,
}

fn execute<T: Transport>(transport: T, sequence: &Sequence, mode: ApplyMode) -> RunReport {
    let mut host = ShellHost::new(transport);
    tracing::info!(
        steps = sequence.len(),
        target = %host.transport().describe(),
        ?mode,
        "applying"
    );
    Engine::new(mode).run(&mut host, sequence)
}

pub fn run(root: &Path, args: ApplyArgs, json: bool) -> anyhow::Result<()> {
    let mut config = args
        .overrides
        .apply(Config::load(root).context("failed to load config")?);
    if let Some(hash) = args.password_hash {
        config.account.password_hash = Some(hash);
    }

    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("doit.yaml has errors:\n  {}", errors.join("\n  "));
    }

    let sequence = config
        .sequence()
        .resolve(&config.vars())
        .context("sequence does not resolve")?;

    let mode = if args.check {
        ApplyMode::DryRun
    } else {
        ApplyMode::Commit
    };

    let report = match args.transport {
        TransportArg::Local => execute(LocalTransport, &sequence, mode),
        TransportArg::Vagrant => {
            let dir = args.vagrantfile_path.unwrap_or_else(|| root.to_path_buf());
            let transport = VagrantTransport::new(dir)?.with_machine(args.machine);
            execute(transport, &sequence, mode)
        }
    };

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if let Some(failure) = &report.failure {
        anyhow::bail!(
            "step {} '{}' failed: {}",
            failure.index + 1,
            failure.step,
            failure.message
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_version_flag_beats_config_vars() {
        let mut config = Config::default();
        config.vars.set("runtime_version", "5:24.0.0");
        let overrides = VarOverrides {
            runtime_version: Some("5:26.1.3".into()),
            ..VarOverrides::default()
        };
        let config = overrides.apply(config);
        assert_eq!(config.vars().get("runtime_version"), Some("5:26.1.3"));

        let sequence = config.sequence().resolve(&config.vars()).unwrap();
        let pins: Vec<String> = sequence
            .steps
            .iter()
            .filter_map(|s| match &s.action {
                devbox_core::step::Action::PackageEnsure { packages, .. } => Some(packages.clone()),
                _ => None,
            })
            .flatten()
            .filter(|p| p.version.is_some())
            .map(|p| p.apt_arg())
            .collect();
        assert_eq!(pins, vec!["docker-ce=5:26.1.3", "docker-ce-cli=5:26.1.3"]);
    }

    #[test]
    fn arch_and_codename_flags_set_vars() {
        let overrides = VarOverrides {
            arch: Some("arm64".into()),
            codename: Some("trixie".into()),
            ..VarOverrides::default()
        };
        let vars = overrides.apply(Config::default()).vars();
        assert_eq!(vars.get("arch"), Some("arm64"));
        assert_eq!(vars.get("codename"), Some("trixie"));
    }
}
