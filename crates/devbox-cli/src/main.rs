mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    apply::{ApplyArgs, TransportArg},
    config::ConfigSubcommand,
    vagrant::{PlaybookArgs, VagrantArgs},
    vault::VaultArgs,
};
use devbox_core::tools::{VagrantCommand, VaultOp};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "doit",
    about = "Do It: a wrapper for the Vagrant and Ansible commands of a devbox project",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from doit.yaml, Vagrantfile, or .git/)
    #[arg(long, global = true, env = "DOIT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write doit.yaml, the Vagrantfile, and the playbook (existing files are kept)
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Regenerate the Vagrantfile and playbook from doit.yaml
    Render,

    /// Show the resolved provisioning sequence
    Plan {
        #[command(flatten)]
        overrides: cmd::apply::VarOverrides,
    },

    /// Provision the machine with the built-in step engine
    Apply(ApplyArgs),

    /// Validate doit.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Create and provision a virtual machine (vagrant up)
    Setup {
        #[command(flatten)]
        vagrant: VagrantArgs,
        #[command(flatten)]
        playbook: PlaybookArgs,
    },

    /// Show the status of the virtual machine (vagrant status)
    Status {
        #[command(flatten)]
        vagrant: VagrantArgs,
    },

    /// Open an SSH connection to the virtual machine (vagrant ssh)
    Enter {
        #[command(flatten)]
        vagrant: VagrantArgs,
    },

    /// (Re)Provision an existing virtual machine (vagrant provision)
    Reprovision {
        #[command(flatten)]
        vagrant: VagrantArgs,
        #[command(flatten)]
        playbook: PlaybookArgs,
    },

    /// Destroy the running virtual machine (vagrant destroy)
    Destroy {
        #[command(flatten)]
        vagrant: VagrantArgs,
    },

    /// Validate the Vagrantfile and the Ansible playbook
    Validate {
        #[command(flatten)]
        vagrant: VagrantArgs,
        #[command(flatten)]
        playbook: PlaybookArgs,
    },

    /// Validate the Vagrantfile (vagrant validate)
    #[command(alias = "validate_vagrant")]
    ValidateVagrant {
        #[command(flatten)]
        vagrant: VagrantArgs,
    },

    /// Validate the Ansible playbook (ansible-lint)
    #[command(alias = "validate_playbook")]
    ValidatePlaybook {
        #[command(flatten)]
        playbook: PlaybookArgs,
    },

    /// Encrypt a file with Ansible Vault (ansible-vault encrypt)
    #[command(alias = "encrypt_vault")]
    EncryptVault(VaultArgs),

    /// Edit a file encrypted by Ansible Vault (ansible-vault edit)
    #[command(alias = "edit_vault")]
    EditVault(VaultArgs),

    /// Show the content of a file encrypted by Ansible Vault (ansible-vault view)
    #[command(alias = "view_vault")]
    ViewVault(VaultArgs),

    /// Change the key of a file encrypted by Ansible Vault (ansible-vault rekey)
    #[command(alias = "rekey_vault")]
    RekeyVault(VaultArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Apply(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { force } => cmd::init::run(&root, force, cli.json),
        Commands::Render => cmd::init::render(&root, cli.json),
        Commands::Plan { overrides } => cmd::plan::run(&root, &overrides, cli.json),
        Commands::Apply(args) => cmd::apply::run(&root, args, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Setup { vagrant, playbook } => {
            cmd::vagrant::setup(&root, &vagrant, &playbook)
        }
        Commands::Status { vagrant } => {
            cmd::vagrant::simple(&root, &vagrant, VagrantCommand::Status)
        }
        Commands::Enter { vagrant } => cmd::vagrant::simple(&root, &vagrant, VagrantCommand::Ssh),
        Commands::Reprovision { vagrant, playbook } => {
            cmd::vagrant::reprovision(&root, &vagrant, &playbook)
        }
        Commands::Destroy { vagrant } => {
            cmd::vagrant::simple(&root, &vagrant, VagrantCommand::Destroy)
        }
        Commands::Validate { vagrant, playbook } => {
            cmd::vagrant::validate(&root, &vagrant, &playbook)
        }
        Commands::ValidateVagrant { vagrant } => cmd::vagrant::validate_vagrant(&root, &vagrant),
        Commands::ValidatePlaybook { playbook } => {
            cmd::vagrant::validate_playbook(&root, &playbook)
        }
        Commands::EncryptVault(args) => cmd::vault::run(&args, VaultOp::Encrypt),
        Commands::EditVault(args) => cmd::vault::run(&args, VaultOp::Edit),
        Commands::ViewVault(args) => cmd::vault::run(&args, VaultOp::View),
        Commands::RekeyVault(args) => cmd::vault::run(&args, VaultOp::Rekey),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn snake_case_aliases_parse() {
        let cli = Cli::try_parse_from(["doit", "validate_vagrant", "-f", "/tmp"]).unwrap();
        assert!(matches!(cli.command, Commands::ValidateVagrant { .. }));
        let cli = Cli::try_parse_from(["doit", "rekey_vault", "-f", "vault.yml"]).unwrap();
        assert!(matches!(cli.command, Commands::RekeyVault(_)));
    }

    #[test]
    fn vault_file_is_required() {
        assert!(Cli::try_parse_from(["doit", "view-vault"]).is_err());
    }

    #[test]
    fn apply_transport_defaults_to_vagrant() {
        let cli = Cli::try_parse_from(["doit", "apply", "--check"]).unwrap();
        match cli.command {
            Commands::Apply(args) => {
                assert!(args.check);
                assert_eq!(args.transport, TransportArg::Vagrant);
            }
            _ => panic!("expected apply"),
        }
    }
}
