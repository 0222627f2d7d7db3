use anyhow::Context;
use clap::Args;
use devbox_core::tools::{ToolInvocation, VaultOp};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct VaultArgs {
    /// File to encrypt, decrypt, or rekey with ansible-vault
    #[arg(long = "vault-file-path", short = 'f', value_name = "FILE")]
    pub vault_file_path: PathBuf,
}

/// ansible-vault prompts for the password(s) itself.
pub fn run(args: &VaultArgs, op: VaultOp) -> anyhow::Result<()> {
    if op != VaultOp::Encrypt && !args.vault_file_path.exists() {
        anyhow::bail!("vault file not found: {}", args.vault_file_path.display());
    }
    ToolInvocation::ansible_vault(op, &args.vault_file_path)
        .run(None)
        .with_context(|| {
            format!(
                "ansible-vault {} {} failed",
                op.as_str(),
                args.vault_file_path.display()
            )
        })
}
