//! Invocation of the external Vagrant and Ansible command-line tools.
//!
//! Every wrapped command runs in the foreground with the terminal attached
//! (`vagrant ssh` and `ansible-vault edit` are interactive), is waited on,
//! and turns a non-zero exit into [`DevboxError::ToolFailed`].

use crate::error::{DevboxError, Result};
use crate::machine::{classify_vagrant_failure, ImageRef, ProviderKind};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VagrantCommand {
    Up,
    Status,
    Ssh,
    Provision,
    Destroy,
    Validate,
}

impl VagrantCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            VagrantCommand::Up => "up",
            VagrantCommand::Status => "status",
            VagrantCommand::Ssh => "ssh",
            VagrantCommand::Provision => "provision",
            VagrantCommand::Destroy => "destroy",
            VagrantCommand::Validate => "validate",
        }
    }

    /// Commands whose failures can mean a missing box or provider.
    fn boots_machine(self) -> bool {
        matches!(self, VagrantCommand::Up | VagrantCommand::Provision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultOp {
    Encrypt,
    Edit,
    View,
    Rekey,
}

impl VaultOp {
    pub fn as_str(self) -> &'static str {
        match self {
            VaultOp::Encrypt => "encrypt",
            VaultOp::Edit => "edit",
            VaultOp::View => "view",
            VaultOp::Rekey => "rekey",
        }
    }
}

/// A fully-formed external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Capture stderr to classify machine failures.
    classify: bool,
}

impl ToolInvocation {
    /// `vagrant <cmd>`, run where the Vagrantfile is.
    pub fn vagrant(cmd: VagrantCommand, vagrantfile_dir: &Path) -> Self {
        Self {
            program: "vagrant".into(),
            args: vec![cmd.as_str().into()],
            workdir: Some(vagrantfile_dir.to_path_buf()),
            classify: cmd.boots_machine(),
        }
    }

    pub fn ansible_lint(playbook: &Path) -> Self {
        Self {
            program: "ansible-lint".into(),
            args: vec![playbook.display().to_string()],
            workdir: None,
            classify: false,
        }
    }

    pub fn ansible_vault(op: VaultOp, file: &Path) -> Self {
        Self {
            program: "ansible-vault".into(),
            args: vec![op.as_str().into(), file.display().to_string()],
            workdir: None,
            classify: false,
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run in the foreground and wait. `image` names the box in a
    /// classified "image not found" error.
    pub fn run(&self, image: Option<&ImageRef>) -> Result<()> {
        which::which(&self.program).map_err(|_| DevboxError::ToolNotFound(self.program.clone()))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        debug!(command = %self.display(), workdir = ?self.workdir, "running tool");

        if !self.classify {
            let status = cmd
                .status()
                .map_err(|e| DevboxError::Transport(format!("failed to spawn {}: {e}", self.program)))?;
            return self.check(status.code(), None, image);
        }

        // stderr is echoed live and kept for classification
        cmd.stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| DevboxError::Transport(format!("failed to spawn {}: {e}", self.program)))?;
        let captured = child
            .stderr
            .take()
            .map(|stderr| tee_lines(stderr, &mut std::io::stderr()))
            .transpose();
        // reap the child even when reading its stderr failed
        let status = child.wait()?;
        let captured = captured?.unwrap_or_default();
        self.check(status.code(), Some(&captured), image)
    }

    fn check(&self, code: Option<i32>, stderr: Option<&str>, image: Option<&ImageRef>) -> Result<()> {
        match code {
            Some(0) => Ok(()),
            code => {
                if let Some(err) = stderr.and_then(|out| classify_vagrant_failure(image, out)) {
                    return Err(err);
                }
                Err(DevboxError::ToolFailed {
                    command: self.display(),
                    code: code.unwrap_or(-1),
                })
            }
        }
    }
}

/// Copy `reader` to `sink` line by line and return what was read. Bytes
/// that are not UTF-8 are passed through as-is and replaced in the copy.
fn tee_lines(reader: impl Read, sink: &mut impl Write) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let _ = sink.write_all(&line);
        captured.push_str(&String::from_utf8_lossy(&line));
    }
    Ok(captured)
}

/// Fail with "provider unavailable" when the provider's CLI is missing.
pub fn check_provider(kind: ProviderKind) -> Result<()> {
    let probe = match kind {
        ProviderKind::Virtualbox => "VBoxManage",
        ProviderKind::Libvirt => "virsh",
    };
    which::which(probe).map_err(|_| {
        DevboxError::ProviderUnavailable(format!("{kind} ({probe} not found on PATH)"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vagrant_runs_in_vagrantfile_dir() {
        let inv = ToolInvocation::vagrant(VagrantCommand::Up, Path::new("/srv/box"));
        assert_eq!(inv.display(), "vagrant up");
        assert_eq!(inv.workdir.as_deref(), Some(Path::new("/srv/box")));
        assert!(inv.classify);
        assert!(!ToolInvocation::vagrant(VagrantCommand::Status, Path::new(".")).classify);
    }

    #[test]
    fn vault_commands_take_file() {
        let inv = ToolInvocation::ansible_vault(VaultOp::Rekey, Path::new("vault.yml"));
        assert_eq!(inv.display(), "ansible-vault rekey vault.yml");
        assert!(inv.workdir.is_none());
    }

    #[test]
    fn tee_keeps_non_utf8_stderr() {
        let input: &[u8] = b"caf\xe9 warning\nThe box 'x/y' could not be found\n";
        let mut echoed = Vec::new();
        let captured = tee_lines(input, &mut echoed).unwrap();
        assert_eq!(echoed, input);
        assert!(captured.starts_with("caf\u{fffd} warning\n"));
        assert!(captured.contains("could not be found"));
    }

    #[test]
    fn lint_takes_playbook() {
        let inv = ToolInvocation::ansible_lint(Path::new("provisioning/playbook.yml"));
        assert_eq!(inv.display(), "ansible-lint provisioning/playbook.yml");
    }

    #[test]
    fn missing_program_is_tool_not_found() {
        let inv = ToolInvocation {
            program: "doit-definitely-not-installed".into(),
            args: vec![],
            workdir: None,
            classify: false,
        };
        assert!(matches!(inv.run(None), Err(DevboxError::ToolNotFound(_))));
    }

    #[test]
    fn nonzero_exit_keeps_code() {
        let inv = ToolInvocation::vagrant(VagrantCommand::Up, Path::new("."));
        let err = inv.check(Some(3), Some("unrelated failure"), None).unwrap_err();
        assert!(matches!(err, DevboxError::ToolFailed { code: 3, .. }));
    }

    #[test]
    fn missing_box_is_classified() {
        let inv = ToolInvocation::vagrant(VagrantCommand::Up, Path::new("."));
        let image = ImageRef::new("debian/bookworm64", "1.0");
        let err = inv
            .check(
                Some(1),
                Some("The box 'debian/bookworm64' could not be found"),
                Some(&image),
            )
            .unwrap_err();
        assert!(matches!(err, DevboxError::ImageNotFound(ref n) if n == "debian/bookworm64@1.0"));
    }
}
