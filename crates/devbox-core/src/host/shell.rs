use super::{ExecOutput, Host, OsRelease, PathKind, PathState, UserChange, UserState};
use crate::error::{DevboxError, Result};
use crate::step::PackageSpec;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Runs a POSIX shell script on the target and captures the result.
pub trait Transport {
    fn exec(&self, script: &str) -> Result<ExecOutput>;

    fn describe(&self) -> String;
}

/// `sh -c` on the machine running `doit`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn exec(&self, script: &str) -> Result<ExecOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        capture(cmd, "sh")
    }

    fn describe(&self) -> String {
        "local shell".to_string()
    }
}

/// `vagrant ssh -c` from the directory holding the Vagrantfile.
#[derive(Debug, Clone)]
pub struct VagrantTransport {
    pub vagrantfile_dir: PathBuf,
    pub machine: Option<String>,
}

impl VagrantTransport {
    pub fn new(vagrantfile_dir: impl Into<PathBuf>) -> Result<Self> {
        which::which("vagrant").map_err(|_| DevboxError::ToolNotFound("vagrant".into()))?;
        Ok(Self {
            vagrantfile_dir: vagrantfile_dir.into(),
            machine: None,
        })
    }

    /// Target one machine of a multi-machine Vagrantfile.
    pub fn with_machine(mut self, machine: Option<String>) -> Self {
        self.machine = machine;
        self
    }
}

impl Transport for VagrantTransport {
    fn exec(&self, script: &str) -> Result<ExecOutput> {
        let mut cmd = Command::new("vagrant");
        cmd.arg("ssh");
        if let Some(m) = &self.machine {
            cmd.arg(m);
        }
        cmd.args(["-c", script, "--", "-q"]);
        cmd.current_dir(&self.vagrantfile_dir);
        capture(cmd, "vagrant ssh")
    }

    fn describe(&self) -> String {
        match &self.machine {
            Some(m) => format!("vagrant ssh {m} ({})", self.vagrantfile_dir.display()),
            None => format!("vagrant ssh ({})", self.vagrantfile_dir.display()),
        }
    }
}

fn capture(mut cmd: Command, label: &str) -> Result<ExecOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let output = cmd
        .output()
        .map_err(|e| DevboxError::Transport(format!("failed to spawn {label}: {e}")))?;
    Ok(ExecOutput {
        // killed by signal → -1
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Single-quote `s` for a POSIX shell.
pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// ShellHost
// ---------------------------------------------------------------------------

/// [`Host`] backed by apt, coreutils, shadow-utils, and sudo on a Debian
/// family system.
pub struct ShellHost<T: Transport> {
    transport: T,
}

impl<T: Transport> ShellHost<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn sh(&self, script: &str, escalate: bool) -> Result<ExecOutput> {
        let wrapped = if escalate {
            format!("sudo -n sh -c {}", quote(script))
        } else {
            script.to_string()
        };
        debug!(script = %wrapped, "host exec");
        self.transport.exec(&wrapped)
    }

    /// Run and turn a non-zero exit into the error built by `on_fail`.
    fn checked(
        &self,
        script: &str,
        escalate: bool,
        on_fail: impl FnOnce(&ExecOutput) -> DevboxError,
    ) -> Result<ExecOutput> {
        let out = self.sh(script, escalate)?;
        if !out.success() {
            return Err(on_fail(&out));
        }
        Ok(out)
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

fn transport_err(what: &'static str) -> impl FnOnce(&ExecOutput) -> DevboxError {
    move |out| DevboxError::Transport(format!("{what} failed: {}", tail(&out.stderr)))
}

const APT_ENV: &str = "DEBIAN_FRONTEND=noninteractive";

impl<T: Transport> Host for ShellHost<T> {
    fn os_release(&mut self) -> Result<OsRelease> {
        let out = self.checked("cat /etc/os-release", false, transport_err("reading /etc/os-release"))?;
        Ok(OsRelease::parse(&out.stdout))
    }

    fn package_version(&mut self, name: &str) -> Result<Option<String>> {
        let script = format!(
            "dpkg-query -W -f='${{Status}}\\t${{Version}}' {} 2>/dev/null",
            quote(name)
        );
        let out = self.sh(&script, false)?;
        if !out.success() {
            return Ok(None);
        }
        Ok(parse_dpkg_status(&out.stdout))
    }

    fn refresh_package_index(&mut self, escalate: bool) -> Result<()> {
        self.checked(&format!("{APT_ENV} apt-get update -q"), escalate, |out| {
            DevboxError::Download {
                url: "package index".into(),
                reason: tail(&out.stderr),
            }
        })?;
        Ok(())
    }

    fn install_packages(&mut self, packages: &[PackageSpec], escalate: bool) -> Result<()> {
        let args: Vec<String> = packages.iter().map(|p| quote(&p.apt_arg())).collect();
        let script = format!("{APT_ENV} apt-get install -y -q {}", args.join(" "));
        self.checked(&script, escalate, |out| DevboxError::Package(tail(&out.stderr)))?;
        Ok(())
    }

    fn remove_packages(&mut self, names: &[String], escalate: bool) -> Result<()> {
        let args: Vec<String> = names.iter().map(|n| quote(n)).collect();
        let script = format!("{APT_ENV} apt-get remove -y -q {}", args.join(" "));
        self.checked(&script, escalate, |out| DevboxError::Package(tail(&out.stderr)))?;
        Ok(())
    }

    fn path_state(&mut self, path: &str) -> Result<Option<PathState>> {
        let out = self.sh(&format!("stat -c '%F|%a' {} 2>/dev/null", quote(path)), false)?;
        if !out.success() {
            return Ok(None);
        }
        Ok(parse_stat(&out.stdout))
    }

    fn create_directory(&mut self, path: &str, mode: &str, escalate: bool) -> Result<()> {
        let script = format!("install -d -m {} {}", quote(mode), quote(path));
        self.checked(&script, escalate, transport_err("creating directory"))?;
        Ok(())
    }

    fn set_mode(&mut self, path: &str, mode: &str, escalate: bool) -> Result<()> {
        let script = format!("chmod {} {}", quote(mode), quote(path));
        self.checked(&script, escalate, transport_err("chmod"))?;
        Ok(())
    }

    fn read_file(&mut self, path: &str, escalate: bool) -> Result<Option<String>> {
        let script = format!("test -f {p} && cat {p}", p = quote(path));
        let out = self.sh(&script, escalate)?;
        if !out.success() {
            return Ok(None);
        }
        Ok(Some(out.stdout))
    }

    fn write_file(&mut self, path: &str, content: &str, mode: &str, escalate: bool) -> Result<()> {
        let script = format!(
            "printf '%s' {c} > {p} && chmod {m} {p}",
            c = quote(content),
            p = quote(path),
            m = quote(mode)
        );
        self.checked(&script, escalate, transport_err("writing file"))?;
        Ok(())
    }

    fn download(&mut self, url: &str, dest: &str, mode: &str, escalate: bool) -> Result<()> {
        let script = format!(
            "curl -fsSL -o {d} {u} && chmod {m} {d}",
            d = quote(dest),
            u = quote(url),
            m = quote(mode)
        );
        self.checked(&script, escalate, |out| DevboxError::Download {
            url: url.to_string(),
            reason: tail(&out.stderr),
        })?;
        Ok(())
    }

    fn group_exists(&mut self, name: &str) -> Result<bool> {
        let out = self.sh(&format!("getent group {} >/dev/null", quote(name)), false)?;
        Ok(out.success())
    }

    fn create_group(&mut self, name: &str, system: bool, escalate: bool) -> Result<()> {
        let flag = if system { "--system " } else { "" };
        let script = format!("groupadd {flag}{}", quote(name));
        self.checked(&script, escalate, transport_err("groupadd"))?;
        Ok(())
    }

    fn user(&mut self, name: &str) -> Result<Option<UserState>> {
        let q = quote(name);
        let script = format!("getent passwd {q} && id -gn {q} && id -Gn {q}");
        let out = self.sh(&script, false)?;
        if !out.success() {
            return Ok(None);
        }
        Ok(parse_user(&out.stdout))
    }

    fn create_user(&mut self, change: &UserChange, escalate: bool) -> Result<()> {
        let mut script = format!(
            "useradd -m -g {} -s {}",
            quote(&change.group),
            quote(&change.shell)
        );
        if !change.add_groups.is_empty() {
            script.push_str(&format!(" -G {}", quote(&change.add_groups.join(","))));
        }
        if let Some(hash) = &change.password_hash {
            script.push_str(&format!(" -p {}", quote(hash)));
        }
        script.push_str(&format!(" {}", quote(&change.name)));
        self.checked(&script, escalate, transport_err("useradd"))?;
        Ok(())
    }

    fn modify_user(&mut self, change: &UserChange, escalate: bool) -> Result<()> {
        let mut script = format!(
            "usermod -g {} -s {}",
            quote(&change.group),
            quote(&change.shell)
        );
        if !change.add_groups.is_empty() {
            script.push_str(&format!(" -a -G {}", quote(&change.add_groups.join(","))));
        }
        if let Some(hash) = &change.password_hash {
            script.push_str(&format!(" -p {}", quote(hash)));
        }
        script.push_str(&format!(" {}", quote(&change.name)));
        self.checked(&script, escalate, transport_err("usermod"))?;
        Ok(())
    }

    fn sudoers_valid(&mut self, content: &str) -> Result<bool> {
        let script = format!(
            "tmp=$(mktemp) && printf '%s' {} > \"$tmp\" && visudo -cqf \"$tmp\"; rc=$?; rm -f \"$tmp\"; exit $rc",
            quote(content)
        );
        Ok(self.sh(&script, true)?.success())
    }

    fn run(&mut self, command: &str, escalate: bool) -> Result<ExecOutput> {
        self.sh(command, escalate)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

fn parse_dpkg_status(stdout: &str) -> Option<String> {
    let (status, version) = stdout.trim().split_once('\t')?;
    if status.trim() == "install ok installed" && !version.is_empty() {
        Some(version.trim().to_string())
    } else {
        None
    }
}

fn parse_stat(stdout: &str) -> Option<PathState> {
    let (kind, mode) = stdout.trim().split_once('|')?;
    let kind = match kind {
        "directory" => PathKind::Directory,
        "regular file" | "regular empty file" => PathKind::File,
        _ => PathKind::Other,
    };
    Some(PathState {
        kind,
        mode: normalize_mode(mode),
    })
}

/// `755` → `0755`.
pub(crate) fn normalize_mode(mode: &str) -> String {
    let m = mode.trim().trim_start_matches('0');
    format!("{:0>4}", m)
}

fn parse_user(stdout: &str) -> Option<UserState> {
    let mut lines = stdout.lines();
    let passwd = lines.next()?;
    let primary = lines.next()?.trim().to_string();
    let all_groups = lines.next().unwrap_or("");
    let fields: Vec<&str> = passwd.split(':').collect();
    if fields.len() < 7 {
        return None;
    }
    let groups = all_groups
        .split_whitespace()
        .filter(|g| *g != primary)
        .map(str::to_string)
        .collect();
    Some(UserState {
        name: fields[0].to_string(),
        primary_group: primary,
        shell: fields[6].trim().to_string(),
        groups,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned outputs in order and records every script.
    struct ScriptedTransport {
        replies: RefCell<Vec<ExecOutput>>,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<(i32, &str)>) -> Self {
            Self {
                replies: RefCell::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|(code, stdout)| ExecOutput {
                            code,
                            stdout: stdout.to_string(),
                            stderr: String::new(),
                        })
                        .collect(),
                ),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn exec(&self, script: &str) -> Result<ExecOutput> {
            self.seen.borrow_mut().push(script.to_string());
            Ok(self.replies.borrow_mut().pop().unwrap_or(ExecOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("plain"), "'plain'");
    }

    #[test]
    fn vagrant_transport_names_its_machine() {
        let t = VagrantTransport {
            vagrantfile_dir: PathBuf::from("/srv/devbox"),
            machine: None,
        };
        assert_eq!(t.describe(), "vagrant ssh (/srv/devbox)");
        let t = t.with_machine(Some("builder".into()));
        assert_eq!(t.describe(), "vagrant ssh builder (/srv/devbox)");
    }

    #[test]
    fn normalize_mode_pads() {
        assert_eq!(normalize_mode("755"), "0755");
        assert_eq!(normalize_mode("0644"), "0644");
        assert_eq!(normalize_mode("440"), "0440");
    }

    #[test]
    fn package_version_reads_installed() {
        let t = ScriptedTransport::new(vec![(0, "install ok installed\t5:26.1.3-1~debian.12~bookworm")]);
        let mut host = ShellHost::new(t);
        assert_eq!(
            host.package_version("docker-ce").unwrap().as_deref(),
            Some("5:26.1.3-1~debian.12~bookworm")
        );
    }

    #[test]
    fn package_version_missing_is_none() {
        let t = ScriptedTransport::new(vec![(1, "")]);
        let mut host = ShellHost::new(t);
        assert_eq!(host.package_version("docker-ce").unwrap(), None);
    }

    #[test]
    fn package_version_config_files_state_is_none() {
        let t = ScriptedTransport::new(vec![(0, "deinstall ok config-files\t1.0")]);
        let mut host = ShellHost::new(t);
        assert_eq!(host.package_version("curl").unwrap(), None);
    }

    #[test]
    fn path_state_parses_directory() {
        let t = ScriptedTransport::new(vec![(0, "directory|755\n")]);
        let mut host = ShellHost::new(t);
        assert_eq!(
            host.path_state("/etc/apt/keyrings").unwrap(),
            Some(PathState {
                kind: PathKind::Directory,
                mode: "0755".into()
            })
        );
    }

    #[test]
    fn user_parses_groups_without_primary() {
        let t = ScriptedTransport::new(vec![(
            0,
            "devops:x:1001:1001::/home/devops:/bin/bash\ndevops\ndevops docker sudo\n",
        )]);
        let mut host = ShellHost::new(t);
        let user = host.user("devops").unwrap().unwrap();
        assert_eq!(user.primary_group, "devops");
        assert_eq!(user.shell, "/bin/bash");
        assert_eq!(user.groups, vec!["docker".to_string(), "sudo".to_string()]);
    }

    #[test]
    fn escalated_commands_go_through_sudo() {
        let t = ScriptedTransport::new(vec![]);
        let mut host = ShellHost::new(t);
        host.create_group("docker", true, true).unwrap();
        let seen = host.transport().seen.borrow();
        assert_eq!(seen[0], r"sudo -n sh -c 'groupadd --system '\''docker'\'''");
    }

    #[test]
    fn install_failure_is_package_error() {
        let t = ScriptedTransport::new(vec![(100, "")]);
        let mut host = ShellHost::new(t);
        let err = host
            .install_packages(&[PackageSpec::pinned("docker-ce", "0.0")], true)
            .unwrap_err();
        assert!(matches!(err, DevboxError::Package(_)));
    }

    #[test]
    fn download_failure_is_download_error() {
        let t = ScriptedTransport::new(vec![(22, "")]);
        let mut host = ShellHost::new(t);
        let err = host
            .download("https://example.invalid/gpg", "/etc/apt/keyrings/docker.asc", "0644", true)
            .unwrap_err();
        assert!(matches!(err, DevboxError::Download { ref url, .. } if url.contains("example.invalid")));
    }
}
