//! Emit the declarative artifacts Vagrant and Ansible consume: a
//! `Vagrantfile` wired to the Ansible provisioner, and a playbook that
//! expresses the same step sequence with Ansible's built-in modules.
//!
//! Placeholders are left unexpanded in the playbook: Ansible's Jinja uses
//! the same `{{ name }}` syntax, and the variables travel in the play's
//! `vars:` block.

use crate::error::Result;
use crate::machine::{MachineDefinition, ProviderKind};
use crate::sequence::Sequence;
use crate::step::{Action, Presence, Step};
use crate::vars::Vars;
use serde_yaml::{Mapping, Value};
use std::fmt::Write as _;

// ---------------------------------------------------------------------------
// Vagrantfile
// ---------------------------------------------------------------------------

fn ruby_str(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"").replace('#', "\\#"))
}

pub fn render_vagrantfile(machine: &MachineDefinition, playbook: &str) -> String {
    let p = &machine.provider;
    let mut out = String::new();
    out.push_str("# Generated by doit. Edit doit.yaml and run `doit render` instead.\n");
    out.push_str("Vagrant.configure(\"2\") do |config|\n");
    let _ = writeln!(out, "  config.vm.box = {}", ruby_str(&machine.image.name));
    let _ = writeln!(out, "  config.vm.box_version = {}", ruby_str(&machine.image.version));
    out.push('\n');
    let _ = writeln!(out, "  config.vm.provider {} do |vm|", ruby_str(p.kind.as_str()));
    match p.kind {
        ProviderKind::Virtualbox => {
            let _ = writeln!(out, "    vm.name = {}", ruby_str(&p.name));
            let _ = writeln!(out, "    vm.gui = {}", p.gui);
            let _ = writeln!(out, "    vm.check_guest_additions = {}", p.check_guest_tools);
        }
        ProviderKind::Libvirt => {
            let _ = writeln!(out, "    vm.default_prefix = {}", ruby_str(&p.name));
            let _ = writeln!(out, "    vm.graphics_type = {}", ruby_str(if p.gui { "spice" } else { "none" }));
        }
    }
    let _ = writeln!(out, "    vm.memory = {}", p.memory_mb);
    let _ = writeln!(out, "    vm.cpus = {}", p.cpus);
    out.push_str("  end\n\n");
    out.push_str("  config.vm.provision \"ansible\" do |ansible|\n");
    let _ = writeln!(out, "    ansible.playbook = {}", ruby_str(playbook));
    out.push_str("    ansible.compatibility_mode = \"2.0\"\n");
    out.push_str("  end\n");
    out.push_str("end\n");
    out
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

fn map<const N: usize>(pairs: [(&str, Value); N]) -> Value {
    let mut m = Mapping::new();
    for (k, v) in pairs {
        m.insert(s(k), v);
    }
    Value::Mapping(m)
}

fn strings(items: impl IntoIterator<Item = String>) -> Value {
    Value::Sequence(items.into_iter().map(Value::String).collect())
}

fn task(step: &Step) -> Value {
    let (module, args) = match &step.action {
        Action::AssertOs { ids } => {
            let list = ids
                .iter()
                .map(|i| format!("'{}'", i.to_lowercase()))
                .collect::<Vec<_>>()
                .join(", ");
            (
                "ansible.builtin.assert",
                map([
                    (
                        "that",
                        strings([format!("ansible_distribution | lower in [{list}]")]),
                    ),
                    (
                        "fail_msg",
                        s(&format!("unsupported OS; expected one of: {}", ids.join(", "))),
                    ),
                ]),
            )
        }
        Action::PackageEnsure {
            packages,
            state,
            update_cache,
        } => (
            "ansible.builtin.apt",
            map([
                ("name", strings(packages.iter().map(|p| p.apt_arg()))),
                (
                    "state",
                    s(match state {
                        Presence::Present => "present",
                        Presence::Absent => "absent",
                    }),
                ),
                ("update_cache", Value::Bool(*update_cache)),
            ]),
        ),
        Action::DirectoryEnsure { path, mode } => (
            "ansible.builtin.file",
            map([("path", s(path)), ("state", s("directory")), ("mode", s(mode))]),
        ),
        Action::FileFetch { url, dest, mode } => (
            "ansible.builtin.get_url",
            map([("url", s(url)), ("dest", s(dest)), ("mode", s(mode))]),
        ),
        Action::RepositoryRegister { filename, line } => (
            "ansible.builtin.apt_repository",
            map([
                ("repo", s(line)),
                ("filename", s(filename)),
                ("state", s("present")),
            ]),
        ),
        Action::GroupEnsure { name, system } => (
            "ansible.builtin.group",
            map([
                ("name", s(name)),
                ("state", s("present")),
                ("system", Value::Bool(*system)),
            ]),
        ),
        Action::UserEnsure {
            name,
            group,
            shell,
            password_hash,
            groups,
        } => {
            let mut args = map([
                ("name", s(name)),
                ("group", s(group)),
                ("groups", strings(groups.iter().cloned())),
                ("append", Value::Bool(true)),
                ("shell", s(shell)),
                ("create_home", Value::Bool(true)),
                ("state", s("present")),
            ]);
            if let (Some(hash), Value::Mapping(m)) = (password_hash, &mut args) {
                m.insert(s("password"), s(hash));
                m.insert(s("update_password"), s("on_create"));
            }
            ("ansible.builtin.user", args)
        }
        Action::SudoRuleEnsure { name, user, scope } => match scope.sudoers_line(user) {
            Some(line) => (
                "ansible.builtin.copy",
                map([
                    ("dest", s(&format!("/etc/sudoers.d/{name}"))),
                    ("content", s(&format!("{line}\n"))),
                    ("owner", s("root")),
                    ("group", s("root")),
                    ("mode", s("0440")),
                    ("validate", s("visudo -cf %s")),
                ]),
            ),
            None => (
                "ansible.builtin.debug",
                map([("msg", s(&format!("no sudo rule for {user}")))]),
            ),
        },
        Action::CommandRun { command } => ("ansible.builtin.command", s(command)),
    };

    let mut m = Mapping::new();
    m.insert(s("name"), s(&step.name));
    m.insert(s(module), args);
    m.insert(s("become"), Value::Bool(step.escalate));
    if let Action::CommandRun { .. } = step.action {
        m.insert(s("changed_when"), Value::Bool(false));
    }
    Value::Mapping(m)
}

/// Render `sequence` (unresolved) as a single-play Ansible playbook.
pub fn render_playbook(sequence: &Sequence, vars: &Vars) -> Result<String> {
    let mut var_map = Mapping::new();
    for (k, v) in vars.iter() {
        var_map.insert(s(k), s(v));
    }
    let play = map([
        ("name", s("Provision container host")),
        ("hosts", s("all")),
        ("vars", Value::Mapping(var_map)),
        ("tasks", Value::Sequence(sequence.steps.iter().map(task).collect())),
    ]);
    let body = serde_yaml::to_string(&Value::Sequence(vec![play]))?;
    Ok(format!(
        "# Generated by doit. Edit doit.yaml and run `doit render` instead.\n---\n{body}"
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn vagrantfile_pins_box_and_provider() {
        let config = Config::default();
        let out = render_vagrantfile(&config.machine, "provisioning/playbook.yml");
        assert!(out.contains("config.vm.box = \"debian/bookworm64\""));
        assert!(out.contains("config.vm.box_version = \"12.20240503.1\""));
        assert!(out.contains("config.vm.provider \"virtualbox\" do |vm|"));
        assert!(out.contains("vm.name = \"devbox\""));
        assert!(out.contains("vm.check_guest_additions = false"));
        assert!(out.contains("ansible.playbook = \"provisioning/playbook.yml\""));
    }

    #[test]
    fn ruby_strings_are_escaped() {
        assert_eq!(ruby_str(r#"a"b"#), r#""a\"b""#);
        assert_eq!(ruby_str("#{x}"), "\"\\#{x}\"");
    }

    #[test]
    fn playbook_parses_and_keeps_order() {
        let config = Config::default();
        let yaml = render_playbook(&config.sequence(), &config.vars()).unwrap();
        let parsed: Value = serde_yaml::from_str(&yaml).unwrap();
        let play = &parsed[0];
        assert_eq!(play["hosts"], s("all"));
        assert_eq!(play["vars"]["codename"], s("bookworm"));
        let tasks = play["tasks"].as_sequence().unwrap();
        assert_eq!(tasks.len(), config.sequence().len());
        assert!(tasks[0].get("ansible.builtin.assert").is_some());
        let last = tasks.last().unwrap();
        assert_eq!(last["ansible.builtin.command"], s("docker run --rm hello-world"));
        assert_eq!(last["changed_when"], Value::Bool(false));
    }

    #[test]
    fn playbook_keeps_jinja_placeholders() {
        let config = Config::default();
        let yaml = render_playbook(&config.sequence(), &config.vars()).unwrap();
        assert!(yaml.contains("{{ arch }}"));
        assert!(yaml.contains("{{ codename }}"));
    }

    #[test]
    fn sudo_rule_is_validated_by_visudo() {
        let config = Config::default();
        let yaml = render_playbook(&config.sequence(), &config.vars()).unwrap();
        assert!(yaml.contains("visudo -cf %s"));
        assert!(yaml.contains("/etc/sudoers.d/devops"));
    }
}
