use crate::output::print_json;
use anyhow::Context;
use devbox_core::config::{Config, WarnLevel};
use devbox_core::io::{atomic_write, write_if_changed, write_if_missing};
use devbox_core::paths;
use devbox_core::render::{render_playbook, render_vagrantfile};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct FileResult {
    path: PathBuf,
    status: &'static str,
}

/// Vagrantfile and playbook contents for `config`.
fn artifacts(root: &Path, config: &Config) -> anyhow::Result<Vec<(PathBuf, String)>> {
    let vagrantfile = render_vagrantfile(&config.machine, paths::playbook_relative());
    let playbook = render_playbook(&config.sequence(), &config.vars())
        .context("failed to render playbook")?;
    Ok(vec![
        (paths::vagrantfile_path(root), vagrantfile),
        (paths::playbook_path(root), playbook),
    ])
}

fn report(root: &Path, results: &[FileResult], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "files": results,
        }));
    }
    for r in results {
        let shown = r.path.strip_prefix(root).unwrap_or(&r.path);
        println!("  {:<9} {}", r.status, shown.display());
    }
    Ok(())
}

pub fn run(root: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("cannot create {}", root.display()))?;

    let config_path = paths::config_path(root);
    let config = if config_path.exists() && !force {
        Config::load(root).context("failed to load existing doit.yaml")?
    } else {
        Config::default()
    };

    let mut files = vec![(
        config_path,
        serde_yaml::to_string(&config).context("failed to serialize config")?,
    )];
    files.extend(artifacts(root, &config)?);

    let mut results = Vec::with_capacity(files.len());
    for (path, content) in files {
        let status = if force {
            atomic_write(&path, content.as_bytes())?;
            "written"
        } else if write_if_missing(&path, content.as_bytes())? {
            "created"
        } else {
            "kept"
        };
        tracing::debug!(path = %path.display(), status, "init");
        results.push(FileResult { path, status });
    }

    if !json {
        println!("Initialized devbox project in {}", root.display());
    }
    report(root, &results, json)?;
    if !json {
        println!();
        println!("Next: edit doit.yaml, then run `doit render` and `doit setup`.");
    }
    Ok(())
}

pub fn render(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("doit.yaml has errors:\n  {}", errors.join("\n  "));
    }

    let mut results = Vec::new();
    for (path, content) in artifacts(root, &config)? {
        let status = if write_if_changed(&path, content.as_bytes())? {
            "updated"
        } else {
            "unchanged"
        };
        results.push(FileResult { path, status });
    }
    report(root, &results, json)
}
