use crate::cmd::apply::VarOverrides;
use crate::output::{print_json, print_table};
use anyhow::Context;
use devbox_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, overrides: &VarOverrides, json: bool) -> anyhow::Result<()> {
    let config = overrides.apply(Config::load(root).context("failed to load config")?);
    let sequence = config
        .sequence()
        .resolve(&config.vars())
        .context("sequence does not resolve")?;

    if json {
        return print_json(&sequence);
    }

    let rows = sequence
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            vec![
                (i + 1).to_string(),
                step.name.clone(),
                step.kind().to_string(),
                step.action.target(),
                if step.escalate { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(&["#", "NAME", "KIND", "TARGET", "BECOME"], rows);
    Ok(())
}
