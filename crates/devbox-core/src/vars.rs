//! `{{ name }}` placeholder substitution for step targets and parameters.

use crate::error::{DevboxError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

/// Substitution variables. `arch` and `codename` are always expected by the
/// standard sequence; anything else is free-form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(BTreeMap<String, String>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Entries from `other` take precedence.
    pub fn merged(&self, other: &Vars) -> Vars {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Expand every placeholder in `input`. Values are not re-expanded.
    pub fn expand(&self, input: &str) -> Result<String> {
        let mut missing: Option<String> = None;
        let out = placeholder_re().replace_all(input, |caps: &Captures| {
            let key = &caps[1];
            match self.0.get(key) {
                Some(v) => v.clone(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(key) => Err(DevboxError::UndefinedVariable(key)),
            None => Ok(out.into_owned()),
        }
    }
}
