//! Virtual-machine definition: base image, version pin, and provider
//! settings. Booting is delegated to Vagrant; this module models the input
//! and classifies Vagrant's failures into the two fatal machine errors.

use crate::error::{DevboxError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ImageRef
// ---------------------------------------------------------------------------

/// Immutable base filesystem snapshot, e.g. `debian/bookworm64` @ `12.20240503.1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub version: String,
}

static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn image_re() -> &'static Regex {
    IMAGE_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*/[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").unwrap())
}

impl ImageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !image_re().is_match(&self.name) {
            return Err(DevboxError::InvalidImage(self.name.clone()));
        }
        if !version_re().is_match(&self.version) {
            return Err(DevboxError::InvalidVersion(self.version.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

// ---------------------------------------------------------------------------
// ProviderSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Virtualbox,
    Libvirt,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Virtualbox => "virtualbox",
            ProviderKind::Libvirt => "libvirt",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    /// Display name of the VM inside the provider.
    pub name: String,
    #[serde(default)]
    pub gui: bool,
    /// Whether the provider verifies guest tools (VirtualBox Guest Additions) at boot.
    #[serde(default)]
    pub check_guest_tools: bool,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::Virtualbox
}

fn default_memory_mb() -> u32 {
    2048
}

fn default_cpus() -> u32 {
    2
}

impl ProviderSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: default_provider_kind(),
            name: name.into(),
            gui: false,
            check_guest_tools: false,
            memory_mb: default_memory_mb(),
            cpus: default_cpus(),
        }
    }
}

// ---------------------------------------------------------------------------
// MachineDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDefinition {
    pub image: ImageRef,
    pub provider: ProviderSettings,
}

impl MachineDefinition {
    pub fn validate(&self) -> Result<()> {
        self.image.validate()?;
        if self.provider.name.trim().is_empty() {
            return Err(DevboxError::InvalidConfig("provider name must not be empty".into()));
        }
        if self.provider.memory_mb < 512 {
            return Err(DevboxError::InvalidConfig(format!(
                "provider memory {} MB is below the 512 MB minimum",
                self.provider.memory_mb
            )));
        }
        if self.provider.cpus == 0 {
            return Err(DevboxError::InvalidConfig("provider cpus must be at least 1".into()));
        }
        Ok(())
    }
}

/// Map a failed `vagrant up` to the machine error taxonomy.
///
/// Returns `None` when the output matches neither "image not found" nor
/// "provider unavailable"; the caller then reports the raw tool failure.
pub fn classify_vagrant_failure(image: Option<&ImageRef>, output: &str) -> Option<DevboxError> {
    let lower = output.to_lowercase();
    if lower.contains("could not be found")
        || lower.contains("box not found")
        || lower.contains("no matching version")
        || lower.contains("couldn't be found")
    {
        let name = image
            .map(ImageRef::to_string)
            .unwrap_or_else(|| "configured box".to_string());
        return Some(DevboxError::ImageNotFound(name));
    }
    if (lower.contains("provider")
        && (lower.contains("usable") || lower.contains("not installed")))
        || lower.contains("virtualbox is not")
        || lower.contains("libvirt is not")
    {
        let line = output
            .lines()
            .find(|l| l.to_lowercase().contains("provider") || l.to_lowercase().contains("virtualbox"))
            .unwrap_or(output)
            .trim()
            .to_string();
        return Some(DevboxError::ProviderUnavailable(line));
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> MachineDefinition {
        MachineDefinition {
            image: ImageRef::new("debian/bookworm64", "12.20240503.1"),
            provider: ProviderSettings::new("docker-host"),
        }
    }

    #[test]
    fn valid_machine_passes() {
        machine().validate().unwrap();
    }

    #[test]
    fn image_without_org_is_rejected() {
        let mut m = machine();
        m.image.name = "bookworm64".into();
        assert!(matches!(m.validate(), Err(DevboxError::InvalidImage(_))));
    }

    #[test]
    fn non_numeric_version_is_rejected() {
        let mut m = machine();
        m.image.version = "latest".into();
        assert!(matches!(m.validate(), Err(DevboxError::InvalidVersion(_))));
    }

    #[test]
    fn zero_cpus_is_rejected() {
        let mut m = machine();
        m.provider.cpus = 0;
        assert!(m.validate().is_err());
    }

    #[test]
    fn provider_defaults_apply() {
        let yaml = "name: box\n";
        let p: ProviderSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p.kind, ProviderKind::Virtualbox);
        assert_eq!(p.memory_mb, 2048);
        assert_eq!(p.cpus, 2);
        assert!(!p.check_guest_tools);
    }

    #[test]
    fn classify_missing_box() {
        let image = ImageRef::new("debian/bookworm64", "99.0");
        let out = "The box 'debian/bookworm64' could not be found or\ncould not be accessed";
        assert!(matches!(
            classify_vagrant_failure(Some(&image), out),
            Some(DevboxError::ImageNotFound(_))
        ));
    }

    #[test]
    fn classify_missing_provider() {
        let image = ImageRef::new("debian/bookworm64", "12.1");
        let out = "The provider 'virtualbox' that was requested to back the machine\n'default' is reporting that it isn't usable on this system.\nVirtualBox is not installed";
        assert!(matches!(
            classify_vagrant_failure(Some(&image), out),
            Some(DevboxError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn classify_unrelated_output() {
        assert!(classify_vagrant_failure(None, "SSH connection reset").is_none());
    }
}
