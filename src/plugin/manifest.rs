//! Plugin manifests (`plugin.yml`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PluginError;
use crate::constants::{MAIN_PLUGIN_NAME, PLUGIN_MANIFEST_NAME};
use crate::message::Domain;

/// How the hub reaches a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginMethod {
    /// Spawned child process on piped stdio.
    #[default]
    Std,
    /// The plugin dials the hub's TCP listener.
    Tcp,
}

/// Contents of a `plugin.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    /// Unique plugin name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Plugin version.
    pub version: String,
    /// Plugin author.
    pub author: String,
    /// Transport.
    pub method: PluginMethod,
    /// Command line. For `tcp` plugins `{{port}}` and `{{no}}` are
    /// replaced with the hub port and the plugin's index.
    pub exec: Vec<String>,
    /// Semver requirement on the hub version.
    pub nagomever: String,
    /// Domains whose broadcast messages the plugin receives.
    pub subscribe: Vec<String>,
}

impl PluginManifest {
    /// Manifest of the main plugin (the hub's own stdio).
    pub fn main() -> Self {
        Self {
            name: MAIN_PLUGIN_NAME.to_string(),
            description: "main plugin".to_string(),
            version: crate::constants::APP_VERSION.to_string(),
            subscribe: vec![Domain::Nagome.as_str().to_string()],
            ..Self::default()
        }
    }

    /// Read `<dir>/plugin.yml`.
    pub fn load(dir: &Path) -> Result<Self, PluginError> {
        let path = dir.join(PLUGIN_MANIFEST_NAME);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PluginError::Manifest(format!("{}: {e}", path.display())))?;
        let manifest: Self = serde_yaml::from_str(&content)
            .map_err(|e| PluginError::Manifest(format!("{}: {e}", path.display())))?;
        if manifest.name.is_empty() {
            return Err(PluginError::NoName);
        }
        Ok(manifest)
    }

    /// Whether this hub version satisfies `nagomever`. An empty
    /// requirement accepts any version.
    pub fn is_compatible(&self, hub_version: &semver::Version) -> Result<bool, PluginError> {
        if self.nagomever.trim().is_empty() {
            return Ok(true);
        }
        let req = semver::VersionReq::parse(&self.nagomever)
            .map_err(|e| PluginError::Manifest(format!("nagomever \"{}\": {e}", self.nagomever)))?;
        Ok(req.matches(hub_version))
    }

    /// `exec` with `{{port}}` and `{{no}}` substituted.
    pub fn expand_exec(&self, port: u16, no: usize) -> Vec<String> {
        self.exec
            .iter()
            .map(|arg| {
                arg.replace("{{port}}", &port.to_string())
                    .replace("{{no}}", &no.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: viewer
description: comment viewer
version: "1.0"
author: someone
method: tcp
exec: ["viewer", "--port", "{{port}}", "--no", "{{no}}"]
nagomever: ">=0.1, <1.0"
subscribe: [nagome, nagome_directngm]
"#;

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PLUGIN_MANIFEST_NAME), MANIFEST).unwrap();

        let manifest = PluginManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.name, "viewer");
        assert_eq!(manifest.method, PluginMethod::Tcp);
        assert_eq!(
            manifest.expand_exec(8025, 3),
            vec!["viewer", "--port", "8025", "--no", "3"]
        );
    }

    #[test]
    fn test_version_requirement() {
        let manifest: PluginManifest = serde_yaml::from_str(MANIFEST).unwrap();
        assert!(manifest.is_compatible(&semver::Version::new(0, 5, 0)).unwrap());
        assert!(!manifest.is_compatible(&semver::Version::new(1, 2, 0)).unwrap());

        let any = PluginManifest { nagomever: String::new(), ..manifest.clone() };
        assert!(any.is_compatible(&semver::Version::new(9, 0, 0)).unwrap());

        let bad = PluginManifest { nagomever: "not a req".into(), ..manifest };
        assert!(bad.is_compatible(&semver::Version::new(0, 1, 0)).is_err());
    }

    #[test]
    fn test_missing_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PLUGIN_MANIFEST_NAME), "method: std\n").unwrap();
        assert!(matches!(PluginManifest::load(dir.path()), Err(PluginError::NoName)));
    }

    #[test]
    fn test_defaults_to_std() {
        let manifest: PluginManifest = serde_yaml::from_str("name: x\n").unwrap();
        assert_eq!(manifest.method, PluginMethod::Std);
        assert!(manifest.subscribe.is_empty());
    }
}
