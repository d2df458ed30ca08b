//! Save directory and on-disk settings.
//!
//! Everything nagome persists lives in one save directory:
//!
//! ```text
//! <save dir>/
//!   settings.yml        settings slots (slot 0 = current at startup)
//!   userData.yml        account
//!   info.log            log output
//!   plugin/<name>/      one folder per plugin, each with plugin.yml
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{ACCOUNT_FILE_NAME, SETTINGS_FILE_NAME};
use crate::nicolive::Account;

/// Environment variable overriding the save directory.
pub const CONFIG_DIR_ENV: &str = "NAGOME_CONFIG_DIR";

/// Resolve the save directory, creating it if necessary.
///
/// Priority:
/// 1. `--save-path` flag
/// 2. `NAGOME_CONFIG_DIR` env var
/// 3. Platform config dir (`~/.config/nagome` on Linux)
pub fn save_dir(flag: Option<&Path>) -> Result<PathBuf> {
    let dir = if let Some(dir) = flag {
        dir.to_path_buf()
    } else if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        PathBuf::from(dir)
    } else {
        dirs::config_dir()
            .context("Could not determine config directory")?
            .join(crate::constants::APP_NAME)
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("could not create save directory {}", dir.display()))?;
    Ok(dir)
}

/// One named set of hub settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SettingsSlot {
    /// Slot name.
    pub name: String,
    /// Copy the current settings into slot 0 on exit.
    pub auto_save_to_0_slot: bool,
    /// Post as owner by default when the account owns the broadcast.
    pub owner_comment: bool,
    /// Follow the community's next broadcast when it starts.
    pub auto_follow_next_waku: bool,
    /// Fetch names of unknown commenters.
    pub user_name_get: bool,
    /// Plugins to start disabled, by name.
    pub plugin_disable: HashMap<String, bool>,
}

impl Default for SettingsSlot {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            auto_save_to_0_slot: true,
            owner_comment: true,
            auto_follow_next_waku: false,
            user_name_get: false,
            plugin_disable: HashMap::new(),
        }
    }
}

impl SettingsSlot {
    /// Whether plugin `name` should run enabled.
    pub fn plugin_enabled(&self, name: &str) -> bool {
        !self.plugin_disable.get(name).copied().unwrap_or(false)
    }
}

/// All settings slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsSlots {
    /// Slots; slot 0 is loaded as the current settings.
    #[serde(default)]
    pub config: Vec<SettingsSlot>,
}

impl Default for SettingsSlots {
    fn default() -> Self {
        Self {
            config: vec![SettingsSlot::default()],
        }
    }
}

impl SettingsSlots {
    /// Settings to start with.
    pub fn initial(&self) -> SettingsSlot {
        self.config.first().cloned().unwrap_or_default()
    }

    /// Store `current` as slot 0 if it asks for that.
    pub fn apply_auto_save(&mut self, current: &SettingsSlot) {
        if !current.auto_save_to_0_slot {
            return;
        }
        match self.config.first_mut() {
            Some(slot) => *slot = current.clone(),
            None => self.config.push(current.clone()),
        }
    }
}

/// Load settings slots; a missing file yields the defaults.
pub fn load_settings(dir: &Path) -> Result<SettingsSlots> {
    let path = dir.join(SETTINGS_FILE_NAME);
    if !path.exists() {
        return Ok(SettingsSlots::default());
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("could not read {}", path.display()))?;
    let mut slots: SettingsSlots = serde_yaml::from_str(&content)
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    if slots.config.is_empty() {
        slots.config.push(SettingsSlot::default());
    }
    Ok(slots)
}

/// Persist settings slots.
pub fn save_settings(dir: &Path, slots: &SettingsSlots) -> Result<()> {
    let path = dir.join(SETTINGS_FILE_NAME);
    fs::write(&path, serde_yaml::to_string(slots)?)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}

/// Path of the account file.
pub fn account_path(dir: &Path) -> PathBuf {
    dir.join(ACCOUNT_FILE_NAME)
}

/// Load the account file.
pub fn load_account(path: &Path) -> Result<Account> {
    let content =
        fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("invalid account in {}", path.display()))
}

/// Persist the account file (owner read/write only).
pub fn save_account(path: &Path, account: &Account) -> Result<()> {
    fs::write(path, serde_yaml::to_string(account)?)
        .with_context(|| format!("could not write {}", path.display()))?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
