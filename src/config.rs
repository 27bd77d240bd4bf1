use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const APP_DIR: &str = "clipboard-masker";
const SETTINGS_FILE: &str = "settings.json";

/// A user-defined masking rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPattern {
    pub id: Uuid,
    /// Display label only; never used for matching.
    pub name: String,
    pub pattern: String,
    pub replacement: String,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

impl CustomPattern {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
            is_enabled: true,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Rule toggles and user lists consumed by the anonymizer. Missing keys in a
/// persisted file fall back to the values in `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "maskIPAddresses")]
    pub mask_ip_addresses: bool,
    pub mask_emails: bool,
    pub mask_phone_numbers: bool,
    pub mask_credit_cards: bool,
    #[serde(rename = "maskSSN")]
    pub mask_ssn: bool,
    pub mask_names: bool,
    /// Replace URLs inside running text with a placeholder. A value that is
    /// nothing but a URL is never masked.
    #[serde(rename = "maskURLs")]
    pub mask_urls: bool,
    pub clean_copied_links: bool,
    /// Lowercase, deduplicated.
    pub custom_names: Vec<String>,
    pub custom_patterns: Vec<CustomPattern>,
    /// Read by the clipboard integration only.
    pub start_on_launch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mask_ip_addresses: true,
            mask_emails: true,
            mask_phone_numbers: true,
            mask_credit_cards: true,
            mask_ssn: true,
            mask_names: true,
            mask_urls: false,
            clean_copied_links: true,
            custom_names: Vec::new(),
            custom_patterns: Vec::new(),
            start_on_launch: true,
        }
    }
}

impl Settings {
    pub fn add_custom_name(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() || self.custom_names.contains(&name) {
            return false;
        }
        self.custom_names.push(name);
        true
    }

    pub fn remove_custom_name(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        let before = self.custom_names.len();
        self.custom_names.retain(|existing| *existing != name);
        self.custom_names.len() != before
    }

    pub fn add_custom_pattern(&mut self, pattern: CustomPattern) -> bool {
        if self.custom_patterns.iter().any(|p| p.id == pattern.id) {
            return false;
        }
        self.custom_patterns.push(pattern);
        true
    }

    pub fn remove_custom_pattern(&mut self, id: Uuid) -> bool {
        let before = self.custom_patterns.len();
        self.custom_patterns.retain(|p| p.id != id);
        self.custom_patterns.len() != before
    }

    /// Replaces the pattern with the same id, keeping its list position.
    pub fn update_custom_pattern(&mut self, pattern: CustomPattern) -> bool {
        match self.custom_patterns.iter_mut().find(|p| p.id == pattern.id) {
            Some(slot) if *slot != pattern => {
                *slot = pattern;
                true
            }
            _ => false,
        }
    }

    pub fn set_pattern_enabled(&mut self, id: Uuid, enabled: bool) -> bool {
        match self.custom_patterns.iter_mut().find(|p| p.id == id) {
            Some(pattern) if pattern.is_enabled != enabled => {
                pattern.is_enabled = enabled;
                true
            }
            _ => false,
        }
    }

    pub fn find_pattern(&self, id: Uuid) -> Option<&CustomPattern> {
        self.custom_patterns.iter().find(|p| p.id == id)
    }
}

/// JSON-file backed settings. Every mutation goes through [`SettingsStore::modify`],
/// which saves as soon as something changed.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Loads `path`, or defaults when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse settings JSON: {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "settings file missing, using defaults");
            Settings::default()
        };
        Ok(Self { path, settings })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_settings_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create settings directory: {}", parent.display())
                })?;
            }
        }
        let payload =
            serde_json::to_string_pretty(&self.settings).context("failed to serialize settings")?;
        fs::write(&self.path, payload)
            .with_context(|| format!("failed to write settings file: {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Applies one mutation and persists it if it reported a change.
    pub fn modify<F>(&mut self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Settings) -> bool,
    {
        let changed = mutate(&mut self.settings);
        if changed {
            self.save()?;
        }
        Ok(changed)
    }
}

pub fn default_settings_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("could not determine the user config directory")?;
    Ok(base.join(APP_DIR).join(SETTINGS_FILE))
}
