//! Connection profiles persisted as a JSON array
//!
//! The default location is `<config dir>/mongoz/profiles.json`. Passwords
//! are stored in the file as entered; a profile without a password leaves
//! the field out.

use anyhow::{Context, Result};
use mongoz_core::ConnectionProfile;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const APP_DIR: &str = "mongoz";
const PROFILES_FILE: &str = "profiles.json";

/// Loads and saves connection profiles
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(config_dir.join(APP_DIR).join(PROFILES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored profile, in file order. A missing file holds no profiles.
    #[tracing::instrument(skip(self), fields(path = ?self.path))]
    pub fn load(&self) -> Result<Vec<ConnectionProfile>> {
        if !self.path.exists() {
            tracing::debug!("profile file does not exist");
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read profiles from {:?}", self.path))?;
        let profiles: Vec<ConnectionProfile> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profiles in {:?}", self.path))?;

        for profile in &profiles {
            if let Err(e) = profile.validate() {
                tracing::warn!(profile = %profile.display_name(), error = %e, "stored profile is invalid");
            }
        }
        tracing::debug!(count = profiles.len(), "profiles loaded");
        Ok(profiles)
    }

    /// Replace the file with `profiles`
    #[tracing::instrument(skip(self, profiles), fields(path = ?self.path, count = profiles.len()))]
    pub fn save(&self, profiles: &[ConnectionProfile]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(profiles)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write profiles to {:?}", self.path))?;
        tracing::info!("profiles saved");
        Ok(())
    }

    /// Profile whose id or label equals `key`; ids win over labels
    pub fn find(&self, key: &str) -> Result<Option<ConnectionProfile>> {
        let profiles = self.load()?;
        let by_id = Uuid::parse_str(key.trim())
            .ok()
            .and_then(|id| profiles.iter().position(|p| p.id == id));
        let index = by_id.or_else(|| {
            profiles
                .iter()
                .position(|p| p.label.as_deref() == Some(key.trim()))
        });
        Ok(index.map(|i| profiles[i].clone()))
    }

    /// Insert `profile`, replacing a stored profile with the same id
    pub fn upsert(&self, profile: ConnectionProfile) -> Result<()> {
        let mut profiles = self.load()?;
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => profiles.push(profile),
        }
        self.save(&profiles)
    }

    /// Remove the profile with `id`; returns whether one was removed
    pub fn remove(&self, id: Uuid) -> Result<bool> {
        let mut profiles = self.load()?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Ok(false);
        }
        self.save(&profiles)?;
        Ok(true)
    }
}
