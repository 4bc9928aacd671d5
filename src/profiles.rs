//! Saved connection profiles
//!
//! Profiles persist connection options plus the subscriptions to establish
//! on connect, stored as TOML in `profiles.toml` under a caller-supplied
//! directory. Writes go through a temp file in the same directory so a
//! crash mid-save never corrupts the store.

use crate::config::ConnectionOptions;
use crate::transport::SubscribeOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const STORE_FILE: &str = "profiles.toml";

/// A named, reusable connection setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub options: ConnectionOptions,
    /// Established automatically when connecting through this profile.
    #[serde(default)]
    pub subscriptions: Vec<SubscribeOptions>,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile store: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile store is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize profiles: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no profile named '{0}'")]
    NotFound(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    profiles: Vec<ConnectionProfile>,
}

/// On-disk collection of connection profiles.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<ConnectionProfile>,
}

impl ProfileStore {
    /// Load the store from `dir/profiles.toml`. A missing file is an
    /// empty store.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = dir.as_ref().join(STORE_FILE);
        let profiles = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<StoreFile>(&raw)?.profiles
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = profiles.len(), "loaded profiles");
        Ok(Self { path, profiles })
    }

    pub fn list(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Insert or replace the profile with the same name, then persist.
    pub fn upsert(&mut self, profile: ConnectionProfile) -> Result<(), ProfileError> {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
        self.persist()
    }

    /// Remove a profile by name, then persist.
    pub fn remove(&mut self, name: &str) -> Result<ConnectionProfile, ProfileError> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;
        let removed = self.profiles.remove(index);
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> Result<(), ProfileError> {
        let store = StoreFile {
            profiles: self.profiles.clone(),
        };
        let rendered = toml::to_string_pretty(&store)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = self.profiles.len(), "saved profiles");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProtocolVersion, QosLevel};

    fn profile(name: &str) -> ConnectionProfile {
        ConnectionProfile {
            name: name.to_string(),
            options: ConnectionOptions::tcp("broker.local", 1883, format!("{name}-client")),
            subscriptions: vec![SubscribeOptions::new("sensors/#", QosLevel::AtLeastOnce)],
        }
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path()).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_upsert_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path()).unwrap();
        store.upsert(profile("lab")).unwrap();
        store.upsert(profile("prod")).unwrap();

        let reloaded = ProfileStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 2);
        let lab = reloaded.get("lab").unwrap();
        assert_eq!(lab.options.host, "broker.local");
        assert_eq!(lab.options.version, ProtocolVersion::V311);
        assert_eq!(lab.subscriptions.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path()).unwrap();
        store.upsert(profile("lab")).unwrap();

        let mut updated = profile("lab");
        updated.options.port = 8883;
        store.upsert(updated).unwrap();

        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("lab").unwrap().options.port, 8883);
    }

    #[test]
    fn test_remove_unknown_profile_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path()).unwrap();
        store.upsert(profile("lab")).unwrap();

        assert!(matches!(
            store.remove("nope"),
            Err(ProfileError::NotFound(_))
        ));
        assert_eq!(store.remove("lab").unwrap().name, "lab");
        assert!(ProfileStore::load(dir.path()).unwrap().list().is_empty());
    }
}
