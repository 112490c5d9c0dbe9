//! Where graphsync tools keep their settings and database
//!
//! Everything lives in one directory: `$GRAPHSYNC_CONFIG_DIR` when set,
//! otherwise `graphsync/` under the platform config dir.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Overrides the platform location, mainly for tests and containers
pub const DIR_ENV: &str = "GRAPHSYNC_CONFIG_DIR";

const APP_DIR: &str = "graphsync";

/// The graphsync config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// `$GRAPHSYNC_CONFIG_DIR`, else the platform config dir
    pub fn locate() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(Self::at(dir));
        }
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.file(name).exists()
    }

    /// Create the directory if needed
    pub fn ensure(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create config directory: {}", self.root.display()))?;
        Ok(&self.root)
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        read_json(&self.file(name))
    }

    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.ensure()?;
        write_json(&self.file(name), value)
    }
}

/// Locate the config directory and create it; call once at startup
pub fn init() -> Result<ConfigDir> {
    let dir = ConfigDir::locate()?;
    dir.ensure()?;
    Ok(dir)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Write pretty-printed JSON through a sibling temp file, so readers never
/// see a half-written file
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content)
        .with_context(|| format!("Failed to write config file: {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        attempts: u32,
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::at(tmp.path().join("nested"));
        assert!(!dir.contains("sample.json"));

        let sample = Sample {
            name: "github".to_string(),
            attempts: 5,
        };
        dir.save("sample.json", &sample).unwrap();
        assert!(dir.contains("sample.json"));
        assert!(!dir.file("sample.json.tmp").exists());
        assert_eq!(dir.load::<Sample>("sample.json").unwrap(), sample);
    }

    #[test]
    fn test_file_paths_are_under_root() {
        let dir = ConfigDir::at("/etc/graphsync");
        assert_eq!(dir.file("sync.json"), PathBuf::from("/etc/graphsync/sync.json"));
        assert_eq!(dir.path(), Path::new("/etc/graphsync"));
    }

    #[test]
    fn test_unparsable_file_names_its_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Sample>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
        assert!(read_json::<Sample>(&tmp.path().join("missing.json")).is_err());
    }
}
