use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use projector_core::{Bounds, ConfigError, ProjectionConfig};
use tracing::{info, warn};

/// JSON projection configuration on disk.
///
/// Loading never fails: a missing file is generated from the default layout,
/// and an unreadable or invalid one falls back to the in-memory default.
#[derive(Debug, Clone)]
pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, default_bounds: Bounds) -> ProjectionConfig {
        match self.read() {
            Ok(config) => return config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, generating default", self.path.display());
                if let Err(e) = self.write(&ProjectionConfig::default_for(default_bounds)) {
                    warn!("Could not write default configuration: {}", e);
                }
            }
            Err(e) => {
                warn!("Ignoring configuration {}: {}", self.path.display(), e);
                return ProjectionConfig::default_for(default_bounds);
            }
        }

        self.read().unwrap_or_else(|e| {
            warn!("Generated configuration unreadable ({}), using default", e);
            ProjectionConfig::default_for(default_bounds)
        })
    }

    fn read(&self) -> Result<ProjectionConfig, ConfigError> {
        let text = fs::read_to_string(&self.path)?;
        let config: ProjectionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write(&self, config: &ProjectionConfig) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// Last modification time, `None` if the file is missing.
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESKTOP: Bounds = Bounds { x: 0, y: 0, width: 1280, height: 720 };

    #[test]
    fn missing_file_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonConfigFile::new(dir.path().join("projection-config.json"));
        assert!(file.modified().is_none());

        let config = file.load(DESKTOP);
        assert_eq!(config, ProjectionConfig::default_for(DESKTOP));
        assert!(file.path().exists());
        assert!(file.modified().is_some());
    }

    #[test]
    fn existing_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonConfigFile::new(dir.path().join("c.json"));
        let mut config = ProjectionConfig::default_for(DESKTOP);
        config.monitors[0].destination = Bounds::new(10, 10, 640, 360);
        config.render.frame_interval_ms = 33;
        file.write(&config).unwrap();

        assert_eq!(file.load(Bounds::new(0, 0, 1, 1)), config);
    }

    #[test]
    fn malformed_file_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, "{ not json").unwrap();

        let config = JsonConfigFile::new(&path).load(DESKTOP);
        assert_eq!(config, ProjectionConfig::default_for(DESKTOP));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn invalid_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, r#"{ "monitors": [] }"#).unwrap();

        assert_eq!(JsonConfigFile::new(&path).load(DESKTOP), ProjectionConfig::default_for(DESKTOP));
    }

    #[test]
    fn unwritable_location_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonConfigFile::new(dir.path().join("missing-dir").join("c.json"));
        assert_eq!(file.load(DESKTOP), ProjectionConfig::default_for(DESKTOP));
    }
}
